use std::collections::HashSet;
use std::path::PathBuf;

use rusqlite::{params_from_iter, types::Value, Connection, Row};

use crate::config::{ConfigError, StoreConfig};
use crate::ddl::{create_table_sql, quote_ident, TableKind};
use crate::pipeline::FetchedRow;
use crate::schema::{RawTable, PATIENT_ID_COLUMN, PHASE_FK_COLUMN};

pub const NAME_COLUMN: &str = "NOMBRE";
pub const PHYSICIAN_COLUMN: &str = "NOMBRE_MEDICO";
pub const RECEIVED_DATE_COLUMN: &str = "FECHA_DE_RECIBIDO";
pub const STATUS_COLUMN: &str = "ESTADO";
pub const GENDER_COLUMN: &str = "GENERO";
pub const AGE_COLUMN: &str = "EDAD";
pub const AGE_BRACKET_COLUMN: &str = "RANGO_DE_EDAD";
pub const SAMPLE_DATE_COLUMN: &str = "FECHA_TOMA_MUESTRA";
pub const MONTH_COLUMN: &str = "MES";
pub const DEPARTMENT_COLUMN: &str = "DEPARTAMENTO";
pub const CITY_COLUMN: &str = "CIUDAD";
pub const INSURER_COLUMN: &str = "EPS";
pub const RESULT_COLUMN: &str = "RESULTADOS_A_CORTE_14_OCTUBRE_JOHN";
pub const SENT_ABROAD_COLUMN: &str = "MUESTRA_ENVIADA_A_ESPAÑA";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Side {
    Patient,
    Phase,
}

/// Column list of the join query, in the order [`FetchedRow`] is filled.
const PROJECTION: [(Side, &str); 15] = [
    (Side::Patient, PATIENT_ID_COLUMN),
    (Side::Patient, NAME_COLUMN),
    (Side::Patient, PHYSICIAN_COLUMN),
    (Side::Patient, RECEIVED_DATE_COLUMN),
    (Side::Patient, STATUS_COLUMN),
    (Side::Phase, GENDER_COLUMN),
    (Side::Phase, AGE_COLUMN),
    (Side::Phase, AGE_BRACKET_COLUMN),
    (Side::Phase, SAMPLE_DATE_COLUMN),
    (Side::Phase, MONTH_COLUMN),
    (Side::Phase, DEPARTMENT_COLUMN),
    (Side::Phase, CITY_COLUMN),
    (Side::Phase, INSURER_COLUMN),
    (Side::Phase, RESULT_COLUMN),
    (Side::Phase, SENT_ABROAD_COLUMN),
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Unsupported driver '{0}': only sqlite is available")]
    UnsupportedDriver(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Insert into {table} failed: {source}. Columns: {columns:?}")]
    Insert {
        table: String,
        columns: Vec<String>,
        source: rusqlite::Error,
    },
}

/// Which columns the stored tables actually have. Checked once per fetch;
/// the derivation steps consult it instead of probing rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capabilities {
    pub patient_columns: HashSet<String>,
    pub phase_columns: HashSet<String>,
}

impl Capabilities {
    pub fn has(&self, column: &str) -> bool {
        self.patient_columns.contains(column) || self.phase_columns.contains(column)
    }

    #[cfg(test)]
    pub fn all() -> Self {
        let mut caps = Self::default();
        for (side, column) in PROJECTION {
            match side {
                Side::Patient => caps.patient_columns.insert(column.to_string()),
                Side::Phase => caps.phase_columns.insert(column.to_string()),
            };
        }
        caps.phase_columns.insert(PHASE_FK_COLUMN.to_string());
        caps
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::Null | Value::Blob(_) => None,
        Value::Integer(number) => Some(number.to_string()),
        Value::Real(number) => Some(number.to_string()),
        Value::Text(text) => Some(text),
    }
}

fn fetched_row(row: &Row<'_>) -> rusqlite::Result<FetchedRow> {
    let mut values = Vec::with_capacity(PROJECTION.len());
    for index in 0..PROJECTION.len() {
        values.push(text(row.get::<_, Value>(index)?));
    }
    let has_phase: bool = row.get(PROJECTION.len())?;

    let mut next = values.into_iter();
    let mut take = || next.next().flatten();
    Ok(FetchedRow {
        patient_id: take().unwrap_or_default(),
        name: take(),
        physician: take(),
        received_date: take(),
        status: take(),
        gender: take(),
        age: take(),
        age_bracket: take(),
        sample_date: take(),
        month: take(),
        department: take(),
        city: take(),
        insurer: take(),
        result: take(),
        sent_abroad: take(),
        has_phase,
    })
}

/// Handle on the relational store. The caller owns it for the length of a
/// session and releases it with [`Store::close`].
pub struct Store {
    conn: Connection,
    schema: String,
    patient_table: String,
    phase_table: String,
}

impl Store {
    /// Opens the SQLite file `<server>/<database>[.db]` and attaches it under
    /// the configured schema name.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let settings = config.connection()?;
        if !settings.driver.eq_ignore_ascii_case("sqlite") {
            return Err(StoreError::UnsupportedDriver(settings.driver));
        }

        let mut path = PathBuf::from(&settings.server).join(&settings.database);
        if path.extension().is_none() {
            path.set_extension("db");
        }
        tracing::info!(user = %settings.username, path = %path.display(), "Connecting to store");
        Self::attach(config, &path.to_string_lossy())
    }

    #[cfg(test)]
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::attach(config, ":memory:")
    }

    fn attach(config: &StoreConfig, location: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute(&format!("ATTACH DATABASE ?1 AS {}", quote_ident(&config.schema)), [location])?;
        Ok(Self {
            conn,
            schema: config.schema.clone(),
            patient_table: config.patient_table.clone(),
            phase_table: config.phase_table.clone(),
        })
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))
    }

    pub fn patient_table(&self) -> &str {
        &self.patient_table
    }

    pub fn phase_table(&self) -> &str {
        &self.phase_table
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(&self.schema)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn table_columns(&self, table: &str) -> Result<HashSet<String>, StoreError> {
        let sql = format!("PRAGMA {}.table_info({})", quote_ident(&self.schema), quote_ident(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(columns)
    }

    pub fn capabilities(&self) -> Result<Capabilities, StoreError> {
        let patient_columns = self.table_columns(&self.patient_table)?;
        let mut phase_columns = self.table_columns(&self.phase_table)?;
        if !phase_columns.contains(PHASE_FK_COLUMN) {
            // without the key the phase table cannot be joined at all
            phase_columns.clear();
        }
        Ok(Capabilities { patient_columns, phase_columns })
    }

    fn join_query(&self, caps: &Capabilities) -> String {
        let joinable = !caps.phase_columns.is_empty();
        let select: Vec<String> = PROJECTION
            .iter()
            .map(|(side, column)| {
                let (alias, present) = match side {
                    Side::Patient => ("P", caps.patient_columns.contains(*column)),
                    Side::Phase => ("F", caps.phase_columns.contains(*column)),
                };
                if present {
                    format!("{}.{}", alias, quote_ident(column))
                } else {
                    format!("NULL AS {}", quote_ident(column))
                }
            })
            .collect();

        let fk = quote_ident(PHASE_FK_COLUMN);
        let has_phase = if joinable {
            format!("F.{} IS NOT NULL AS HAS_PHASE", fk)
        } else {
            "0 AS HAS_PHASE".to_string()
        };

        let mut sql = format!(
            "SELECT\n    {},\n    {}\nFROM {} P",
            select.join(",\n    "),
            has_phase,
            self.qualified(&self.patient_table)
        );
        if joinable {
            sql.push_str(&format!(
                "\nLEFT JOIN {} F ON P.{} = F.{}",
                self.qualified(&self.phase_table),
                quote_ident(PATIENT_ID_COLUMN),
                fk
            ));
        }
        sql
    }

    /// Runs the patient / phase left-outer join. A store without a usable
    /// patient table yields no rows.
    pub fn fetch_joined(&self) -> Result<(Vec<FetchedRow>, Capabilities), StoreError> {
        let caps = self.capabilities()?;
        if !caps.patient_columns.contains(PATIENT_ID_COLUMN) {
            tracing::warn!(table = %self.patient_table, "Patient table missing or without {}", PATIENT_ID_COLUMN);
            return Ok((Vec::new(), caps));
        }
        if caps.phase_columns.is_empty() {
            tracing::warn!(table = %self.phase_table, "Phase table missing or without {}; phases left empty", PHASE_FK_COLUMN);
        }

        let sql = self.join_query(&caps);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], fetched_row)?
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(rows = rows.len(), "Fetched joined rows");
        Ok((rows, caps))
    }

    pub fn stored_patient_ids(&self) -> Result<HashSet<String>, StoreError> {
        if !self.table_columns(&self.patient_table)?.contains(PATIENT_ID_COLUMN) {
            return Ok(HashSet::new());
        }
        let sql = format!("SELECT {} FROM {}", quote_ident(PATIENT_ID_COLUMN), self.qualified(&self.patient_table));
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, Value>(0))?
            .filter_map(|value| value.map(text).transpose())
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn ensure_table(&self, table: &str, columns: &[String], kind: &TableKind) -> Result<(), StoreError> {
        self.conn.execute_batch(&create_table_sql(&self.schema, table, columns, kind))?;
        Ok(())
    }

    /// Inserts every row inside one transaction; any failure rolls the whole
    /// batch back.
    pub fn bulk_insert(&mut self, table: &str, data: &RawTable) -> Result<usize, StoreError> {
        if data.columns.is_empty() || data.rows.is_empty() {
            return Ok(0);
        }

        let columns: Vec<String> = data.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; data.columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(table),
            columns.join(", "),
            placeholders
        );
        let insert_error = |source: rusqlite::Error| StoreError::Insert {
            table: table.to_string(),
            columns: data.columns.clone(),
            source,
        };

        let tx = self.conn.transaction().map_err(insert_error)?;
        {
            let mut stmt = tx.prepare(&sql).map_err(insert_error)?;
            for row in &data.rows {
                stmt.execute(params_from_iter(row.iter())).map_err(insert_error)?;
            }
        }
        tx.commit().map_err(insert_error)?;
        Ok(data.rows.len())
    }
}
