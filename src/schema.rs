use std::collections::HashMap;

use serde::Serialize;

use crate::model::SheetError;

pub const PATIENT_ID_COLUMN: &str = "CEDULA";
pub const PHASE_FK_COLUMN: &str = "PACIENTE_CEDULA";
pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "UNNAMED";

/// A sheet as read from disk: every cell is text, nothing is coerced.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}

/// Table-specific renames applied after header cleanup.
#[derive(Clone, Debug, PartialEq)]
pub struct TableProfile {
    pub table: String,
    pub renames: Vec<(String, String)>,
    /// The first of these found is renamed to [`PHASE_FK_COLUMN`].
    pub fk_candidates: Vec<String>,
}

impl TableProfile {
    pub fn patients(table: &str) -> Self {
        Self {
            table: table.to_string(),
            renames: vec![
                ("FECHA_DE_PROGRAMACION_DE_CITA".into(), "FECHA_PROG_CITA".into()),
                ("IPS_INSTITUTO_QUE_REMITE".into(), "IPS_QUE_REMITE".into()),
                ("OBSERVACIONES1".into(), "OBSERVACIONES_2".into()),
            ],
            fk_candidates: Vec::new(),
        }
    }

    pub fn phases(table: &str) -> Self {
        Self {
            table: table.to_string(),
            renames: Vec::new(),
            fk_candidates: vec!["DOCUMENTO".into(), PATIENT_ID_COLUMN.into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub table: RawTable,
    pub dropped_columns: usize,
}

/// Parses a CSV export the way the spreadsheet reader would: blank headers
/// become `Unnamed: N` and repeated headers are suffixed `.1`, `.2`, ...
pub fn read_sheet(data: &str) -> Result<RawTable, SheetError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_bytes());

    let headers = match rdr.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => return Err(SheetError::Parse(format!("Missing header row: {}", err))),
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut columns = Vec::with_capacity(headers.len());
    for (index, header) in headers.iter().enumerate() {
        let base = if header.trim().is_empty() {
            format!("Unnamed: {}", index)
        } else {
            header.to_string()
        };
        let count = seen.entry(base.clone()).or_insert(0);
        if *count == 0 {
            columns.push(base);
        } else {
            columns.push(format!("{}.{}", base, count));
        }
        *count += 1;
    }

    let mut rows = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record.map_err(|err| SheetError::Parse(err.to_string()))?;
        if record.len() != columns.len() {
            return Err(SheetError::Parse(format!(
                "Field count is not equal to header count on row {}", index + 1
            )));
        }
        rows.push(record.iter().map(String::from).collect());
    }

    Ok(RawTable { columns, rows })
}

pub fn normalize_header(raw: &str) -> String {
    let replaced: String = raw
        .to_uppercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '.' => '_',
            'É' => 'E',
            other => other,
        })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    collapsed.trim_matches('_').to_string()
}

pub fn normalize_table(table: RawTable, profile: &TableProfile, placeholder_prefix: &str) -> Normalized {
    let cleaned: Vec<String> = table.columns.iter().map(|c| normalize_header(c)).collect();
    for (original, clean) in table.columns.iter().zip(cleaned.iter()) {
        tracing::debug!(table = %profile.table, "'{}' -> '{}'", original, clean);
    }

    let keep: Vec<usize> = cleaned
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.starts_with(placeholder_prefix))
        .map(|(index, _)| index)
        .collect();
    let dropped_columns = cleaned.len() - keep.len();
    if dropped_columns > 0 {
        tracing::info!(table = %profile.table, dropped_columns, "Dropped placeholder columns");
    }

    let mut columns: Vec<String> = keep.iter().map(|&index| cleaned[index].clone()).collect();
    let rows: Vec<Vec<String>> = table
        .rows
        .into_iter()
        .map(|row| keep.iter().map(|&index| row[index].clone()).collect::<Vec<String>>())
        .collect();

    for (from, to) in &profile.renames {
        rename_column(&mut columns, from, to, &profile.table);
    }
    if !columns.iter().any(|c| c == PHASE_FK_COLUMN) {
        if let Some(candidate) = profile.fk_candidates.iter().find(|c| columns.contains(*c)) {
            rename_column(&mut columns, candidate, PHASE_FK_COLUMN, &profile.table);
        }
    }

    Normalized {
        table: RawTable { columns, rows },
        dropped_columns,
    }
}

fn rename_column(columns: &mut [String], from: &str, to: &str, table: &str) {
    if columns.iter().any(|c| c == to) {
        tracing::warn!(table, "Not renaming {} to {}: target column already present", from, to);
        return;
    }
    if let Some(column) = columns.iter_mut().find(|c| c.as_str() == from) {
        *column = to.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_cleanup_test() {
        assert_eq!(normalize_header("Fecha de Recibido"), "FECHA_DE_RECIBIDO");
        assert_eq!(normalize_header("Género"), "GENERO");
        assert_eq!(normalize_header("Departamento/Ciudad"), "DEPARTAMENTO_CIUDAD");
        assert_eq!(normalize_header(" No. Orden "), "NO_ORDEN");
        assert_eq!(normalize_header("__Rango  de   edad__"), "RANGO_DE_EDAD");
        assert_eq!(normalize_header("Muestra enviada a España"), "MUESTRA_ENVIADA_A_ESPAÑA");
    }

    #[test]
    fn read_sheet_keeps_cells_as_text() {
        let data = "Cedula,Edad,,Edad\n0012,045,x,7\n";
        let table = read_sheet(data).unwrap();
        assert_eq!(table.columns, vec!["Cedula", "Edad", "Unnamed: 2", "Edad.1"]);
        assert_eq!(table.rows, vec![vec!["0012", "045", "x", "7"]]);
    }

    #[test]
    fn read_sheet_rejects_ragged_rows() {
        let data = "a,b\n1,2\n3\n";
        assert!(matches!(read_sheet(data), Err(SheetError::Parse(_))));
    }

    #[test]
    fn placeholder_columns_are_dropped() {
        let table = RawTable {
            columns: vec!["Cedula".into(), "Unnamed: 1".into(), "Estado".into(), "Unnamed: 3".into()],
            rows: vec![vec!["1".into(), "".into(), "PENDIENTE".into(), "".into()]],
        };
        let normalized = normalize_table(table, &TableProfile::patients("Pacientes_tmz"), DEFAULT_PLACEHOLDER_PREFIX);
        assert_eq!(normalized.dropped_columns, 2);
        assert_eq!(normalized.table.columns, vec!["CEDULA", "ESTADO"]);
        assert_eq!(normalized.table.rows, vec![vec!["1".to_string(), "PENDIENTE".to_string()]]);
    }

    #[test]
    fn patient_renames_apply() {
        let table = RawTable {
            columns: vec!["Fecha de programación de cita".into(), "IPS / Instituto que remite".into(), "Observaciones1".into()],
            rows: Vec::new(),
        };
        let normalized = normalize_table(table, &TableProfile::patients("Pacientes_tmz"), DEFAULT_PLACEHOLDER_PREFIX);
        // the accented "Ó" is not one of the folded characters
        assert_eq!(normalized.table.columns[0], "FECHA_DE_PROGRAMACIÓN_DE_CITA");
        assert_eq!(normalized.table.columns[1], "IPS_QUE_REMITE");
        assert_eq!(normalized.table.columns[2], "OBSERVACIONES_2");
    }

    #[test]
    fn fk_candidate_renamed_to_canonical_name() {
        let profile = TableProfile::phases("FasePaciente");
        let by_document = RawTable { columns: vec!["Documento".into(), "Edad".into()], rows: Vec::new() };
        let by_cedula = RawTable { columns: vec!["Edad".into(), "Cédula".into()], rows: Vec::new() };

        let first = normalize_table(by_document, &profile, DEFAULT_PLACEHOLDER_PREFIX);
        assert_eq!(first.table.columns, vec![PHASE_FK_COLUMN, "EDAD"]);

        let second = normalize_table(by_cedula, &profile, DEFAULT_PLACEHOLDER_PREFIX);
        assert_eq!(second.table.columns, vec!["EDAD", PHASE_FK_COLUMN]);
    }

    #[test]
    fn empty_table_is_valid() {
        let normalized = normalize_table(RawTable::default(), &TableProfile::phases("FasePaciente"), DEFAULT_PLACEHOLDER_PREFIX);
        assert_eq!(normalized.dropped_columns, 0);
        assert!(normalized.table.columns.is_empty());
    }
}
