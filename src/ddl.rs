use crate::schema::{PATIENT_ID_COLUMN, PHASE_FK_COLUMN};

pub const PATIENT_KEY_COLUMN: &str = "ID_PACIENTE";

#[derive(Clone, Debug, PartialEq)]
pub enum TableKind {
    Patients,
    Phases { patient_table: String },
}

/// Wraps an identifier in double quotes. Embedded quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_definition(column: &str, kind: &TableKind) -> String {
    let name = quote_ident(column);
    if column == PATIENT_ID_COLUMN {
        return format!("    {} TEXT NOT NULL UNIQUE", name);
    }
    if column == "ESTADO" {
        return format!("    {} TEXT NOT NULL", name);
    }
    if column == "FASE_ORDEN" && matches!(kind, TableKind::Phases { .. }) {
        return format!("    {} INTEGER NOT NULL", name);
    }
    // dates and months stay text, they are repaired at query time
    format!("    {} TEXT NULL", name)
}

/// `CREATE TABLE` statement for a normalized sheet.
pub fn create_table_sql(schema: &str, table: &str, columns: &[String], kind: &TableKind) -> String {
    let mut definitions = Vec::new();
    if *kind == TableKind::Patients {
        definitions.push(format!("    {} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(PATIENT_KEY_COLUMN)));
    }
    for column in columns.iter().filter(|c| c.as_str() != PATIENT_KEY_COLUMN) {
        definitions.push(column_definition(column, kind));
    }
    if let TableKind::Phases { patient_table } = kind {
        if columns.iter().any(|c| c == PHASE_FK_COLUMN) {
            definitions.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {}({})",
                quote_ident(PHASE_FK_COLUMN),
                quote_ident(patient_table),
                quote_ident(PATIENT_ID_COLUMN)
            ));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\n{}\n);\n",
        quote_ident(schema),
        quote_ident(table),
        definitions.join(",\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn patient_table_ddl() {
        let sql = create_table_sql(
            "tmz_data",
            "Pacientes_tmz",
            &columns(&["CEDULA", "NOMBRE", "ESTADO", "FECHA_DE_RECIBIDO"]),
            &TableKind::Patients,
        );
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tmz_data\".\"Pacientes_tmz\" ("));
        assert!(sql.contains("\"ID_PACIENTE\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"CEDULA\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"ESTADO\" TEXT NOT NULL"));
        assert!(sql.contains("\"FECHA_DE_RECIBIDO\" TEXT NULL"));
        assert!(!sql.contains("FOREIGN KEY"));
    }

    #[test]
    fn phase_table_ddl_has_foreign_key() {
        let kind = TableKind::Phases { patient_table: "Pacientes_tmz".into() };
        let sql = create_table_sql("tmz_data", "FasePaciente", &columns(&["PACIENTE_CEDULA", "FASE_ORDEN", "MES"]), &kind);
        assert!(sql.contains("\"FASE_ORDEN\" INTEGER NOT NULL"));
        assert!(sql.contains("FOREIGN KEY (\"PACIENTE_CEDULA\") REFERENCES \"Pacientes_tmz\"(\"CEDULA\")"));
        assert!(!sql.contains("ID_PACIENTE"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
