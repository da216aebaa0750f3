use std::io::Write;

use crate::model::{DisplayRow, PatientRecord};

/// Writes the filtered table as CSV with the display column names.
pub fn write_csv<W: Write>(rows: &[PatientRecord], writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in rows {
        wtr.serialize(DisplayRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::derive_table;
    use crate::store::tests::seeded_store;

    #[test]
    fn export_uses_display_labels() {
        let store = seeded_store();
        let (rows, caps) = store.fetch_joined().unwrap();
        let table = derive_table(rows, &caps);

        let mut out = Vec::new();
        write_csv(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("CEDULA,NOMBRE,NOMBRE_MEDICO,GENERO,EDAD"));
        assert!(header.ends_with("RESULTADOS_TMZ,MUESTRA_ENVIADA_A_ESPAÑA"));

        let marta = lines.find(|line| line.starts_with("C,")).unwrap();
        assert!(marta.contains("SIN DATOS"));
        assert!(marta.contains("2024-10-09"));
        assert!(marta.ends_with(",NO"));
        assert!(text.contains("OCTUBRE"));
    }

    #[test]
    fn empty_table_writes_nothing() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert!(out.is_empty());
    }
}
