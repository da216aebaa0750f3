use std::collections::HashSet;

use crate::schema::{RawTable, PATIENT_ID_COLUMN, PHASE_FK_COLUMN};

/// A phase row whose foreign key does not reference a known patient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Orphan {
    pub row: usize,
    pub patient_id: Option<String>,
}

pub fn patient_ids(patients: &RawTable) -> HashSet<String> {
    match patients.column_index(PATIENT_ID_COLUMN) {
        Some(index) => patients.rows.iter().map(|row| row[index].clone()).collect(),
        None => HashSet::new(),
    }
}

/// Rows of `phases` that cannot be inserted under the foreign key. Without an
/// FK column no row can reference a patient, so every row is an orphan.
pub fn find_orphans(phases: &RawTable, known: &HashSet<String>) -> Vec<Orphan> {
    let Some(fk) = phases.column_index(PHASE_FK_COLUMN) else {
        return (0..phases.rows.len())
            .map(|row| Orphan { row, patient_id: None })
            .collect();
    };

    phases
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| !known.contains(&row[fk]))
        .map(|(row, values)| Orphan { row, patient_id: Some(values[fk].clone()) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases(ids: &[&str]) -> RawTable {
        RawTable {
            columns: vec![PHASE_FK_COLUMN.into(), "EDAD".into()],
            rows: ids.iter().map(|id| vec![id.to_string(), "40".to_string()]).collect(),
        }
    }

    #[test]
    fn orphan_rejection_test() {
        let known: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let orphans = find_orphans(&phases(&["A", "B", "C"]), &known);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].patient_id.as_deref(), Some("C"));
    }

    #[test]
    fn every_row_of_a_known_patient_is_kept() {
        let known: HashSet<String> = ["A".to_string()].into_iter().collect();
        let orphans = find_orphans(&phases(&["A", "A", "X", "A"]), &known);
        assert_eq!(orphans.iter().map(|o| o.row).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn orphans_report_row_and_identifier() {
        let known: HashSet<String> = ["A".to_string()].into_iter().collect();
        let orphans = find_orphans(&phases(&["A", "Z"]), &known);
        assert_eq!(orphans, vec![Orphan { row: 1, patient_id: Some("Z".into()) }]);
    }

    #[test]
    fn missing_fk_column_rejects_everything() {
        let table = RawTable {
            columns: vec!["EDAD".into()],
            rows: vec![vec!["1".into()], vec!["2".into()]],
        };
        let orphans = find_orphans(&table, &HashSet::new());
        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().all(|o| o.patient_id.is_none()));
    }

    #[test]
    fn patient_ids_are_distinct() {
        let patients = RawTable {
            columns: vec!["NOMBRE".into(), PATIENT_ID_COLUMN.into()],
            rows: vec![
                vec!["Ana".into(), "1".into()],
                vec!["Ana".into(), "1".into()],
                vec!["Luis".into(), "2".into()],
            ],
        };
        assert_eq!(patient_ids(&patients).len(), 2);
    }
}
