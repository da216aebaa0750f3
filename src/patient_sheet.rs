use std::collections::{HashMap, HashSet};

use crate::model::{is_textual_null, Sheet, SheetError};
use crate::reconcile;
use crate::schema::{normalize_table, read_sheet, RawTable, TableProfile, PATIENT_ID_COLUMN};

pub struct PatientSheet {
    pub profile: TableProfile,
    pub placeholder_prefix: String,
    pub data: RawTable,
    pub dropped_columns: usize,
    pub error_index: HashSet<usize>,
}

impl PatientSheet {
    pub fn new(table: &str, placeholder_prefix: &str) -> Self {
        Self {
            profile: TableProfile::patients(table),
            placeholder_prefix: placeholder_prefix.to_string(),
            data: RawTable::default(),
            dropped_columns: 0,
            error_index: HashSet::new(),
        }
    }

    /// Identifiers of the rows that survive validation.
    pub fn patient_ids(&self) -> HashSet<String> {
        reconcile::patient_ids(&self.convert())
    }
}

impl Sheet for PatientSheet {
    fn profile(&self) -> &TableProfile {
        &self.profile
    }

    fn parse(&mut self, data: &str) -> Result<(), SheetError> {
        let normalized = normalize_table(read_sheet(data)?, &self.profile, &self.placeholder_prefix);
        self.data = normalized.table;
        self.dropped_columns = normalized.dropped_columns;
        Ok(())
    }

    fn validate(&mut self, _known_patients: &HashSet<String>) -> SheetError {
        let mut output = Vec::new();
        let id_index = self.data.column_index(PATIENT_ID_COLUMN);
        // first row seen for each identifier
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        for (index, row) in self.data.rows.iter().enumerate() {
            let Some(id) = id_index.map(|i| row[i].as_str()).filter(|id| !is_textual_null(id)) else {
                output.push(SheetError::Validate(format!("{} is empty", PATIENT_ID_COLUMN), index));
                self.error_index.insert(index);
                continue;
            };
            if let Some(first) = first_seen.get(id) {
                output.push(SheetError::Validate(
                    format!("{} '{}' repeats row {}", PATIENT_ID_COLUMN, id, first),
                    index,
                ));
                self.error_index.insert(index);
            } else {
                first_seen.insert(id, index);
            }
        }

        if output.len() > 0 {SheetError::Aggregate(output)} else {SheetError::None}
    }

    fn convert(&self) -> RawTable {
        let rows = self
            .data
            .rows
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.error_index.contains(index))
            .map(|(_, row)| row.clone())
            .collect();

        RawTable {
            columns: self.data.columns.clone(),
            rows,
        }
    }
}
