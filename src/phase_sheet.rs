use std::collections::HashSet;

use crate::model::{Sheet, SheetError};
use crate::reconcile::find_orphans;
use crate::schema::{normalize_table, read_sheet, RawTable, TableProfile, PHASE_FK_COLUMN};

pub struct PhaseSheet {
    pub profile: TableProfile,
    pub placeholder_prefix: String,
    pub data: RawTable,
    pub dropped_columns: usize,
    pub error_index: HashSet<usize>,
}

impl PhaseSheet {
    pub fn new(table: &str, placeholder_prefix: &str) -> Self {
        Self {
            profile: TableProfile::phases(table),
            placeholder_prefix: placeholder_prefix.to_string(),
            data: RawTable::default(),
            dropped_columns: 0,
            error_index: HashSet::new(),
        }
    }
}

impl Sheet for PhaseSheet {
    fn profile(&self) -> &TableProfile {
        &self.profile
    }

    fn parse(&mut self, data: &str) -> Result<(), SheetError> {
        let normalized = normalize_table(read_sheet(data)?, &self.profile, &self.placeholder_prefix);
        if !normalized.table.has_column(PHASE_FK_COLUMN) {
            tracing::warn!(table = %self.profile.table, "No {} column after normalization", PHASE_FK_COLUMN);
        }
        self.data = normalized.table;
        self.dropped_columns = normalized.dropped_columns;
        Ok(())
    }

    /// Orphan rows are rejected here rather than left to the store's constraint.
    fn validate(&mut self, known_patients: &HashSet<String>) -> SheetError {
        let mut output = Vec::new();
        for orphan in find_orphans(&self.data, known_patients) {
            let message = match &orphan.patient_id {
                Some(id) => format!("{} '{}' does not exist among loaded patients", PHASE_FK_COLUMN, id),
                None => format!("{} column is missing", PHASE_FK_COLUMN),
            };
            output.push(SheetError::Validate(message, orphan.row));
            self.error_index.insert(orphan.row);
        }

        if output.len() > 0 {
            tracing::warn!(
                table = %self.profile.table,
                discarded = output.len(),
                "Skipped rows whose {} has no matching patient",
                PHASE_FK_COLUMN
            );
            SheetError::Aggregate(output)
        } else {
            SheetError::None
        }
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
