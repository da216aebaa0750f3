use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::config::EtlConfig;
use crate::ddl::TableKind;
use crate::model::{Sheet, SheetError};
use crate::patient_sheet::PatientSheet;
use crate::phase_sheet::PhaseSheet;
use crate::schema::RawTable;
use crate::store::Store;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TableOutcome {
    Inserted(usize),
    /// The source file could not be read or parsed.
    Skipped(String),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub outcome: TableOutcome,
    pub rejected: usize,
    pub dropped_columns: usize,
}

impl TableReport {
    fn skipped(table: &str, reason: String) -> Self {
        Self {
            table: table.to_string(),
            outcome: TableOutcome::Skipped(reason),
            rejected: 0,
            dropped_columns: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadReport {
    pub patients: TableReport,
    pub phases: TableReport,
}

pub fn run_sheet(
    data: &str,
    sheet: &mut dyn Sheet,
    known_patients: &HashSet<String>,
) -> Result<(RawTable, SheetError), SheetError> {
    sheet.parse(data)?;
    let validation_errors = sheet.validate(known_patients);
    Ok((sheet.convert(), validation_errors))
}

fn read_file_contents(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| {
        tracing::error!(path = %path.display(), "Cannot read source file: {err}");
        format!("cannot read {}: {}", path.display(), err)
    })
}

fn rejected_rows(errors: &SheetError) -> usize {
    match errors {
        SheetError::None => 0,
        SheetError::Aggregate(rows) => rows.len(),
        _ => 1,
    }
}

fn store_table(store: &mut Store, data: &RawTable, table: &str, kind: &TableKind) -> TableOutcome {
    if data.columns.is_empty() {
        tracing::warn!(table, "Sheet has no columns, nothing to insert");
        return TableOutcome::Inserted(0);
    }
    if let Err(err) = store.ensure_table(table, &data.columns, kind) {
        tracing::error!(table, "Cannot create table: {err}");
        return TableOutcome::Failed(err.to_string());
    }
    match store.bulk_insert(table, data) {
        Ok(count) => {
            tracing::info!(table, rows = count, "Inserted rows");
            TableOutcome::Inserted(count)
        }
        Err(err) => {
            tracing::error!(table, "{err}");
            TableOutcome::Failed(err.to_string())
        }
    }
}

fn load_sheet(
    store: &mut Store,
    path: &Path,
    sheet: &mut dyn Sheet,
    known_patients: &HashSet<String>,
    kind: &TableKind,
) -> TableReport {
    let table = sheet.profile().table.clone();
    let data = match read_file_contents(path) {
        Ok(data) => data,
        Err(reason) => return TableReport::skipped(&table, reason),
    };

    let (converted, errors) = match run_sheet(&data, sheet, known_patients) {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(table = %table, path = %path.display(), "Cannot parse source file: {err}");
            return TableReport::skipped(&table, err.to_string());
        }
    };
    if errors != SheetError::None {
        tracing::warn!(table = %table, "{}", serde_json::json!(errors));
    }

    let outcome = store_table(store, &converted, &table, kind);
    TableReport {
        table,
        rejected: rejected_rows(&errors),
        dropped_columns: 0,
        outcome,
    }
}

/// Loads the patient export, then the phase export, into the store. Each
/// table succeeds or fails on its own; a failure never stops the other.
pub fn load(store: &mut Store, config: &EtlConfig) -> LoadReport {
    let mut patient_sheet = PatientSheet::new(store.patient_table(), &config.placeholder_prefix);
    let mut patients = load_sheet(
        store,
        &config.patient_file,
        &mut patient_sheet,
        &HashSet::new(),
        &TableKind::Patients,
    );
    patients.dropped_columns = patient_sheet.dropped_columns;

    // phases may reference patients stored by an earlier load
    let mut known = match patients.outcome {
        TableOutcome::Inserted(_) => patient_sheet.patient_ids(),
        _ => HashSet::new(),
    };
    match store.stored_patient_ids() {
        Ok(stored) => known.extend(stored),
        Err(err) => tracing::error!("Cannot read stored patient identifiers: {err}"),
    }

    let phase_kind = TableKind::Phases {
        patient_table: store.patient_table().to_string(),
    };
    let mut phase_sheet = PhaseSheet::new(store.phase_table(), &config.placeholder_prefix);
    let mut phases = load_sheet(store, &config.phase_file, &mut phase_sheet, &known, &phase_kind);
    phases.dropped_columns = phase_sheet.dropped_columns;

    LoadReport { patients, phases }
}
