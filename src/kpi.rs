use serde::Serialize;

use crate::filters::{distinct_patients, FilterOutcome};
use crate::model::{Field, Flag, PatientRecord};

pub const STATUS_PENDING: &str = "PENDIENTE";
pub const STATUS_DONE: &str = "REALIZADO";
pub const STATUS_SCHEDULED: &str = "PROGRAMADO";
/// Prefix of the result value written while the lab report is outstanding.
pub const PENDING_REPORT_PREFIX: &str = "PENDIENTE";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Kpis {
    pub distinct_patients: usize,
    pub total_records: usize,
    pub pending: usize,
    pub done: usize,
    pub scheduled: usize,
    pub sent_abroad: usize,
    pub pending_reports: usize,
}

fn count_status(table: &[PatientRecord], status: &str) -> usize {
    table
        .iter()
        .filter(|record| matches!(&record.status, Field::Value(value) if value == status))
        .count()
}

impl Kpis {
    pub fn compute(table: &[PatientRecord]) -> Self {
        Self {
            distinct_patients: distinct_patients(table),
            total_records: table.len(),
            pending: count_status(table, STATUS_PENDING),
            done: count_status(table, STATUS_DONE),
            scheduled: count_status(table, STATUS_SCHEDULED),
            sent_abroad: table.iter().filter(|record| record.sent_abroad == Flag::Yes).count(),
            pending_reports: table
                .iter()
                .filter(|record| {
                    record
                        .result
                        .value()
                        .is_some_and(|result| result.to_uppercase().starts_with(PENDING_REPORT_PREFIX))
                })
                .count(),
        }
    }

    /// KPIs of a filtered view, reusing the count the filter chain produced.
    pub fn for_outcome(outcome: &FilterOutcome) -> Self {
        Self {
            distinct_patients: outcome.distinct_patients,
            ..Self::compute(&outcome.rows)
        }
    }
}
