use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use chrono::{Month, NaiveDate};

use crate::schema::{RawTable, TableProfile};

pub const NO_DATA_LABEL: &str = "SIN DATOS";
pub const ALL_LABEL: &str = "Todos";

/// Tokens the spreadsheet export and the store use for an empty cell.
const TEXTUAL_NULLS: [&str; 7] = ["", "NONE", "NAN", "NAT", "NULL", "N/A", "<NA>"];

pub fn is_textual_null(value: &str) -> bool {
    let upper = value.trim().to_uppercase();
    TEXTUAL_NULLS.contains(&upper.as_str())
}

/// A derived value that is either known or explicitly "no data".
///
/// `NoData` sorts after every value so it is always the last option offered.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field<T> {
    Value(T),
    NoData,
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(value) => Some(value),
            Field::NoData => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Value(value),
            None => Field::NoData,
        }
    }
}

impl Field<String> {
    pub fn from_text(raw: Option<&str>) -> Self {
        match raw {
            Some(text) if !is_textual_null(text) => Field::Value(text.trim().to_string()),
            _ => Field::NoData,
        }
    }
}

impl<T: fmt::Display> Field<T> {
    pub fn label(&self) -> String {
        match self {
            Field::Value(value) => value.to_string(),
            Field::NoData => NO_DATA_LABEL.to_string(),
        }
    }
}

/// An operator selection: either no restriction or a concrete value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Choice<T> {
    All,
    Only(T),
}

impl<T: fmt::Display> Choice<Field<T>> {
    pub fn label(&self) -> String {
        match self {
            Choice::All => ALL_LABEL.to_string(),
            Choice::Only(field) => field.label(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Flag {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
}

const MONTH_NAMES: [&str; 12] = [
    "ENERO", "FEBRERO", "MARZO", "ABRIL", "MAYO", "JUNIO",
    "JULIO", "AGOSTO", "SEPTIEMBRE", "OCTUBRE", "NOVIEMBRE", "DICIEMBRE",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthName(Month);

impl MonthName {
    pub fn from_number(number: u8) -> Option<Self> {
        Month::try_from(number).ok().map(MonthName)
    }

    pub fn name(&self) -> &'static str {
        MONTH_NAMES[self.0.number_from_month() as usize - 1]
    }
}

impl fmt::Display for MonthName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the patient / phase left-outer join after derivation.
#[derive(Clone, Debug, PartialEq)]
pub struct PatientRecord {
    pub patient_id: String,
    pub name: Field<String>,
    pub physician: Field<String>,
    pub received_date: Field<NaiveDate>,
    pub status: Field<String>,
    pub has_phase: bool,
    pub gender: Field<String>,
    pub age: Field<u32>,
    pub age_bracket: Field<String>,
    pub sample_date: Field<NaiveDate>,
    pub month: Field<MonthName>,
    pub department: Field<String>,
    pub city: Field<String>,
    pub insurer: Field<String>,
    pub result: Field<String>,
    pub sent_abroad: Flag,
}

/// Text rendering of a [`PatientRecord`], used for the table view and CSV export.
#[derive(Clone, Debug, Serialize)]
pub struct DisplayRow {
    #[serde(rename = "CEDULA")]
    pub patient_id: String,
    #[serde(rename = "NOMBRE")]
    pub name: String,
    #[serde(rename = "NOMBRE_MEDICO")]
    pub physician: String,
    #[serde(rename = "GENERO")]
    pub gender: String,
    #[serde(rename = "EDAD")]
    pub age: String,
    #[serde(rename = "RANGO_DE_EDAD")]
    pub age_bracket: String,
    #[serde(rename = "FECHA_DE_RECIBIDO")]
    pub received_date: String,
    #[serde(rename = "FECHA_TOMA_MUESTRA")]
    pub sample_date: String,
    #[serde(rename = "ESTADO")]
    pub status: String,
    #[serde(rename = "MES")]
    pub month: String,
    #[serde(rename = "DEPARTAMENTO")]
    pub department: String,
    #[serde(rename = "CIUDAD")]
    pub city: String,
    #[serde(rename = "EPS")]
    pub insurer: String,
    #[serde(rename = "RESULTADOS_TMZ")]
    pub result: String,
    #[serde(rename = "MUESTRA_ENVIADA_A_ESPAÑA")]
    pub sent_abroad: Flag,
}

impl From<&PatientRecord> for DisplayRow {
    fn from(record: &PatientRecord) -> Self {
        Self {
            patient_id: record.patient_id.clone(),
            name: record.name.label(),
            physician: record.physician.label(),
            gender: record.gender.label(),
            age: record.age.label(),
            age_bracket: record.age_bracket.label(),
            received_date: record.received_date.label(),
            sample_date: record.sample_date.label(),
            status: record.status.label(),
            month: record.month.label(),
            department: record.department.label(),
            city: record.city.label(),
            insurer: record.insurer.label(),
            result: record.result.label(),
            sent_abroad: record.sent_abroad,
        }
    }
}

#[derive(Clone, Serialize, Eq, PartialEq, Debug, thiserror::Error)]
pub enum SheetError {
    #[error("no issues")]
    None,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("row {1}: {0}")]
    Validate(String, usize),
    #[error("{} rows rejected", .0.len())]
    Aggregate(Vec<SheetError>),
}

/// A spreadsheet export that is parsed, checked and turned into a loadable table.
pub trait Sheet {
    fn profile(&self) -> &TableProfile;
    fn parse(&mut self, data: &str) -> Result<(), SheetError>;
    /// Rejects rows that cannot be stored. `known_patients` holds every
    /// identifier the patient table will contain after the load.
    fn validate(&mut self, known_patients: &HashSet<String>) -> SheetError;
    fn convert(&self) -> RawTable;
}
