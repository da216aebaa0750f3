use chrono::{NaiveDate, TimeDelta};

use crate::model::{is_textual_null, Field, Flag, MonthName, PatientRecord};
use crate::store::{Capabilities, MONTH_COLUMN, RECEIVED_DATE_COLUMN, SAMPLE_DATE_COLUMN, SENT_ABROAD_COLUMN};

/// Spreadsheet day zero. Serial 1 is 1899-12-31.
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
/// Range of calendar dates a serial day count may resolve to; anything
/// outside is treated as a malformed value.
const MIN_DATE: (i32, u32, u32) = (1677, 9, 22);
const MAX_DATE: (i32, u32, u32) = (2262, 4, 11);

const TEXT_DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

/// One row of the left-outer join as it comes out of the store, before any
/// derivation. Phase columns are `None` when the patient has no phase row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchedRow {
    pub patient_id: String,
    pub name: Option<String>,
    pub physician: Option<String>,
    pub received_date: Option<String>,
    pub status: Option<String>,
    pub has_phase: bool,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub age_bracket: Option<String>,
    pub sample_date: Option<String>,
    pub month: Option<String>,
    pub department: Option<String>,
    pub city: Option<String>,
    pub insurer: Option<String>,
    pub result: Option<String>,
    pub sent_abroad: Option<String>,
}

/// Numeric coercion: anything that is not a finite number is missing.
pub fn coerce_number(raw: &str) -> Option<f64> {
    if is_textual_null(raw) {
        return None;
    }
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn ymd((year, month, day): (i32, u32, u32)) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn serial_to_date(serial: f64) -> Field<NaiveDate> {
    if !serial.is_finite() {
        return Field::NoData;
    }
    let days = serial.floor();
    if days.abs() > i32::MAX as f64 {
        return Field::NoData;
    }

    let date = ymd(SERIAL_EPOCH)
        .zip(TimeDelta::try_days(days as i64))
        .and_then(|(epoch, delta)| epoch.checked_add_signed(delta));
    match (date, ymd(MIN_DATE), ymd(MAX_DATE)) {
        (Some(date), Some(min), Some(max)) if date >= min && date <= max => Field::Value(date),
        _ => Field::NoData,
    }
}

/// Serial-date repair. Already repaired values pass through unchanged, so
/// applying the repair twice gives the same result as applying it once.
pub trait RepairDate {
    fn repair_date(self) -> Field<NaiveDate>;
}

impl RepairDate for Option<&str> {
    fn repair_date(self) -> Field<NaiveDate> {
        match self.and_then(coerce_number) {
            Some(serial) => serial_to_date(serial),
            None => Field::NoData,
        }
    }
}

impl RepairDate for &str {
    fn repair_date(self) -> Field<NaiveDate> {
        Some(self).repair_date()
    }
}

impl RepairDate for Field<NaiveDate> {
    fn repair_date(self) -> Field<NaiveDate> {
        self
    }
}

/// Calendar date from any of the encodings seen in the received-date column:
/// ISO dates or datetimes, day-first slashed dates, or serial day counts.
pub fn parse_calendar_date(raw: Option<&str>) -> Field<NaiveDate> {
    let Some(text) = raw.map(str::trim).filter(|text| !is_textual_null(text)) else {
        return Field::NoData;
    };

    if let Some(serial) = coerce_number(text) {
        if let Field::Value(date) = serial_to_date(serial) {
            return Field::Value(date);
        }
    }
    if let Some(date) = iso8601::date(text).ok().and_then(|date| NaiveDate::try_from(date).ok()) {
        return Field::Value(date);
    }
    for format in TEXT_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Field::Value(date);
        }
    }

    Field::NoData
}

pub fn decode_month(raw: Option<&str>) -> Field<MonthName> {
    let Some(number) = raw.and_then(coerce_number) else {
        return Field::NoData;
    };
    if number.fract() != 0.0 || !(1.0..=12.0).contains(&number) {
        return Field::NoData;
    }
    MonthName::from_number(number as u8).into()
}

/// Only an explicit true (the literal `true` in any case, or the integer 1
/// a store uses for a true bit) becomes [`Flag::Yes`]. Everything else,
/// including unknown values, is [`Flag::No`].
pub fn normalize_flag(raw: Option<&str>) -> Flag {
    match raw.map(str::trim) {
        Some(text) if text.eq_ignore_ascii_case("true") || text == "1" => Flag::Yes,
        _ => Flag::No,
    }
}

fn parse_age(raw: Option<&str>) -> Field<u32> {
    match raw.and_then(coerce_number) {
        Some(age) if age >= 0.0 && age < u32::MAX as f64 => Field::Value(age.trunc() as u32),
        _ => Field::NoData,
    }
}

/// Phase-derived text field: `NoData` whenever the patient has no phase row.
fn phase_text(row: &FetchedRow, value: &Option<String>) -> Field<String> {
    if !row.has_phase {
        return Field::NoData;
    }
    Field::from_text(value.as_deref())
}

pub fn derive_record(row: FetchedRow, caps: &Capabilities) -> PatientRecord {
    let sample_date = if caps.has(SAMPLE_DATE_COLUMN) && row.has_phase {
        row.sample_date.as_deref().repair_date()
    } else {
        Field::NoData
    };
    let month = if caps.has(MONTH_COLUMN) && row.has_phase {
        decode_month(row.month.as_deref())
    } else {
        Field::NoData
    };
    let sent_abroad = if caps.has(SENT_ABROAD_COLUMN) && row.has_phase {
        normalize_flag(row.sent_abroad.as_deref())
    } else {
        Flag::No
    };
    let received_date = if caps.has(RECEIVED_DATE_COLUMN) {
        parse_calendar_date(row.received_date.as_deref())
    } else {
        Field::NoData
    };
    let age = if row.has_phase { parse_age(row.age.as_deref()) } else { Field::NoData };

    PatientRecord {
        name: Field::from_text(row.name.as_deref()),
        physician: Field::from_text(row.physician.as_deref()),
        status: Field::from_text(row.status.as_deref()),
        gender: phase_text(&row, &row.gender),
        age_bracket: phase_text(&row, &row.age_bracket),
        department: phase_text(&row, &row.department),
        city: phase_text(&row, &row.city),
        insurer: phase_text(&row, &row.insurer),
        result: phase_text(&row, &row.result),
        has_phase: row.has_phase,
        received_date,
        sample_date,
        month,
        age,
        sent_abroad,
        patient_id: row.patient_id,
    }
}

/// Turns the raw join output into the working table.
pub fn derive_table(rows: Vec<FetchedRow>, caps: &Capabilities) -> Vec<PatientRecord> {
    let table: Vec<PatientRecord> = rows.into_iter().map(|row| derive_record(row, caps)).collect();
    let without_phase = table.iter().filter(|record| !record.has_phase).count();
    tracing::debug!(rows = table.len(), without_phase, "Derived working table");
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn full_caps() -> Capabilities {
        Capabilities::all()
    }

    #[test]
    fn serial_date_conversion() {
        assert_eq!("45200".repair_date(), Field::Value(date(2023, 10, 1)));
        assert_eq!("1".repair_date(), Field::Value(date(1899, 12, 31)));
        assert_eq!("45200.75".repair_date(), Field::Value(date(2023, 10, 1)));
        assert_eq!("N/A".repair_date(), Field::NoData);
        assert_eq!("None".repair_date(), Field::NoData);
        assert_eq!("abc".repair_date(), Field::NoData);
        assert_eq!("inf".repair_date(), Field::NoData);
        assert_eq!("20241015".repair_date(), Field::NoData);
        assert_eq!(Option::<&str>::None.repair_date(), Field::NoData);
    }

    #[test]
    fn date_repair_is_idempotent() {
        for raw in ["45200", "N/A", "", "-5", "99999999", "12.5"] {
            let once = raw.repair_date();
            assert_eq!(once.clone().repair_date(), once, "{raw:?}");
        }
    }

    #[test]
    fn received_date_encodings() {
        assert_eq!(parse_calendar_date(Some("2024-10-15")), Field::Value(date(2024, 10, 15)));
        assert_eq!(parse_calendar_date(Some("2024-10-15 00:00:00")), Field::Value(date(2024, 10, 15)));
        assert_eq!(parse_calendar_date(Some("2024-10-15T08:30:00")), Field::Value(date(2024, 10, 15)));
        assert_eq!(parse_calendar_date(Some("15/10/2024")), Field::Value(date(2024, 10, 15)));
        assert_eq!(parse_calendar_date(Some("05/10/2024")), Field::Value(date(2024, 10, 5)));
        assert_eq!(parse_calendar_date(Some("45200")), Field::Value(date(2023, 10, 1)));
        assert_eq!(parse_calendar_date(Some("20241015")), Field::Value(date(2024, 10, 15)));
        assert_eq!(parse_calendar_date(Some("mañana")), Field::NoData);
        assert_eq!(parse_calendar_date(Some("NaT")), Field::NoData);
        assert_eq!(parse_calendar_date(None), Field::NoData);
    }

    #[test]
    fn month_decode_is_bijective_on_valid_numbers() {
        let names: Vec<String> = (1..=12).map(|n| decode_month(Some(n.to_string().as_str())).label()).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 12);
        assert_eq!(names[0], "ENERO");
        assert_eq!(names[9], "OCTUBRE");
        assert_eq!(decode_month(Some("10.0")).label(), "OCTUBRE");
        for raw in ["0", "13", "-1", "2.5", "octubre", ""] {
            assert_eq!(decode_month(Some(raw)), Field::NoData, "{raw:?}");
        }
        assert_eq!(decode_month(None), Field::NoData);
    }

    #[test]
    fn flag_normalization_is_total() {
        assert_eq!(normalize_flag(Some("True")), Flag::Yes);
        assert_eq!(normalize_flag(Some("TRUE")), Flag::Yes);
        assert_eq!(normalize_flag(Some("1")), Flag::Yes);
        for raw in [Some("False"), Some("0"), Some(""), Some("SI"), Some("yes"), Some("2"), None] {
            assert_eq!(normalize_flag(raw), Flag::No, "{raw:?}");
        }
    }

    #[test]
    fn patient_without_phase_gets_no_data() {
        let row = FetchedRow {
            patient_id: "300".into(),
            name: Some("Marta".into()),
            status: Some("PENDIENTE".into()),
            received_date: Some("2024-10-02".into()),
            has_phase: false,
            ..Default::default()
        };
        let record = derive_record(row, &full_caps());
        assert_eq!(record.gender, Field::NoData);
        assert_eq!(record.age, Field::NoData);
        assert_eq!(record.age_bracket, Field::NoData);
        assert_eq!(record.sample_date, Field::NoData);
        assert_eq!(record.month, Field::NoData);
        assert_eq!(record.department, Field::NoData);
        assert_eq!(record.city, Field::NoData);
        assert_eq!(record.insurer, Field::NoData);
        assert_eq!(record.result, Field::NoData);
        assert_eq!(record.sent_abroad, Flag::No);
        assert_eq!(record.status, Field::Value("PENDIENTE".into()));
        assert_eq!(record.received_date, Field::Value(date(2024, 10, 2)));
    }

    #[test]
    fn phase_row_is_derived() {
        let row = FetchedRow {
            patient_id: "100".into(),
            has_phase: true,
            age: Some("34".into()),
            age_bracket: Some("18-30".into()),
            sample_date: Some("45200".into()),
            month: Some("10".into()),
            sent_abroad: Some("True".into()),
            result: Some("PENDIENTE REPORTE".into()),
            ..Default::default()
        };
        let record = derive_record(row, &full_caps());
        assert_eq!(record.age, Field::Value(34));
        assert_eq!(record.sample_date, Field::Value(date(2023, 10, 1)));
        assert_eq!(record.month.label(), "OCTUBRE");
        assert_eq!(record.sent_abroad, Flag::Yes);
        assert_eq!(record.gender, Field::NoData);
    }

    #[test]
    fn absent_columns_skip_their_step() {
        let row = FetchedRow {
            patient_id: "100".into(),
            has_phase: true,
            sample_date: Some("45200".into()),
            month: Some("10".into()),
            sent_abroad: Some("1".into()),
            ..Default::default()
        };
        let record = derive_record(row, &Capabilities::default());
        assert_eq!(record.sample_date, Field::NoData);
        assert_eq!(record.month, Field::NoData);
        assert_eq!(record.sent_abroad, Flag::No);
    }
}
