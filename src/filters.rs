use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;

use crate::model::{Choice, Field, PatientRecord};

pub type StatusChoice = Choice<Field<String>>;
pub type BracketChoice = Choice<BTreeSet<Field<String>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateBounds {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterNotice {
    /// Every received date in the working table is the same day.
    SingleReceivedDate(NaiveDate),
    NoValidReceivedDates,
}

/// One conjunct of the filtered view.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Status(Field<String>),
    AgeBrackets(BTreeSet<Field<String>>),
    /// Inclusive on both ends. Rows without a received date never match.
    Received { from: NaiveDate, to: NaiveDate },
}

impl Predicate {
    pub fn matches(&self, record: &PatientRecord) -> bool {
        match self {
            Predicate::Status(status) => record.status == *status,
            Predicate::AgeBrackets(brackets) => brackets.contains(&record.age_bracket),
            Predicate::Received { from, to } => match record.received_date {
                Field::Value(date) => *from <= date && date <= *to,
                Field::NoData => false,
            },
        }
    }
}

pub fn apply_predicates(table: &[PatientRecord], predicates: &[Predicate]) -> Vec<PatientRecord> {
    table
        .iter()
        .filter(|record| predicates.iter().all(|predicate| predicate.matches(record)))
        .cloned()
        .collect()
}

/// The operator side of the filter chain. Each method receives the options
/// computed from the table as narrowed by the filters before it.
pub trait FilterSurface {
    fn choose_status(&mut self, options: &[StatusChoice]) -> StatusChoice;
    fn choose_age_brackets(&mut self, options: &[Choice<Field<String>>]) -> BracketChoice;
    fn choose_received_range(&mut self, bounds: DateBounds) -> (NaiveDate, NaiveDate);
    fn notice(&mut self, notice: FilterNotice);
}

fn with_all<T: Ord + Clone>(values: impl Iterator<Item = T>) -> Vec<Choice<T>> {
    let distinct: BTreeSet<T> = values.collect();
    std::iter::once(Choice::All)
        .chain(distinct.into_iter().map(Choice::Only))
        .collect()
}

pub fn status_options(table: &[PatientRecord]) -> Vec<StatusChoice> {
    with_all(table.iter().map(|record| record.status.clone()))
}

/// "No data" is offered like any other bracket.
pub fn age_bracket_options(table: &[PatientRecord]) -> Vec<Choice<Field<String>>> {
    with_all(table.iter().map(|record| record.age_bracket.clone()))
}

pub fn received_bounds(table: &[PatientRecord]) -> Option<DateBounds> {
    let mut dates = table.iter().filter_map(|record| record.received_date.value().copied());
    let first = dates.next()?;
    let (min, max) = dates.fold((first, first), |(min, max), date| (min.min(date), max.max(date)));
    Some(DateBounds { min, max })
}

pub fn distinct_patients(table: &[PatientRecord]) -> usize {
    table.iter().map(|record| record.patient_id.as_str()).collect::<HashSet<_>>().len()
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    pub rows: Vec<PatientRecord>,
    pub distinct_patients: usize,
}

/// Runs status, age bracket and received-date filters in that order over a
/// copy of `table`.
pub fn run_filter_chain(table: &[PatientRecord], surface: &mut dyn FilterSurface) -> FilterOutcome {
    let mut working: Vec<PatientRecord> = table.to_vec();

    if let Choice::Only(status) = surface.choose_status(&status_options(&working)) {
        working = apply_predicates(&working, &[Predicate::Status(status)]);
    }

    if let Choice::Only(brackets) = surface.choose_age_brackets(&age_bracket_options(&working)) {
        working = apply_predicates(&working, &[Predicate::AgeBrackets(brackets)]);
    }

    match received_bounds(&working) {
        None => {
            tracing::warn!("No valid received dates, date filter skipped");
            surface.notice(FilterNotice::NoValidReceivedDates);
        }
        Some(bounds) if bounds.min == bounds.max => {
            surface.notice(FilterNotice::SingleReceivedDate(bounds.min));
        }
        Some(bounds) => {
            let (from, to) = surface.choose_received_range(bounds);
            working = apply_predicates(&working, &[Predicate::Received { from, to }]);
        }
    }

    let distinct_patients = distinct_patients(&working);
    tracing::debug!(rows = working.len(), distinct_patients, "Filter chain applied");
    FilterOutcome { rows: working, distinct_patients }
}

/// Selections fixed up front, e.g. from command-line flags.
#[derive(Clone, Debug, PartialEq)]
pub struct PresetSelections {
    pub status: StatusChoice,
    pub age_brackets: BracketChoice,
    /// `None` keeps the full range offered.
    pub received: Option<(NaiveDate, NaiveDate)>,
    pub notices: Vec<FilterNotice>,
}

impl Default for PresetSelections {
    fn default() -> Self {
        Self {
            status: Choice::All,
            age_brackets: Choice::All,
            received: None,
            notices: Vec::new(),
        }
    }
}

impl PresetSelections {
    #[cfg(test)]
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        if let Choice::Only(status) = &self.status {
            predicates.push(Predicate::Status(status.clone()));
        }
        if let Choice::Only(brackets) = &self.age_brackets {
            predicates.push(Predicate::AgeBrackets(brackets.clone()));
        }
        if let Some((from, to)) = self.received {
            predicates.push(Predicate::Received { from, to });
        }
        predicates
    }
}

impl FilterSurface for PresetSelections {
    fn choose_status(&mut self, _options: &[StatusChoice]) -> StatusChoice {
        self.status.clone()
    }

    fn choose_age_brackets(&mut self, _options: &[Choice<Field<String>>]) -> BracketChoice {
        self.age_brackets.clone()
    }

    fn choose_received_range(&mut self, bounds: DateBounds) -> (NaiveDate, NaiveDate) {
        self.received.unwrap_or((bounds.min, bounds.max))
    }

    fn notice(&mut self, notice: FilterNotice) {
        self.notices.push(notice);
    }
}
