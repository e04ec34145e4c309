//! Post-hoc filtering and sorting of table contents.

use crate::types::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over a single record.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `field` equals `value` exactly (foreign key, type, year, ...).
    Equals { field: String, value: Value },
    /// The date in `field` falls in `month` (`YYYY-MM`).
    Month { field: String, month: String },
    /// Hide records whose soft-delete `flag` is `false`.
    Active { flag: String },
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Equals { field, value } => record.get(field) == Some(value),
            Filter::Month { field, month } => record
                .get(field)
                .and_then(Value::as_str)
                .and_then(month_bucket)
                .is_some_and(|bucket| &bucket == month),
            Filter::Active { flag } => record.is_active(flag),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Sort {
    Asc(String),
    Desc(String),
}

/// Filters plus sort keys, applied to a copy of a table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    /// Compared in order; later keys break ties of earlier ones.
    sort: Vec<Sort>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Equals {
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn month(self, field: impl Into<String>, month: impl Into<String>) -> Self {
        self.filter(Filter::Month {
            field: field.into(),
            month: month.into(),
        })
    }

    pub fn active(self, flag: impl Into<String>) -> Self {
        self.filter(Filter::Active { flag: flag.into() })
    }

    /// Newest/largest first. Dates compare chronologically, numbers numerically.
    /// Chained calls add tie-breaking keys: `.sort_desc("jaar").sort_desc("maand")`.
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(Sort::Desc(field.into()));
        self
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(Sort::Asc(field.into()));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Run the query over `records`, returning owned copies.
    pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();

        if !self.sort.is_empty() {
            out.sort_by(|a, b| self.compare(a, b));
        }
        out
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.sort
            .iter()
            .map(|key| match key {
                Sort::Asc(field) => compare_field(a, b, field, false),
                Sort::Desc(field) => compare_field(a, b, field, true),
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

/// `YYYY-MM` of a date (`2025-03-04`) or ISO datetime string, taken from
/// the date as written. An offset never moves a value into another month.
pub(crate) fn month_bucket(s: &str) -> Option<String> {
    let written = match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.naive_local(),
        Err(_) => parse_date(s)?,
    };
    Some(written.format("%Y-%m").to_string())
}

// Chronological instant; offset datetimes are normalized to UTC.
fn parse_date(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    let day = s.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[derive(PartialEq, PartialOrd)]
enum SortKey {
    Number(f64),
    Date(NaiveDateTime),
    Text(String),
}

fn sort_key(value: Option<&Value>) -> Option<SortKey> {
    match value? {
        Value::Number(n) => n.as_f64().map(SortKey::Number),
        Value::String(s) => Some(match parse_date(s) {
            Some(dt) => SortKey::Date(dt),
            None => SortKey::Text(s.clone()),
        }),
        Value::Bool(b) => Some(SortKey::Number(if *b { 1.0 } else { 0.0 })),
        _ => None,
    }
}

// Records missing the field sort after those that have it.
fn compare_field(a: &Record, b: &Record, field: &str, descending: bool) -> Ordering {
    match (sort_key(a.get(field)), sort_key(b.get(field))) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
