//! Core types for the document store.

use crate::error::{Result, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Reserved field holding a record's identifier.
pub const ID_FIELD: &str = "id";

/// Store-managed creation timestamp field.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Store-managed modification timestamp field.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Identifier assigned to a record at creation time.
///
/// Generated ids are a base36 millisecond prefix followed by a random
/// base36 suffix. There is no collision check; uniqueness holds only for
/// single-process, human-rate writes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let suffix: u64 = rand::thread_rng().gen_range(0..36u64.pow(9));
        RecordId(format!("{}{:0>9}", to_base36(millis), to_base36(suffix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Wall-clock instant, rendered as ISO-8601 with millisecond precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    /// `2025-03-04T10:15:00.000Z`
    pub fn to_iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// ISO form with `:` and `.` replaced so it can appear in a file name.
    pub fn to_file_safe(&self) -> String {
        self.to_iso().replace([':', '.'], "-")
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_iso())
    }
}

/// A single caller-defined document.
///
/// Field names are opaque to the store apart from `id`, `createdAt` and
/// `updatedAt`, which the store owns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(StoreError::InvalidOperation(format!(
                "record fields must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Whether a soft-delete flag marks this record active. A missing
    /// flag counts as active; only an explicit `false` hides the record.
    pub fn is_active(&self, flag: &str) -> bool {
        !matches!(self.0.get(flag), Some(Value::Bool(false)))
    }

    /// Assign identity and both timestamps.
    pub(crate) fn stamp_created(&mut self, id: &RecordId, now: Timestamp) {
        let iso = now.to_iso();
        self.0.insert(ID_FIELD.to_string(), Value::String(id.0.clone()));
        self.0.insert(CREATED_AT_FIELD.to_string(), Value::String(iso.clone()));
        self.0.insert(UPDATED_AT_FIELD.to_string(), Value::String(iso));
    }

    pub(crate) fn stamp_updated(&mut self, now: Timestamp) {
        self.0
            .insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_iso()));
    }

    /// Shallow-merge `partial` over this record. The id is never reassigned.
    pub(crate) fn merge(&mut self, partial: Map<String, Value>) {
        for (field, value) in partial {
            if field == ID_FIELD {
                continue;
            }
            self.0.insert(field, value);
        }
    }

    /// Fill fields the caller omitted.
    pub(crate) fn apply_defaults(&mut self, defaults: &Map<String, Value>) {
        for (field, value) in defaults {
            if !self.0.contains_key(field) {
                self.0.insert(field.clone(), value.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Definition of a known table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableDef {
    /// Table name as it appears in the document.
    pub name: String,

    /// Boolean field cleared on delete instead of removing the record.
    pub soft_delete_flag: Option<String>,

    /// Field values applied on create when the caller omits them.
    pub defaults: Map<String, Value>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soft_delete_flag: None,
            defaults: Map::new(),
        }
    }

    /// Delete flips `flag` to `false` instead of removing the record.
    /// New records default the flag to `true`.
    pub fn soft_delete(mut self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        self.defaults.insert(flag.clone(), Value::Bool(true));
        self.soft_delete_flag = Some(flag);
        self
    }

    pub fn with_default(mut self, field: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(field.into(), value);
        self
    }
}

/// Tables used by the hours/absence/mileage application.
pub fn default_tables() -> Vec<TableDef> {
    vec![
        TableDef::new("werknemers")
            .soft_delete("actief")
            .with_default("vakantiedagenTotaal", Value::from(20))
            .with_default("vakantiedagenOpgenomen", Value::from(0)),
        TableDef::new("uren"),
        TableDef::new("urenregistraties"),
        TableDef::new("afwezigheden"),
        TableDef::new("kilometers"),
        TableDef::new("maandKmStanden"),
        TableDef::new("dagontvangsten"),
        TableDef::new("gratisCola"),
    ]
}

/// Why a load refused to adopt the on-disk document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefusalCause {
    /// The file exists but does not parse.
    Corruption(String),
    /// The file exists but could not be read.
    Unreadable(String),
}

/// Which path `Store::open` took when loading the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file existed; empty tables were written.
    Created,
    /// Every known table was present and well-formed.
    Clean,
    /// Parsed, but these tables were missing or malformed and were reset to empty.
    Healed { tables: Vec<String> },
    /// The on-disk file was left untouched and memory starts empty.
    Refused {
        cause: RefusalCause,
        /// Sibling `.backup.<ts>` copy of the refused file, if one could be made.
        corrupt_copy: Option<PathBuf>,
    },
}

/// Counters for physical writes of the document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Successful writes.
    pub writes: u64,
    /// Writes that returned an error.
    pub failures: u64,
    /// Size in bytes of the last successful write.
    pub last_size: u64,
}

/// Result of `Store::upsert`.
#[derive(Clone, Debug, PartialEq)]
pub enum UpsertOutcome {
    Created(Record),
    Updated(Record),
}

impl UpsertOutcome {
    pub fn record(&self) -> &Record {
        match self {
            UpsertOutcome::Created(r) | UpsertOutcome::Updated(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}
