//! Table storage and CRUD semantics.

use crate::types::{Record, RecordId, TableDef, Timestamp, UpsertOutcome};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// What `Tables::delete` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was physically removed.
    Removed,
    /// The record's soft-delete flag was cleared.
    Deactivated,
    /// No such record, or it was already inactive.
    Unchanged,
}

impl DeleteOutcome {
    pub fn changed(self) -> bool {
        self != DeleteOutcome::Unchanged
    }
}

/// All tables, keyed by name.
///
/// Every known table always maps to a sequence. Top-level document keys
/// that are not arrays and not known tables are carried through
/// untouched so that a save never drops them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tables {
    tables: BTreeMap<String, Vec<Record>>,
    defs: BTreeMap<String, TableDef>,
    extra: Map<String, Value>,
}

impl Tables {
    /// Empty sequences for every known table.
    pub fn new(defs: &[TableDef]) -> Self {
        let mut tables = BTreeMap::new();
        let mut by_name = BTreeMap::new();
        for def in defs {
            tables.insert(def.name.clone(), Vec::new());
            by_name.insert(def.name.clone(), def.clone());
        }
        Self {
            tables,
            defs: by_name,
            extra: Map::new(),
        }
    }

    /// Rebuild tables from a parsed document.
    ///
    /// Returns the tables plus the names of tables that had to be reset
    /// or had malformed rows dropped.
    pub fn from_document(document: Value, defs: &[TableDef]) -> (Self, Vec<String>) {
        let mut tables = Self::new(defs);
        let mut healed = Vec::new();

        let map = match document {
            Value::Object(map) => map,
            _ => {
                healed.extend(tables.defs.keys().cloned());
                return (tables, healed);
            }
        };

        for name in tables.defs.keys() {
            if !map.contains_key(name) {
                healed.push(name.clone());
            }
        }

        for (name, value) in map {
            match value {
                Value::Array(rows) => {
                    let total = rows.len();
                    let records: Vec<Record> = rows
                        .into_iter()
                        .filter_map(|row| Record::from_value(row).ok())
                        .collect();
                    if records.len() != total {
                        healed.push(name.clone());
                    }
                    tables.tables.insert(name, records);
                }
                other => {
                    if tables.defs.contains_key(&name) {
                        healed.push(name);
                    } else {
                        tables.extra.insert(name, other);
                    }
                }
            }
        }

        healed.sort();
        healed.dedup();
        (tables, healed)
    }

    /// Serialize to the on-disk document shape.
    pub fn to_document(&self) -> Value {
        let mut map = self.extra.clone();
        for (name, records) in &self.tables {
            let rows = records.iter().cloned().map(Record::into_value).collect();
            map.insert(name.clone(), Value::Array(rows));
        }
        Value::Object(map)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Records of a table in insertion order; empty for unknown tables.
    pub fn get(&self, table: &str) -> &[Record] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, table: &str, id: &str) -> Option<&Record> {
        self.get(table).iter().find(|r| r.id() == Some(id))
    }

    /// Append a new record, creating the table if needed.
    pub fn create(&mut self, table: &str, mut fields: Record, now: Timestamp) -> Record {
        if let Some(def) = self.defs.get(table) {
            fields.apply_defaults(&def.defaults);
        }
        fields.stamp_created(&RecordId::generate(), now);

        self.tables
            .entry(table.to_string())
            .or_default()
            .push(fields.clone());
        fields
    }

    /// Merge `partial` over the record with `id`. `None` if there is no such record.
    pub fn update(
        &mut self,
        table: &str,
        id: &str,
        partial: Map<String, Value>,
        now: Timestamp,
    ) -> Option<Record> {
        let record = self
            .tables
            .get_mut(table)?
            .iter_mut()
            .find(|r| r.id() == Some(id))?;
        record.merge(partial);
        record.stamp_updated(now);
        Some(record.clone())
    }

    /// Remove or deactivate the record with `id`. Unknown ids are a no-op.
    pub fn delete(&mut self, table: &str, id: &str, now: Timestamp) -> DeleteOutcome {
        let flag = self
            .defs
            .get(table)
            .and_then(|def| def.soft_delete_flag.clone());

        let Some(records) = self.tables.get_mut(table) else {
            return DeleteOutcome::Unchanged;
        };
        let Some(index) = records.iter().position(|r| r.id() == Some(id)) else {
            return DeleteOutcome::Unchanged;
        };

        match flag {
            Some(flag) => {
                let record = &mut records[index];
                if !record.is_active(&flag) {
                    return DeleteOutcome::Unchanged;
                }
                record.set(flag, Value::Bool(false));
                record.stamp_updated(now);
                DeleteOutcome::Deactivated
            }
            None => {
                records.remove(index);
                DeleteOutcome::Removed
            }
        }
    }

    /// Replace a table wholesale. Rows without an id are stamped as new.
    pub fn replace(&mut self, table: &str, records: Vec<Record>, now: Timestamp) -> usize {
        let stamped: Vec<Record> = records
            .into_iter()
            .map(|mut record| {
                if record.id().is_none() {
                    record.stamp_created(&RecordId::generate(), now);
                }
                record
            })
            .collect();
        let count = stamped.len();
        self.tables.insert(table.to_string(), stamped);
        count
    }

    /// Update the first record whose `match_fields` equal those in `fields`,
    /// or create one. With no match fields nothing matches, so a record is
    /// always created.
    pub fn upsert(
        &mut self,
        table: &str,
        match_fields: &[&str],
        fields: Record,
        now: Timestamp,
    ) -> UpsertOutcome {
        if match_fields.is_empty() {
            return UpsertOutcome::Created(self.create(table, fields, now));
        }

        let existing = self.get(table).iter().find(|r| {
            match_fields
                .iter()
                .all(|f| fields.get(f).is_some() && r.get(f) == fields.get(f))
        });

        match existing.and_then(Record::id).map(str::to_string) {
            Some(id) => {
                let partial = fields.fields().clone();
                match self.update(table, &id, partial, now) {
                    Some(record) => UpsertOutcome::Updated(record),
                    None => UpsertOutcome::Created(self.create(table, fields, now)),
                }
            }
            None => UpsertOutcome::Created(self.create(table, fields, now)),
        }
    }

    /// Total records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}
