use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Entry;

/// A named mapping from keys to entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub items: HashMap<String, Entry>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: HashMap::new(),
        }
    }

    /// Drops every entry that is not live at `now`. Returns how many were removed.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|_, entry| entry.is_live(now));
        before - self.items.len()
    }

    /// Linear scan for the first entry whose value field equals `value`.
    pub fn find(&self, field: &str, value: &Value) -> Option<&Entry> {
        self.items.values().find(|entry| entry.matches(field, value))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The full in-memory snapshot. This is the unit written to and read from
/// the backing file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    #[serde(default)]
    pub tables: HashMap<String, Table>,
}

impl StoreImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table, creating it first if needed. The flag reports
    /// whether it was created.
    pub fn table_mut(&mut self, name: &str) -> (&mut Table, bool) {
        let created = !self.tables.contains_key(name);
        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Table::new(name));
        (table, created)
    }

    /// Empties the named table, or every table when `name` is `None`.
    pub fn clear(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                if let Some(table) = self.tables.get_mut(name) {
                    table.items.clear();
                }
            }
            None => {
                for table in self.tables.values_mut() {
                    table.items.clear();
                }
            }
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}
