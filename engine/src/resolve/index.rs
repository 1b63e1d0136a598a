//! Key → rows indexes for joins and grouping.
//!
//! An index is built once per pass over one `(table, column)` pair and then
//! only read. Keys never need to be unique: each key maps to every row that
//! carries it, in table order. Rows with an empty key are left out since
//! nothing can join to them.

use std::collections::HashMap;

use crate::models::{key_string, Row};

/// Index over one column of one table.
#[derive(Debug, Clone)]
pub struct LookupIndex<'a> {
    column: String,
    entries: HashMap<String, Vec<&'a Row>>,
    indexed_rows: usize,
}

impl<'a> LookupIndex<'a> {
    /// Build the index in one pass over `rows`.
    pub fn build(rows: &'a [Row], column: &str) -> Self {
        let mut entries: HashMap<String, Vec<&'a Row>> = HashMap::new();
        let mut indexed_rows = 0;
        for row in rows {
            if let Some(key) = key_string(row.get(column)) {
                entries.entry(key).or_default().push(row);
                indexed_rows += 1;
            }
        }
        Self {
            column: column.to_string(),
            entries,
            indexed_rows,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// All rows for `key`, in table order; empty when unknown.
    pub fn get(&self, key: &str) -> &[&'a Row] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// First row for `key`.
    pub fn first(&self, key: &str) -> Option<&'a Row> {
        self.get(key).first().copied()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows that made it into the index (non-empty key).
    pub fn indexed_rows(&self) -> usize {
        self.indexed_rows
    }
}

/// The indexes of one resolution pass, keyed by `(table, column)`.
#[derive(Debug, Default)]
pub struct IndexSet<'a> {
    indexes: HashMap<(String, String), LookupIndex<'a>>,
}

impl<'a> IndexSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `rows` under `(table, column)` unless already present.
    pub fn ensure(&mut self, table: &str, column: &str, rows: &'a [Row]) {
        self.indexes
            .entry((table.to_string(), column.to_string()))
            .or_insert_with(|| LookupIndex::build(rows, column));
    }

    pub fn get(&self, table: &str, column: &str) -> Option<&LookupIndex<'a>> {
        self.indexes.get(&(table.to_string(), column.to_string()))
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_duplicate_keys_keep_all_rows_in_order() {
        let table = rows(json!([
            {"DeptID": "D1", "Name": "Alice"},
            {"DeptID": "D2", "Name": "Bob"},
            {"DeptID": "D1", "Name": "Carol"}
        ]));
        let index = LookupIndex::build(&table, "DeptID");
        let names: Vec<_> = index.get("D1").iter().map(|r| r["Name"].clone()).collect();
        assert_eq!(names, vec![json!("Alice"), json!("Carol")]);
        assert_eq!(index.first("D2").unwrap()["Name"], json!("Bob"));
        assert!(index.get("D9").is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_keys_are_excluded() {
        let table = rows(json!([
            {"ID": ""}, {"ID": null}, {"Other": 1}, {"ID": 0}, {"ID": " 7 "}
        ]));
        let index = LookupIndex::build(&table, "ID");
        assert_eq!(index.indexed_rows(), 2);
        assert_eq!(index.get("0").len(), 1);
        assert_eq!(index.get("7").len(), 1);
        assert!(index.get("").is_empty());
    }

    #[test]
    fn test_loose_key_matching() {
        let table = rows(json!([{"ID": 1}, {"ID": "1"}, {"ID": 1.0}]));
        let index = LookupIndex::build(&table, "ID");
        assert_eq!(index.get("1").len(), 3);
    }

    #[test]
    fn test_index_set_builds_once() {
        let table = rows(json!([{"ID": "a"}]));
        let mut set = IndexSet::new();
        set.ensure("T", "ID", &table);
        set.ensure("T", "ID", &[]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("T", "ID").unwrap().indexed_rows(), 1);
        assert!(set.get("T", "Other").is_none());
    }
}
