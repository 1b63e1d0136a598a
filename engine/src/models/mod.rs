//! Domain models for the docbatch engine.
//!
//! - [`Row`] - one flattened table row (column name → scalar)
//! - [`TableSet`] - named tables handed over by the table provider
//! - [`ResolvedRecord`] - flat record ready for rendering, with loop arrays
//! - [`GeneratedArtifact`] - rendered bytes plus naming and provenance
//! - [`ProgressCallback`] - `(completed, total)` reporting hook
//!
//! Also hosts the loose value coercions shared by joins, grouping and
//! aggregation: spreadsheet cells are type-ambiguous, so keys compare as
//! trimmed strings and `1`, `1.0` and `"1"` are the same key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Tables
// =============================================================================

/// A table row: column name to scalar value.
pub type Row = Map<String, Value>;

/// Named tables, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSet {
    tables: BTreeMap<String, Vec<Row>>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(name.into(), rows);
    }

    /// Builder-style [`TableSet::insert`].
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert(name, rows);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[Row]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Row>)> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Column names of a table, in first-seen order across its rows.
    pub fn headers(&self, name: &str) -> Vec<String> {
        let mut headers: Vec<String> = Vec::new();
        for row in self.get(name).unwrap_or_default() {
            for key in row.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }
        headers
    }

    /// Build a table set from a JSON object of `{ name: [rows] }`.
    ///
    /// Non-object rows are skipped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut set = Self::new();
        for (name, rows) in obj {
            let rows = rows
                .as_array()
                .map(|arr| arr.iter().filter_map(|r| r.as_object().cloned()).collect())
                .unwrap_or_default();
            set.insert(name.clone(), rows);
        }
        Some(set)
    }
}

// =============================================================================
// Resolved Records
// =============================================================================

/// The flat output of the mapping pipeline for one primary row or one
/// aggregate group.
///
/// Scalar fields live next to loop arrays (`loopName → [ {field: value} ]`).
/// Records own their values, so changing one never affects another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedRecord {
    fields: Map<String, Value>,
}

impl ResolvedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Stringified scalar value, `None` when missing.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(value_to_string)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Loop children for `key`, if the field is an array.
    pub fn loop_items(&self, key: &str) -> Option<&Vec<Value>> {
        self.fields.get(key).and_then(Value::as_array)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for ResolvedRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// One rendered output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    /// Bytes returned by the rendering engine.
    pub content: Vec<u8>,
    pub file_name: String,
    /// Position of the source record in the batch input.
    pub source_index: usize,
    pub source_record: ResolvedRecord,
}

// =============================================================================
// Progress
// =============================================================================

/// Progress callback: `(completed, total)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

// =============================================================================
// Value coercions
// =============================================================================

/// Stringify a scalar the way a spreadsheet user reads it.
///
/// Integral floats print without a fraction (`3.0` → `"3"`), null is empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Normalized join/group key: trimmed string, `None` when empty or null.
pub fn key_string(value: Option<&Value>) -> Option<String> {
    let key = value_to_string(value?);
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Check if a value is "empty" (null, blank string, empty container).
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Loose numeric reading of a cell.
///
/// Accepts numbers, booleans and numeric strings with thousands separators
/// or a leading currency sign. Anything else is `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches(['$', '€', '£', '¥', '￥'])
                .chars()
                .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// JSON number for `f`, integral values as integers.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
