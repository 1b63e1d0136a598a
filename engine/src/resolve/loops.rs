//! One-to-many relations resolved into lists of sub-records.
//!
//! - `group_by`: rows of the target table (the primary table by default)
//!   whose group column equals the current row's, the current row included.
//! - `lookup`: rows of the side table whose foreign-key column equals the
//!   current row's value of the same column.
//!
//! Both compare one column on both sides, so they share one code path. An
//! index lookup and a linear scan return the same rows in the same order
//! because the index keeps table order per key.

use serde_json::Value;

use super::index::LookupIndex;
use super::{map_fields, CompiledField, Diagnostic};
use crate::models::{key_string, ResolvedRecord, Row};
use crate::scheme::LoopMapping;

/// A loop mapping with its inner transforms compiled for one pass.
#[derive(Debug, Clone)]
pub struct LoopResolver {
    key: String,
    target_table: String,
    key_column: String,
    fields: Vec<CompiledField>,
}

impl LoopResolver {
    pub fn new(mapping: &LoopMapping, primary_table: &str, diagnostics: &mut Vec<Diagnostic>) -> Self {
        Self {
            key: mapping.key(),
            target_table: mapping.target_table(primary_table).to_string(),
            key_column: mapping.key_column().to_string(),
            fields: mapping
                .inner_mappings
                .iter()
                .map(|m| CompiledField::compile(m, diagnostics))
                .collect(),
        }
    }

    /// Output key of the loop array.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Resolve against a prebuilt index when given, else by scanning `rows`.
    pub fn resolve(&self, row: &Row, rows: &[Row], index: Option<&LookupIndex<'_>>) -> Vec<Value> {
        match index {
            Some(index) => self.resolve_indexed(row, index),
            None => self.resolve_scan(row, rows),
        }
    }

    pub fn resolve_indexed(&self, row: &Row, index: &LookupIndex<'_>) -> Vec<Value> {
        let Some(key) = key_string(row.get(&self.key_column)) else {
            return Vec::new();
        };
        index
            .get(&key)
            .iter()
            .map(|matched| Value::Object(map_fields(matched, &self.fields)))
            .collect()
    }

    pub fn resolve_scan(&self, row: &Row, rows: &[Row]) -> Vec<Value> {
        let Some(key) = key_string(row.get(&self.key_column)) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|candidate| key_string(candidate.get(&self.key_column)).as_deref() == Some(key.as_str()))
            .map(|matched| Value::Object(map_fields(matched, &self.fields)))
            .collect()
    }
}

/// Expose each loop child's fields as 1-based indexed scalars
/// (`Product_1`, `Product_2`, ...).
pub fn flatten_loop(record: &mut ResolvedRecord, items: &[Value]) {
    for (i, item) in items.iter().enumerate() {
        if let Value::Object(fields) = item {
            for (field, value) in fields {
                record.insert(format!("{}_{}", field, i + 1), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::FieldMapping;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn orders() -> Vec<Row> {
        rows(json!([
            {"Order": "A", "Product": "X"},
            {"Order": "A", "Product": "Y"},
            {"Order": "B", "Product": "Z"},
            {"Order": "", "Product": "W"},
            {"Order": 7, "Product": "N"},
            {"Order": "7", "Product": "M"}
        ]))
    }

    #[test]
    fn test_group_by_is_reflexive() {
        let table = orders();
        let mapping = LoopMapping::group_by("{#Items}", "Order")
            .with_inner(FieldMapping::new("ProductName", "Product"));
        let mut diagnostics = Vec::new();
        let resolver = LoopResolver::new(&mapping, "Orders", &mut diagnostics);
        assert_eq!(resolver.key(), "Items");
        assert_eq!(resolver.target_table(), "Orders");

        let items = resolver.resolve(&table[0], &table, None);
        assert_eq!(items, vec![json!({"ProductName": "X"}), json!({"ProductName": "Y"})]);
    }

    #[test]
    fn test_empty_key_resolves_to_empty_list() {
        let table = orders();
        let mapping = LoopMapping::group_by("Items", "Order");
        let resolver = LoopResolver::new(&mapping, "Orders", &mut Vec::new());
        assert!(resolver.resolve(&table[3], &table, None).is_empty());
        let index = LookupIndex::build(&table, "Order");
        assert!(resolver.resolve(&table[3], &table, Some(&index)).is_empty());
    }

    #[test]
    fn test_index_and_scan_are_equivalent() {
        let table = orders();
        let index = LookupIndex::build(&table, "Order");
        let group = LoopMapping::group_by("Items", "Order")
            .with_inner(FieldMapping::new("P", "Product"))
            .with_inner(FieldMapping::new("Missing", "Nope"));
        let whole_rows = LoopMapping::group_by("Rows", "Order");

        for mapping in [&group, &whole_rows] {
            let resolver = LoopResolver::new(mapping, "Orders", &mut Vec::new());
            for row in &table {
                assert_eq!(
                    resolver.resolve_indexed(row, &index),
                    resolver.resolve_scan(row, &table),
                    "row {:?}",
                    row
                );
            }
        }

        // loose key coercion applies to both paths
        let resolver = LoopResolver::new(&group, "Orders", &mut Vec::new());
        assert_eq!(resolver.resolve_indexed(&table[4], &index).len(), 2);
    }

    #[test]
    fn test_lookup_joins_side_table() {
        let lines = rows(json!([
            {"OrderID": "1", "Sku": "a", "Qty": 2},
            {"OrderID": "2", "Sku": "b", "Qty": 1},
            {"OrderID": "1", "Sku": "c"}
        ]));
        let primary = rows(json!([{"OrderID": 1}, {"OrderID": 3}]));
        let mapping = LoopMapping::lookup("Lines", "Lines", "OrderID")
            .with_inner(FieldMapping::new("Sku", "Sku"))
            .with_inner(FieldMapping::new("Qty", "Qty"));
        let resolver = LoopResolver::new(&mapping, "Orders", &mut Vec::new());
        assert_eq!(resolver.target_table(), "Lines");

        let index = LookupIndex::build(&lines, "OrderID");
        let items = resolver.resolve(&primary[0], &lines, Some(&index));
        assert_eq!(items, vec![json!({"Sku": "a", "Qty": 2}), json!({"Sku": "c", "Qty": ""})]);
        assert!(resolver.resolve(&primary[1], &lines, Some(&index)).is_empty());
    }

    #[test]
    fn test_lookup_index_and_scan_are_equivalent() {
        let lines = rows(json!([
            {"OrderID": "1", "Sku": "a"},
            {"OrderID": 2, "Sku": "b"},
            {"OrderID": 1, "Sku": "c"},
            {"OrderID": "", "Sku": "d"},
            {"OrderID": " 2 ", "Sku": "e"},
            {"Sku": "f"},
            {"OrderID": "1", "Sku": "g"}
        ]));
        let primary = rows(json!([
            {"OrderID": 1},
            {"OrderID": "2"},
            {"OrderID": ""},
            {},
            {"OrderID": 9}
        ]));
        let index = LookupIndex::build(&lines, "OrderID");
        let with_fields = LoopMapping::lookup("Lines", "Lines", "OrderID").with_inner(FieldMapping::new("Sku", "Sku"));
        let whole_rows = LoopMapping::lookup("Lines", "Lines", "OrderID");

        for mapping in [&with_fields, &whole_rows] {
            let resolver = LoopResolver::new(mapping, "Orders", &mut Vec::new());
            for row in &primary {
                assert_eq!(
                    resolver.resolve_indexed(row, &index),
                    resolver.resolve_scan(row, &lines),
                    "row {:?}",
                    row
                );
            }
        }

        let resolver = LoopResolver::new(&with_fields, "Orders", &mut Vec::new());
        assert_eq!(
            resolver.resolve_indexed(&primary[0], &index),
            vec![json!({"Sku": "a"}), json!({"Sku": "c"}), json!({"Sku": "g"})]
        );
        assert_eq!(resolver.resolve_scan(&primary[1], &lines), vec![json!({"Sku": "b"}), json!({"Sku": "e"})]);
        assert!(resolver.resolve_scan(&primary[2], &lines).is_empty());
        assert!(resolver.resolve_scan(&primary[3], &lines).is_empty());
        assert!(resolver.resolve_indexed(&primary[4], &index).is_empty());
    }

    #[test]
    fn test_flatten_loop() {
        let mut record = ResolvedRecord::new();
        flatten_loop(&mut record, &[json!({"P": "X"}), json!({"P": "Y"})]);
        assert_eq!(record.get("P_1"), Some(&json!("X")));
        assert_eq!(record.get("P_2"), Some(&json!("Y")));
    }
}
