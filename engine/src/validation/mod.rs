//! Scheme validation.
//!
//! Two layers:
//!
//! - **Structural**: the raw JSON of a scheme is checked against the embedded
//!   JSON Schema (Draft 7, `schemas/mapping-scheme.json`) before
//!   deserialization, so oracle output with the wrong shape is rejected with
//!   readable messages instead of a serde error.
//! - **Semantic**: [`check_scheme`] compares a deserialized scheme against the
//!   actual tables (tables and columns exist, placeholders covered once).
//!
//! Also hosts the table heuristics used when a scheme has to be built
//! without help: [`suggest_primary_table`] and [`detect_relationships`].

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;

use crate::models::TableSet;
use crate::scheme::MappingScheme;

static MAPPING_SCHEME_SCHEMA: Lazy<Result<Value, String>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/mapping-scheme.json"))
        .map_err(|e| format!("Invalid embedded schema: {}", e))
});

/// Validate `data` against a JSON Schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with one message per violation
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick check, true/false only.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate raw scheme JSON against the embedded mapping-scheme schema.
pub fn validate_scheme_value(data: &Value) -> Result<(), Vec<String>> {
    let schema = MAPPING_SCHEME_SCHEMA.as_ref().map_err(|e| vec![e.clone()])?;
    validate(schema, data)
}

// =============================================================================
// Semantic checks
// =============================================================================

/// Outcome of [`check_scheme`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SchemeReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a scheme against the tables it will run on.
///
/// Missing tables and columns are errors; unmapped placeholders and columns
/// that only fail to appear in sampled rows are warnings.
pub fn check_scheme(scheme: &MappingScheme, tables: &TableSet) -> SchemeReport {
    let mut report = SchemeReport::default();

    let primary_columns: BTreeSet<String> = if tables.contains(&scheme.primary_table) {
        tables
            .headers(&scheme.primary_table)
            .into_iter()
            .chain(scheme.virtual_columns.iter().map(|c| c.name.clone()))
            .collect()
    } else {
        report.errors.push(format!(
            "Primary table '{}' does not exist (available: {})",
            scheme.primary_table,
            tables.names().join(", ")
        ));
        BTreeSet::new()
    };
    let primary_known = tables.contains(&scheme.primary_table);

    for mapping in &scheme.direct_mappings {
        if mapping.rule_text().is_some() {
            continue;
        }
        if primary_known && !primary_columns.contains(&mapping.source_column) {
            report.errors.push(format!(
                "Column '{}' (for '{}') does not exist in '{}'",
                mapping.source_column, mapping.placeholder, scheme.primary_table
            ));
        }
    }

    for mapping in &scheme.cross_table_mappings {
        if !tables.contains(&mapping.source_table) {
            report.errors.push(format!(
                "Source table '{}' (for '{}') does not exist",
                mapping.source_table, mapping.placeholder
            ));
            continue;
        }
        let side = tables.headers(&mapping.source_table);
        if !side.contains(&mapping.source_column) {
            report.errors.push(format!(
                "Column '{}' does not exist in '{}'",
                mapping.source_column, mapping.source_table
            ));
        }
        if !side.contains(&mapping.join_key) {
            report.errors.push(format!(
                "Join key '{}' does not exist in '{}'",
                mapping.join_key, mapping.source_table
            ));
        }
        if primary_known && !primary_columns.contains(&mapping.join_key) {
            report.errors.push(format!(
                "Join key '{}' does not exist in '{}'",
                mapping.join_key, scheme.primary_table
            ));
        }
    }

    for loop_mapping in &scheme.loop_mappings {
        let target = loop_mapping.target_table(&scheme.primary_table);
        if !tables.contains(target) {
            report.errors.push(format!(
                "Loop '{}' reads unknown table '{}'",
                loop_mapping.key(),
                target
            ));
            continue;
        }
        let mut columns: BTreeSet<String> = tables.headers(target).into_iter().collect();
        if target == scheme.primary_table {
            columns.extend(primary_columns.iter().cloned());
        }
        if !columns.contains(loop_mapping.key_column()) {
            report.errors.push(format!(
                "Loop '{}' key column '{}' does not exist in '{}'",
                loop_mapping.key(),
                loop_mapping.key_column(),
                target
            ));
        }
        for inner in &loop_mapping.inner_mappings {
            if !columns.contains(&inner.source_column) {
                report.warnings.push(format!(
                    "Loop '{}' field '{}' reads missing column '{}'",
                    loop_mapping.key(),
                    inner.placeholder,
                    inner.source_column
                ));
            }
        }
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in scheme
        .direct_mappings
        .iter()
        .map(|m| m.key())
        .chain(scheme.cross_table_mappings.iter().map(|m| m.key()))
        .chain(scheme.loop_mappings.iter().map(|m| m.key()))
    {
        *counts.entry(key).or_default() += 1;
    }
    for (placeholder, count) in counts.into_iter().filter(|(_, c)| *c > 1) {
        report.errors.push(format!(
            "Placeholder '{}' is mapped {} times",
            placeholder, count
        ));
    }

    if let Some(filter) = scheme.filter_expression.as_deref().filter(|f| !f.trim().is_empty()) {
        if let Err(e) = crate::transform::FilterExpr::parse(filter) {
            report.errors.push(format!("Invalid filter expression: {}", e));
        }
    }

    if !scheme.unmapped_placeholders.is_empty() {
        report.warnings.push(format!(
            "{} placeholder(s) not mapped: {}",
            scheme.unmapped_placeholders.len(),
            scheme.unmapped_placeholders.join(", ")
        ));
    }

    report
}

// =============================================================================
// Table heuristics
// =============================================================================

const MAIN_DATA_KEYWORDS: &[&str] = &[
    "name", "title", "id", "product", "customer", "employee", "order", "amount",
    "quantity", "date", "姓名", "名称", "标题", "编号", "产品", "客户", "员工",
    "订单", "销售", "金额", "数量", "日期", "时间",
];

/// Pick the table most likely to drive one-document-per-row generation.
///
/// Scores row count (up to 40), a moderate column count (up to 20), columns
/// that look like master data (up to 30) and mentions in the instruction
/// (up to 20). Ties keep table-name order. `None` for an empty set.
pub fn suggest_primary_table(tables: &TableSet, instruction: Option<&str>) -> Option<String> {
    let max_rows = tables.iter().map(|(_, rows)| rows.len()).max()?.max(1);
    let instruction = instruction.map(str::to_lowercase);

    let mut best: Option<(String, f64)> = None;
    for (name, rows) in tables.iter() {
        let headers = tables.headers(name);
        let mut score = rows.len() as f64 / max_rows as f64 * 40.0;

        let field_count = headers.len() as f64;
        score += if (5.0..=20.0).contains(&field_count) {
            20.0
        } else if field_count > 0.0 {
            (20.0 - (field_count - 10.0).abs()).max(0.0)
        } else {
            0.0
        };

        let relevant = headers
            .iter()
            .filter(|h| {
                let lower = h.to_lowercase();
                MAIN_DATA_KEYWORDS.iter().any(|k| lower.contains(k))
            })
            .count();
        score += (relevant as f64 * 5.0).min(30.0);

        if let Some(instruction) = &instruction {
            if instruction.contains(&name.to_lowercase()) {
                score += 10.0;
            }
            let mentioned = headers
                .iter()
                .filter(|h| instruction.contains(&h.to_lowercase()))
                .count();
            score += (mentioned as f64 * 2.0).min(10.0);
        }

        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((name.clone(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// A column shared by two tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_table: String,
    pub to_table: String,
    pub column: String,
    /// 0.5 for any shared column, up to 1.0 for ID-like names.
    pub confidence: f64,
}

/// Find columns shared between table pairs, most confident first.
pub fn detect_relationships(tables: &TableSet) -> Vec<Relationship> {
    let names = tables.names();
    let mut relationships = Vec::new();

    for (i, from) in names.iter().enumerate() {
        let from_headers = tables.headers(from);
        for to in &names[i + 1..] {
            let to_headers = tables.headers(to);
            for column in from_headers.iter().filter(|h| to_headers.contains(h)) {
                relationships.push(Relationship {
                    from_table: from.clone(),
                    to_table: to.clone(),
                    column: column.clone(),
                    confidence: relationship_confidence(column),
                });
            }
        }
    }

    relationships.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    relationships
}

fn relationship_confidence(column: &str) -> f64 {
    let lower = column.to_lowercase();
    let mut confidence: f64 = 0.5;
    if lower.ends_with("id")
        || lower.starts_with("id")
        || lower.ends_with("no.")
        || column.ends_with("编号")
        || column.ends_with("代码")
    {
        confidence += 0.3;
    }
    if column.contains("ID") || column.contains("编号") || column.contains("代码") {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{CrossTableMapping, FieldMapping, LoopMapping, VirtualColumn, VirtualKind};
    use serde_json::json;

    fn rows(value: Value) -> Vec<crate::models::Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn tables() -> TableSet {
        TableSet::new()
            .with_table(
                "Employees",
                rows(json!([
                    {"Name": "Alice", "DeptID": "D1"},
                    {"Name": "Bob", "DeptID": "D2"},
                    {"Name": "Carol", "DeptID": "D1"}
                ])),
            )
            .with_table(
                "Depts",
                rows(json!([{"DeptID": "D1", "DeptName": "Eng"}, {"DeptID": "D2", "DeptName": "Sales"}])),
            )
    }

    #[test]
    fn test_validate_scheme_value() {
        assert!(validate_scheme_value(&json!({"primaryTable": "Employees"})).is_ok());
        assert!(validate_scheme_value(&json!({"primarySheet": "Employees", "mappings": []})).is_ok());

        let errors = validate_scheme_value(&json!({
            "primaryTable": "Employees",
            "loopMappings": [{ "loopPlaceholder": "Items", "type": "lookup" }]
        }))
        .unwrap_err();
        assert!(!errors.is_empty());

        assert!(validate_scheme_value(&json!({"directMappings": []})).is_err());
    }

    #[test]
    fn test_generic_validation() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(validate(&schema, &json!({"age": 42})).is_err());
    }

    #[test]
    fn test_check_valid_scheme() {
        let scheme = MappingScheme::new("Employees")
            .with_direct(FieldMapping::new("Name", "Name"))
            .with_direct(FieldMapping::new("Today", "Today"))
            .with_virtual(VirtualColumn::new("Today", VirtualKind::Const { value: "x".into() }))
            .with_cross(CrossTableMapping::new("Dept", "Depts", "DeptName", "DeptID"))
            .with_loop(LoopMapping::group_by("Team", "DeptID").with_inner(FieldMapping::new("Member", "Name")));
        let report = check_scheme(&scheme, &tables());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_check_reports_problems() {
        let mut scheme = MappingScheme::new("Employees")
            .with_direct(FieldMapping::new("Name", "FullName"))
            .with_direct(FieldMapping::new("{{Name}}", "Name"))
            .with_cross(CrossTableMapping::new("Boss", "Managers", "Name", "DeptID"))
            .with_filter("Name ==");
        scheme.unmapped_placeholders = vec!["Total".into()];

        let report = check_scheme(&scheme, &tables());
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("FullName")));
        assert!(report.errors.iter().any(|e| e.contains("Managers")));
        assert!(report.errors.iter().any(|e| e.contains("mapped 2 times")));
        assert!(report.errors.iter().any(|e| e.contains("filter")));
        assert_eq!(report.warnings.len(), 1);

        let missing = MappingScheme::new("Nope");
        let report = check_scheme(&missing, &tables());
        assert!(report.errors[0].contains("Nope"));
    }

    #[test]
    fn test_suggest_primary_table() {
        let set = tables();
        assert_eq!(suggest_primary_table(&set, None).as_deref(), Some("Employees"));
        assert_eq!(suggest_primary_table(&TableSet::new(), None), None);

        let even = TableSet::new()
            .with_table("Alpha", rows(json!([{"X": 1}])))
            .with_table("Beta", rows(json!([{"X": 2}])));
        assert_eq!(suggest_primary_table(&even, None).as_deref(), Some("Alpha"));
        assert_eq!(suggest_primary_table(&even, Some("one letter per beta row")).as_deref(), Some("Beta"));
    }

    #[test]
    fn test_detect_relationships() {
        let relationships = detect_relationships(&tables());
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].column, "DeptID");
        assert_eq!(relationships[0].from_table, "Depts");
        assert!((relationships[0].confidence - 1.0).abs() < f64::EPSILON);
    }
}
