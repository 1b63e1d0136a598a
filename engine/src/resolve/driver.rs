//! One resolution pass: primary table + scheme → resolved records.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use super::cross_table::CrossTableResolver;
use super::index::IndexSet;
use super::loops::{flatten_loop, LoopResolver};
use super::virtual_columns::{inject_virtual_columns, VirtualContext};
use super::{count_kind, CompiledField, Diagnostic, DiagnosticKind, ResolveOptions};
use crate::error::{ResolveError, ResolveResult};
use crate::logs::{log_diagnostic, log_info, log_success, log_warning};
use crate::models::{key_string, ResolvedRecord, Row, TableSet};
use crate::scheme::MappingScheme;
use crate::transform::FilterExpr;

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveStats {
    /// Rows in the primary table.
    pub primary_rows: usize,
    /// Rows left after the filter.
    pub filtered_rows: usize,
    pub records: usize,
    pub indexes_built: usize,
    /// Cross-table lookups attempted and matched.
    pub lookups: usize,
    pub lookup_hits: usize,
}

impl ResolveStats {
    pub fn lookup_success_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 1.0;
        }
        self.lookup_hits as f64 / self.lookups as f64
    }
}

/// Output of [`resolve_records`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub records: Vec<ResolvedRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ResolveStats,
}

/// The primary table with virtual columns injected and the filter applied.
///
/// Fails only when the primary table is missing or the filter is invalid.
pub fn prepare_primary_rows(
    tables: &TableSet,
    scheme: &MappingScheme,
    diagnostics: &mut Vec<Diagnostic>,
) -> ResolveResult<Vec<Row>> {
    let primary = tables
        .get(&scheme.primary_table)
        .ok_or_else(|| ResolveError::PrimaryTableNotFound {
            table: scheme.primary_table.clone(),
            available: tables.names(),
        })?;

    let mut rows = inject_virtual_columns(primary, &scheme.virtual_columns, &VirtualContext::now(), diagnostics);

    if let Some(expression) = scheme.filter_expression.as_deref().filter(|f| !f.trim().is_empty()) {
        let filter = FilterExpr::parse(expression).map_err(|message| ResolveError::InvalidFilter {
            expression: expression.to_string(),
            message,
        })?;
        let before = rows.len();
        rows.retain(|row| filter.matches(row));
        log_info(format!(
            "Filter '{}' kept {}/{} rows",
            filter.source(),
            rows.len(),
            before
        ));
    }

    Ok(rows)
}

/// Resolve every (filtered, possibly collapsed) primary row into a record.
pub fn resolve_records(tables: &TableSet, scheme: &MappingScheme, options: &ResolveOptions) -> ResolveResult<Resolution> {
    let mut diagnostics = Vec::new();
    let primary_rows = tables.get(&scheme.primary_table).map_or(0, |t| t.len());
    let rows = prepare_primary_rows(tables, scheme, &mut diagnostics)?;

    log_info(format!(
        "Resolving {} rows of '{}' ({} direct, {} cross-table, {} loop mappings)",
        rows.len(),
        scheme.primary_table,
        scheme.direct_mappings.len(),
        scheme.cross_table_mappings.len(),
        scheme.loop_mappings.len()
    ));

    // Indexes: built once, read-only for the rest of the pass
    let mut indexes = IndexSet::new();
    for mapping in &scheme.cross_table_mappings {
        if let Some(side) = tables.get(&mapping.source_table) {
            indexes.ensure(&mapping.source_table, &mapping.join_key, side);
        }
    }
    let loop_resolvers: Vec<LoopResolver> = scheme
        .loop_mappings
        .iter()
        .map(|m| LoopResolver::new(m, &scheme.primary_table, &mut diagnostics))
        .collect();
    for resolver in &loop_resolvers {
        let target = resolver.target_table();
        if target == scheme.primary_table {
            indexes.ensure(target, resolver.key_column(), &rows);
        } else if let Some(side) = tables.get(target) {
            indexes.ensure(target, resolver.key_column(), side);
        } else {
            diagnostics.push(Diagnostic::new(
                None,
                DiagnosticKind::UnknownTable,
                format!("loop '{}' reads unknown table '{}'", resolver.key(), target),
            ));
        }
    }

    // Rule mappings that reach this point were never preprocessed
    let mut direct_fields: Vec<(String, Option<CompiledField>)> = Vec::new();
    for mapping in &scheme.direct_mappings {
        if mapping.rule_text().is_some() {
            diagnostics.push(Diagnostic::new(
                None,
                DiagnosticKind::RuleEvaluationFailure,
                format!("rule for '{}' was not evaluated", mapping.key()),
            ));
            direct_fields.push((mapping.key(), None));
        } else {
            direct_fields.push((mapping.key(), Some(CompiledField::compile(mapping, &mut diagnostics))));
        }
    }
    let cross_resolvers: Vec<CrossTableResolver> = scheme
        .cross_table_mappings
        .iter()
        .map(|m| CrossTableResolver::new(m, indexes.get(&m.source_table, &m.join_key), &mut diagnostics))
        .collect();

    let driving = match scheme.group_by_loop() {
        Some(group) if options.collapse_groups => collapse_groups(&rows, group.key_column()),
        _ => rows.iter().collect(),
    };
    if driving.len() != rows.len() {
        log_info(format!("Collapsed {} rows into {} groups", rows.len(), driving.len()));
    }

    let mut stats = ResolveStats {
        primary_rows,
        filtered_rows: rows.len(),
        indexes_built: indexes.len(),
        ..ResolveStats::default()
    };
    let diagnostics_before_rows = diagnostics.len();

    let mut records = Vec::with_capacity(driving.len());
    for (i, row) in driving.iter().enumerate() {
        let mut record = ResolvedRecord::new();

        for (key, field) in &direct_fields {
            let value = match field {
                Some(field) => field.value(row),
                None => Value::String(String::new()),
            };
            record.insert(key.clone(), value);
        }

        for resolver in &cross_resolvers {
            let value = resolver.resolve(row, i, &mut diagnostics);
            record.insert(resolver.key(), value);
        }

        for resolver in &loop_resolvers {
            let target = resolver.target_table();
            let source: &[Row] = if target == scheme.primary_table {
                &rows
            } else {
                tables.get(target).unwrap_or_default()
            };
            let items = resolver.resolve(row, source, indexes.get(target, resolver.key_column()));
            if options.flatten_loops {
                flatten_loop(&mut record, &items);
            }
            record.insert(resolver.key(), Value::Array(items));
        }

        records.push(record);
    }

    let row_diagnostics = &diagnostics[diagnostics_before_rows..];
    stats.lookups = driving.len() * cross_resolvers.iter().filter(|r| r.has_table()).count();
    stats.lookup_hits = stats.lookups
        - count_kind(row_diagnostics, DiagnosticKind::MissingJoinKey)
        - count_kind(row_diagnostics, DiagnosticKind::NoMatchFound);
    stats.records = records.len();

    report(&diagnostics, &stats, options);

    Ok(Resolution {
        records,
        diagnostics,
        stats,
    })
}

/// First row of each distinct key, in table order. Empty keys share a group.
fn collapse_groups<'a>(rows: &'a [Row], column: &str) -> Vec<&'a Row> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(key_string(row.get(column)).unwrap_or_default()))
        .collect()
}

fn report(diagnostics: &[Diagnostic], stats: &ResolveStats, options: &ResolveOptions) {
    for diagnostic in diagnostics {
        match diagnostic.row {
            Some(row) if row >= options.diagnostic_row_limit => {}
            _ => log_diagnostic(diagnostic, 1),
        }
    }
    let per_row = diagnostics.iter().filter(|d| d.row.is_some()).count();
    if per_row > 0 {
        log_warning(format!("{} row-level issue(s) recovered with empty values", per_row));
    }
    if stats.lookups > 0 {
        log_info(format!(
            "Cross-table lookups: {}/{} matched ({:.1}%)",
            stats.lookup_hits,
            stats.lookups,
            stats.lookup_success_rate() * 100.0
        ));
    }
    log_success(format!("Resolved {} records", stats.records));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{CrossTableMapping, FieldMapping, LoopMapping, SystemVariable, VirtualColumn, VirtualKind};
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn company() -> TableSet {
        TableSet::new()
            .with_table(
                "Employees",
                rows(json!([{"Name": "Alice", "DeptID": "D1"}, {"Name": "Bob", "DeptID": "D2"}])),
            )
            .with_table(
                "Depts",
                rows(json!([{"DeptID": "D1", "DeptName": "Eng"}, {"DeptID": "D2", "DeptName": "Sales"}])),
            )
    }

    fn join_scheme() -> MappingScheme {
        MappingScheme::new("Employees")
            .with_direct(FieldMapping::new("Name", "Name"))
            .with_cross(CrossTableMapping::new("Dept", "Depts", "DeptName", "DeptID"))
    }

    #[test]
    fn test_join_correctness() {
        let resolution = resolve_records(&company(), &join_scheme(), &ResolveOptions::default()).unwrap();
        let records: Vec<Value> = resolution.records.into_iter().map(ResolvedRecord::into_value).collect();
        assert_eq!(
            records,
            vec![json!({"Name": "Alice", "Dept": "Eng"}), json!({"Name": "Bob", "Dept": "Sales"})]
        );
        assert!(resolution.diagnostics.is_empty());
        assert_eq!(resolution.stats.lookup_hits, 2);
    }

    #[test]
    fn test_missing_key_is_empty_not_error() {
        let mut tables = company();
        tables.insert("Employees", rows(json!([{"Name": "Carol", "DeptID": ""}, {"Name": "Dan"}])));
        let resolution = resolve_records(&tables, &join_scheme(), &ResolveOptions::default()).unwrap();
        assert_eq!(resolution.records[0].get("Dept"), Some(&json!("")));
        assert_eq!(resolution.records[1].get("Dept"), Some(&json!("")));
        assert_eq!(count_kind(&resolution.diagnostics, DiagnosticKind::MissingJoinKey), 2);
        assert_eq!(resolution.stats.lookups, 2);
        assert_eq!(resolution.stats.lookup_hits, 0);
    }

    #[test]
    fn test_primary_table_missing_is_fatal() {
        let scheme = MappingScheme::new("Nope");
        let err = resolve_records(&company(), &scheme, &ResolveOptions::default()).unwrap_err();
        assert!(matches!(err, ResolveError::PrimaryTableNotFound { ref table, .. } if table == "Nope"));
    }

    #[test]
    fn test_invalid_filter_is_fatal() {
        let scheme = join_scheme().with_filter("Name ==");
        let err = resolve_records(&company(), &scheme, &ResolveOptions::default()).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidFilter { .. }));
    }

    #[test]
    fn test_filter_sees_virtual_columns() {
        let scheme = join_scheme()
            .with_virtual(VirtualColumn::new("No", VirtualKind::Variable { value: SystemVariable::RowIndex }))
            .with_direct(FieldMapping::new("No", "No"))
            .with_filter("No > 1");
        let resolution = resolve_records(&company(), &scheme, &ResolveOptions::default()).unwrap();
        assert_eq!(resolution.records.len(), 1);
        assert_eq!(resolution.records[0].get("Name"), Some(&json!("Bob")));
        assert_eq!(resolution.records[0].get("No"), Some(&json!(2)));
        assert_eq!(resolution.stats.primary_rows, 2);
        assert_eq!(resolution.stats.filtered_rows, 1);
    }

    fn order_tables() -> TableSet {
        TableSet::new()
            .with_table(
                "Orders",
                rows(json!([
                    {"Order": "A", "Product": "X"},
                    {"Order": "A", "Product": "Y"},
                    {"Order": "B", "Product": "Z"}
                ])),
            )
            .with_table(
                "Notes",
                rows(json!([{"Order": "B", "Text": "fragile"}, {"Order": "B", "Text": "gift"}])),
            )
    }

    fn order_scheme() -> MappingScheme {
        MappingScheme::new("Orders")
            .with_direct(FieldMapping::new("Order", "Order"))
            .with_loop(LoopMapping::group_by("{#Items}", "Order").with_inner(FieldMapping::new("ProductName", "Product")))
            .with_loop(LoopMapping::lookup("Notes", "Notes", "Order").with_inner(FieldMapping::new("Note", "Text")))
    }

    #[test]
    fn test_collapse_many_groups() {
        let n = 5_000;
        let orders: Vec<Row> = (0..2 * n)
            .map(|i| json!({"Order": format!("o{}", i % n), "Product": i}).as_object().cloned().unwrap())
            .collect();
        let tables = TableSet::new().with_table("Orders", orders);
        let scheme = MappingScheme::new("Orders")
            .with_direct(FieldMapping::new("Order", "Order"))
            .with_loop(LoopMapping::group_by("Items", "Order").with_inner(FieldMapping::new("P", "Product")));
        let resolution = resolve_records(&tables, &scheme, &ResolveOptions::default()).unwrap();
        assert_eq!(resolution.records.len(), n);
        assert_eq!(resolution.records[1].get("Order"), Some(&json!("o1")));
        assert_eq!(resolution.records[1].get("Items"), Some(&json!([{"P": 1}, {"P": n + 1}])));
    }

    #[test]
    fn test_group_by_without_collapse() {
        let options = ResolveOptions::default().with_collapse_groups(false);
        let resolution = resolve_records(&order_tables(), &order_scheme(), &options).unwrap();
        assert_eq!(resolution.records.len(), 3);
        assert_eq!(
            resolution.records[0].get("Items"),
            Some(&json!([{"ProductName": "X"}, {"ProductName": "Y"}]))
        );
        assert_eq!(resolution.records[1].loop_items("Items").unwrap().len(), 2);
        assert_eq!(resolution.records[2].get("Notes"), Some(&json!([{"Note": "fragile"}, {"Note": "gift"}])));
        assert_eq!(resolution.records[0].get("Notes"), Some(&json!([])));
    }

    #[test]
    fn test_group_collapse_and_flatten() {
        let options = ResolveOptions::default().with_flatten_loops(true);
        let resolution = resolve_records(&order_tables(), &order_scheme(), &options).unwrap();
        assert_eq!(resolution.records.len(), 2);
        assert_eq!(resolution.records[0].get("Order"), Some(&json!("A")));
        assert_eq!(resolution.records[0].get("ProductName_2"), Some(&json!("Y")));
        assert_eq!(resolution.records[1].get("Note_1"), Some(&json!("fragile")));
    }

    #[test]
    fn test_unknown_tables_degrade() {
        let scheme = MappingScheme::new("Orders")
            .with_cross(CrossTableMapping::new("X", "Ghost", "A", "Order"))
            .with_loop(LoopMapping::lookup("Lines", "Ghost", "Order"))
            .with_direct(FieldMapping::new("Grade", "Grade").with_rule("grade it"));
        let options = ResolveOptions::default().with_collapse_groups(false);
        let resolution = resolve_records(&order_tables(), &scheme, &options).unwrap();
        assert_eq!(resolution.records[0].get("X"), Some(&json!("")));
        assert_eq!(resolution.records[0].get("Lines"), Some(&json!([])));
        assert_eq!(resolution.records[0].get("Grade"), Some(&json!("")));
        assert_eq!(count_kind(&resolution.diagnostics, DiagnosticKind::UnknownTable), 2);
        assert_eq!(count_kind(&resolution.diagnostics, DiagnosticKind::RuleEvaluationFailure), 1);
        assert_eq!(resolution.stats.lookups, 0);
    }

    #[test]
    fn test_records_do_not_share_state() {
        let options = ResolveOptions::default().with_collapse_groups(false);
        let mut resolution = resolve_records(&order_tables(), &order_scheme(), &options).unwrap();
        resolution.records[0].insert("Items", json!([]));
        assert_eq!(resolution.records[1].loop_items("Items").unwrap().len(), 2);
    }
}
