//! Mapping resolution.
//!
//! ```text
//!   primary rows ──▶ virtual columns ──▶ filter ──▶ group collapse
//!                                                       │
//!   side tables ──▶ LookupIndex (table, column) ───────┤
//!                                                       ▼
//!                         direct │ cross-table │ loops  ──▶ ResolvedRecord
//! ```
//!
//! Everything here is synchronous and works on borrowed, read-only tables.
//! Per-row problems never abort a pass: they produce an empty value plus a
//! [`Diagnostic`]. Only [`ResolveError`](crate::error::ResolveError) stops it.

pub mod aggregate;
pub mod cross_table;
pub mod driver;
pub mod index;
pub mod loops;
pub mod virtual_columns;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::Row;
use crate::scheme::FieldMapping;
use crate::transform::TransformExpr;

pub use aggregate::{aggregate, aggregate_records, infer_aggregate_config};
pub use driver::{prepare_primary_rows, resolve_records, Resolution, ResolveStats};
pub use index::{IndexSet, LookupIndex};

// =============================================================================
// Options
// =============================================================================

/// Resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveOptions {
    /// With a group-by loop, emit one record per group instead of per row.
    pub collapse_groups: bool,
    /// Also expose loop children as `Field_1`, `Field_2`, ... scalars.
    pub flatten_loops: bool,
    /// Rows whose diagnostics are logged individually.
    pub diagnostic_row_limit: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            collapse_groups: true,
            flatten_loops: false,
            diagnostic_row_limit: 3,
        }
    }
}

impl ResolveOptions {
    pub fn with_collapse_groups(mut self, collapse: bool) -> Self {
        self.collapse_groups = collapse;
        self
    }

    pub fn with_flatten_loops(mut self, flatten: bool) -> Self {
        self.flatten_loops = flatten;
        self
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingJoinKey,
    NoMatchFound,
    RuleEvaluationFailure,
    /// Two rules target the same reserved column; the first one is kept.
    DuplicateRuleOutput,
    UnknownTable,
    UnresolvedVirtualColumn,
    InvalidTransform,
}

/// A recovered per-row problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Primary row position, `None` for scheme-level problems.
    pub row: Option<usize>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(row: Option<usize>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            row,
            kind,
            message: message.into(),
        }
    }
}

/// Number of diagnostics of `kind`.
pub fn count_kind(diagnostics: &[Diagnostic], kind: DiagnosticKind) -> usize {
    diagnostics.iter().filter(|d| d.kind == kind).count()
}

// =============================================================================
// Compiled field mappings
// =============================================================================

/// A field mapping with its transform parsed once per pass.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub key: String,
    pub source_column: String,
    pub transform: TransformExpr,
}

impl CompiledField {
    /// Parse the mapping's transform; an invalid one degrades to identity
    /// and is reported.
    pub fn compile(mapping: &FieldMapping, diagnostics: &mut Vec<Diagnostic>) -> Self {
        Self {
            key: mapping.key(),
            source_column: mapping.source_column.clone(),
            transform: compile_transform(&mapping.placeholder, mapping.transform.as_deref(), diagnostics),
        }
    }

    pub fn value(&self, row: &Row) -> Value {
        field_value(row, &self.source_column, &self.transform)
    }
}

pub(crate) fn compile_transform(
    placeholder: &str,
    source: Option<&str>,
    diagnostics: &mut Vec<Diagnostic>,
) -> TransformExpr {
    let Some(source) = source.filter(|s| !s.trim().is_empty()) else {
        return TransformExpr::identity();
    };
    TransformExpr::parse(source).unwrap_or_else(|e| {
        diagnostics.push(Diagnostic::new(
            None,
            DiagnosticKind::InvalidTransform,
            format!("transform for '{}' ignored: {}", placeholder, e),
        ));
        TransformExpr::identity()
    })
}

/// `row[column]` through `transform`; missing and null become `""`.
pub(crate) fn field_value(row: &Row, column: &str, transform: &TransformExpr) -> Value {
    let raw = match row.get(column) {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(v) => v.clone(),
    };
    match transform.apply(&raw) {
        Value::Null => Value::String(String::new()),
        other => other,
    }
}

/// Map one row through a list of compiled fields.
///
/// With no fields, the whole row is copied.
pub(crate) fn map_fields(row: &Row, fields: &[CompiledField]) -> Map<String, Value> {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .map(|f| (f.key.clone(), f.value(row)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_defaults_to_empty() {
        let row = json!({"Name": " Alice ", "Manager": null}).as_object().cloned().unwrap();
        let identity = TransformExpr::identity();
        assert_eq!(field_value(&row, "Name", &identity), json!(" Alice "));
        assert_eq!(field_value(&row, "Manager", &identity), json!(""));
        assert_eq!(field_value(&row, "Missing", &identity), json!(""));

        let trim = TransformExpr::parse("trim | uppercase").unwrap();
        assert_eq!(field_value(&row, "Name", &trim), json!("ALICE"));
    }

    #[test]
    fn test_invalid_transform_degrades_to_identity() {
        let mut diagnostics = Vec::new();
        let mapping = FieldMapping::new("{{Name}}", "Name").with_transform("value.trim()");
        let field = CompiledField::compile(&mapping, &mut diagnostics);
        assert!(field.transform.is_identity());
        assert_eq!(field.key, "Name");
        assert_eq!(count_kind(&diagnostics, DiagnosticKind::InvalidTransform), 1);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: ResolveOptions = serde_json::from_value(json!({"flattenLoops": true})).unwrap();
        assert!(options.flatten_loops);
        assert!(options.collapse_groups);
        assert_eq!(options.diagnostic_row_limit, 3);
    }
}
