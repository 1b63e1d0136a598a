//! Single-valued fields pulled from another table through a join key.

use serde_json::Value;

use super::index::LookupIndex;
use super::{compile_transform, field_value, Diagnostic, DiagnosticKind};
use crate::models::{key_string, Row};
use crate::scheme::CrossTableMapping;
use crate::transform::TransformExpr;

/// A cross-table mapping bound to its side-table index for one pass.
pub struct CrossTableResolver<'m, 'i, 'a> {
    mapping: &'m CrossTableMapping,
    key: String,
    transform: TransformExpr,
    /// `None` when the side table does not exist.
    index: Option<&'i LookupIndex<'a>>,
}

impl<'m, 'i, 'a> CrossTableResolver<'m, 'i, 'a> {
    pub fn new(
        mapping: &'m CrossTableMapping,
        index: Option<&'i LookupIndex<'a>>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Self {
        if index.is_none() {
            diagnostics.push(Diagnostic::new(
                None,
                DiagnosticKind::UnknownTable,
                format!(
                    "'{}' reads unknown table '{}'",
                    mapping.placeholder, mapping.source_table
                ),
            ));
        }
        Self {
            mapping,
            key: mapping.key(),
            transform: compile_transform(&mapping.placeholder, mapping.transform.as_deref(), diagnostics),
            index,
        }
    }

    /// Output key of the resolved field.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the side table exists.
    pub fn has_table(&self) -> bool {
        self.index.is_some()
    }

    /// Resolve the field for one primary row.
    ///
    /// Missing join keys and unmatched keys yield `""` and a diagnostic.
    /// With several matches, the first in side-table order wins.
    pub fn resolve(&self, row: &Row, row_index: usize, diagnostics: &mut Vec<Diagnostic>) -> Value {
        let empty = Value::String(String::new());
        let Some(index) = self.index else {
            return empty;
        };

        let Some(key) = key_string(row.get(&self.mapping.join_key)) else {
            diagnostics.push(Diagnostic::new(
                Some(row_index),
                DiagnosticKind::MissingJoinKey,
                format!(
                    "row {} has no '{}' value for '{}'",
                    row_index + 1,
                    self.mapping.join_key,
                    self.key
                ),
            ));
            return empty;
        };

        match index.first(&key) {
            Some(matched) => field_value(matched, &self.mapping.source_column, &self.transform),
            None => {
                diagnostics.push(Diagnostic::new(
                    Some(row_index),
                    DiagnosticKind::NoMatchFound,
                    format!(
                        "no row in '{}' with {} = '{}'",
                        self.mapping.source_table, self.mapping.join_key, key
                    ),
                ));
                empty
            }
        }
    }
}
