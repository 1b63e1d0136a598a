//! Synthesized columns injected into the primary table before resolution.

use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use uuid::Uuid;

use super::{Diagnostic, DiagnosticKind};
use crate::models::Row;
use crate::scheme::{SystemVariable, VirtualColumn, VirtualKind};

/// Clock values captured once so every row of a pass sees the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualContext {
    date: String,
    time: String,
    date_time: String,
}

impl VirtualContext {
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }

    pub fn at(moment: NaiveDateTime) -> Self {
        Self {
            date: moment.format("%Y-%m-%d").to_string(),
            time: moment.format("%H:%M:%S").to_string(),
            date_time: moment.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    fn variable(&self, variable: SystemVariable, row_index: usize) -> Value {
        match variable {
            SystemVariable::CurrentDate => Value::String(self.date.clone()),
            SystemVariable::CurrentTime => Value::String(self.time.clone()),
            SystemVariable::CurrentDateTime => Value::String(self.date_time.clone()),
            SystemVariable::RowIndex => Value::from(row_index + 1),
            SystemVariable::Uuid => Value::String(Uuid::new_v4().to_string()),
        }
    }
}

/// Copy `rows` with every virtual column added.
///
/// `ai` columns still present here were never preprocessed; they resolve to
/// `""` and are reported once each.
pub fn inject_virtual_columns(
    rows: &[Row],
    columns: &[VirtualColumn],
    context: &VirtualContext,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Row> {
    if columns.is_empty() {
        return rows.to_vec();
    }

    for column in columns.iter().filter(|c| c.kind.is_ai()) {
        diagnostics.push(Diagnostic::new(
            None,
            DiagnosticKind::UnresolvedVirtualColumn,
            format!("AI column '{}' was not preprocessed", column.name),
        ));
    }

    let mut missing_sources: Vec<&str> = Vec::new();
    let rows: Vec<Row> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = row.clone();
            for column in columns {
                let value = match &column.kind {
                    VirtualKind::Const { value } => Value::String(value.clone()),
                    VirtualKind::Variable { value } => context.variable(*value, i),
                    VirtualKind::Ai { .. } => Value::String(String::new()),
                    VirtualKind::Column { source } => match row.get(source) {
                        Some(value) => value.clone(),
                        None => {
                            if !missing_sources.contains(&source.as_str()) {
                                missing_sources.push(source);
                            }
                            Value::String(String::new())
                        }
                    },
                };
                row.insert(column.name.clone(), value);
            }
            row
        })
        .collect();

    for source in missing_sources {
        diagnostics.push(Diagnostic::new(
            None,
            DiagnosticKind::UnresolvedVirtualColumn,
            format!("source column '{}' of a virtual column is missing", source),
        ));
    }
    rows
}
