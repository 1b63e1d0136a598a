//! Rule preprocessing.
//!
//! Some fields are not read from a column but computed per row by an
//! external [`RuleOracle`] (a short instruction such as "classify this
//! complaint"). Those are evaluated once, up front, and written into
//! reserved columns so that resolution only ever sees plain columns:
//!
//! ```text
//!   rows ──chunk(5)──▶ [oracle × row] ──join──▶ rows + __rule__<Field>
//!                         (barrier per chunk)        + __rule__col__<Column>
//!   scheme ──────────────────────────────────▶ scheme with plain mappings
//! ```
//!
//! An AI virtual column becomes a `column` virtual column copying its
//! reserved column, so filters, join keys and loop keys naming it keep
//! working. A failed rule leaves `""` in its column and never stops the batch.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AiError;
use crate::logs::{log_diagnostic, log_info, log_success};
use crate::models::{value_to_string, ProgressCallback, Row};
use crate::resolve::{Diagnostic, DiagnosticKind};
use crate::scheme::{MappingScheme, VirtualKind};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder regex"));

// =============================================================================
// Oracle contract
// =============================================================================

/// Answer of the oracle for one rule and one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleOutcome {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Evaluates a rule against one row.
#[allow(async_fn_in_trait)]
pub trait RuleOracle {
    async fn evaluate(&self, rule: &str, row: &Row) -> Result<RuleOutcome, AiError>;
}

// =============================================================================
// Options
// =============================================================================

/// Reserved column prefix for rule outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleNamespace {
    prefix: String,
}

impl RuleNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Reserved column holding the output of the rule mapping for `field`.
    pub fn column(&self, field: &str) -> String {
        format!("{}{}", self.prefix, field)
    }

    /// Reserved column holding the output of AI virtual column `name`.
    pub fn virtual_column(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, VIRTUAL_SEGMENT, name)
    }

    pub fn contains(&self, column: &str) -> bool {
        column.starts_with(&self.prefix)
    }
}

impl Default for RuleNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_PREFIX)
    }
}

pub const DEFAULT_NAMESPACE_PREFIX: &str = "__rule__";

/// Keeps AI column outputs apart from placeholder outputs of the same name.
const VIRTUAL_SEGMENT: &str = "col__";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreprocessOptions {
    /// Rows evaluated concurrently before the next chunk starts.
    pub chunk_size: usize,
    pub namespace_prefix: String,
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for PreprocessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessOptions")
            .field("chunk_size", &self.chunk_size)
            .field("namespace_prefix", &self.namespace_prefix)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl PreprocessOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn namespace(&self) -> RuleNamespace {
        RuleNamespace::new(self.namespace_prefix.clone())
    }
}

// =============================================================================
// Preprocessing
// =============================================================================

/// One rule to evaluate for every row.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTask {
    /// Placeholder or virtual column the rule feeds.
    pub field: String,
    /// Reserved output column.
    pub column: String,
    pub rule: String,
}

/// A rule that failed for one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub row: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    /// Input rows plus one reserved column per rule.
    pub rows: Vec<Row>,
    /// Scheme with every rule source rewritten to its reserved column.
    pub scheme: MappingScheme,
    pub failures: Vec<RuleFailure>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Rules of a scheme: rule-sourced direct mappings, then AI virtual columns.
pub fn collect_rule_tasks(scheme: &MappingScheme, namespace: &RuleNamespace) -> Vec<RuleTask> {
    let mappings = scheme.direct_mappings.iter().filter_map(|m| {
        m.rule_text().map(|rule| RuleTask {
            field: m.key(),
            column: namespace.column(&m.key()),
            rule: rule.to_string(),
        })
    });
    let columns = scheme.virtual_columns.iter().filter_map(|c| match &c.kind {
        VirtualKind::Ai { value, ai_prompt } => Some(RuleTask {
            field: c.name.clone(),
            column: namespace.virtual_column(&c.name),
            rule: ai_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(value)
                .to_string(),
        }),
        _ => None,
    });
    mappings.chain(columns).collect()
}

/// Substitute `{{Column}}` in a rule with the row's values.
pub fn hydrate_rule(rule: &str, row: &Row) -> String {
    PLACEHOLDER_RE
        .replace_all(rule, |caps: &regex::Captures| {
            row.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .into_owned()
}

/// Drop tasks whose reserved column is already claimed by an earlier task.
pub fn dedupe_rule_tasks(tasks: Vec<RuleTask>) -> (Vec<RuleTask>, Vec<Diagnostic>) {
    let mut claimed = HashSet::new();
    let mut kept = Vec::with_capacity(tasks.len());
    let mut diagnostics = Vec::new();
    for task in tasks {
        if claimed.insert(task.column.clone()) {
            kept.push(task);
        } else {
            diagnostics.push(Diagnostic::new(
                None,
                DiagnosticKind::DuplicateRuleOutput,
                format!("rule for '{}' ignored: column '{}' is already computed", task.field, task.column),
            ));
        }
    }
    (kept, diagnostics)
}

/// Point rule mappings of `scheme` at their reserved columns and turn AI
/// columns into copies of theirs.
pub fn rewrite_scheme(scheme: &MappingScheme, namespace: &RuleNamespace) -> MappingScheme {
    let mut rewritten = scheme.clone();

    for mapping in &mut rewritten.direct_mappings {
        if mapping.rule_text().is_some() {
            mapping.source_column = namespace.column(&mapping.key());
            mapping.transform = None;
            mapping.rule = None;
        }
    }

    for column in &mut rewritten.virtual_columns {
        if column.kind.is_ai() {
            column.kind = VirtualKind::Column {
                source: namespace.virtual_column(&column.name),
            };
        }
    }

    rewritten
}

/// Evaluate every rule of `scheme` for every row, chunk by chunk.
///
/// Rows of one chunk are evaluated concurrently; the next chunk starts only
/// once the whole chunk has settled. Progress is reported after each chunk.
pub async fn preprocess_rules<O: RuleOracle>(
    rows: &[Row],
    scheme: &MappingScheme,
    oracle: &O,
    options: &PreprocessOptions,
) -> PreprocessOutput {
    let namespace = options.namespace();
    let (tasks, mut diagnostics) = dedupe_rule_tasks(collect_rule_tasks(scheme, &namespace));
    let mut output_rows = rows.to_vec();
    let mut failures = Vec::new();

    if tasks.is_empty() {
        return PreprocessOutput {
            rows: output_rows,
            scheme: scheme.clone(),
            failures,
            diagnostics,
        };
    }
    for diagnostic in &diagnostics {
        log_diagnostic(diagnostic, 1);
    }

    let total = rows.len();
    let chunk_size = options.chunk_size.max(1);
    log_info(format!(
        "Evaluating {} rule(s) for {} rows in chunks of {}",
        tasks.len(),
        total,
        chunk_size
    ));

    let mut completed = 0;
    for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
        let offset = chunk_index * chunk_size;
        let futures = chunk
            .iter()
            .enumerate()
            .map(|(i, row)| evaluate_row(offset + i, row, &tasks, oracle));

        for (row_index, results) in join_all(futures).await {
            for (task, result) in tasks.iter().zip(results) {
                let value = match result {
                    Ok(value) => value,
                    Err(message) => {
                        failures.push(RuleFailure {
                            row: row_index,
                            field: task.field.clone(),
                            message,
                        });
                        String::new()
                    }
                };
                output_rows[row_index].insert(task.column.clone(), Value::String(value));
            }
        }

        completed += chunk.len();
        if let Some(callback) = &options.on_progress {
            callback(completed, total);
        }
    }
    if total == 0 {
        if let Some(callback) = &options.on_progress {
            callback(0, 0);
        }
    }

    let failure_diagnostics: Vec<Diagnostic> = failures
        .iter()
        .map(|f| {
            Diagnostic::new(
                Some(f.row),
                DiagnosticKind::RuleEvaluationFailure,
                format!("rule for '{}' failed on row {}: {}", f.field, f.row + 1, f.message),
            )
        })
        .collect();
    for diagnostic in failure_diagnostics.iter().take(3) {
        log_diagnostic(diagnostic, 1);
    }
    diagnostics.extend(failure_diagnostics);
    log_success(format!(
        "Rules evaluated: {} ok, {} failed",
        total * tasks.len() - failures.len(),
        failures.len()
    ));

    PreprocessOutput {
        rows: output_rows,
        scheme: rewrite_scheme(scheme, &namespace),
        failures,
        diagnostics,
    }
}

async fn evaluate_row<O: RuleOracle>(
    row_index: usize,
    row: &Row,
    tasks: &[RuleTask],
    oracle: &O,
) -> (usize, Vec<Result<String, String>>) {
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        let rule = hydrate_rule(&task.rule, row);
        let result = match oracle.evaluate(&rule, row).await {
            Ok(RuleOutcome { error: Some(error), .. }) => Err(error),
            Ok(outcome) => Ok(outcome.result),
            Err(e) => Err(e.to_string()),
        };
        results.push(result);
    }
    (row_index, results)
}
