//! End-to-end generation: tables + scheme + template → documents.
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Rules   │──▶│  Resolve   │──▶│ ResolvedRecord[] │──▶│   Batch   │──▶ artifacts
//! │ (oracle) │   │ or Aggregate│  │                  │   │ (render)  │
//! └──────────┘   └────────────┘   └──────────────────┘   └───────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::logs::{log_info, log_success, log_warning};
use crate::models::{GeneratedArtifact, ResolvedRecord, TableSet};
use crate::render::{run_batch, BatchOptions, BatchStats, NamingStrategy, RenderFailure, Renderer};
use crate::resolve::{
    aggregate, aggregate_records, infer_aggregate_config, prepare_primary_rows, resolve_records, Diagnostic,
    DiagnosticKind, ResolveOptions, ResolveStats,
};
use crate::rules::{preprocess_rules, PreprocessOptions, RuleOracle};
use crate::scheme::MappingScheme;

/// One document per primary row, or one per aggregate summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    PerRow,
    Aggregate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerateOptions {
    pub mode: GenerationMode,
    pub base_name: String,
    pub extension: Option<String>,
    pub resolve: ResolveOptions,
    pub preprocess: PreprocessOptions,
    pub batch: BatchOptions,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            mode: GenerationMode::PerRow,
            base_name: "document".to_string(),
            extension: None,
            resolve: ResolveOptions::default(),
            preprocess: PreprocessOptions::default(),
            batch: BatchOptions::default(),
        }
    }
}

impl GenerateOptions {
    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    fn naming(&self) -> NamingStrategy {
        let naming = NamingStrategy::new(self.base_name.clone());
        match &self.extension {
            Some(ext) => naming.with_extension(ext.clone()),
            None => naming,
        }
    }
}

/// Everything a generation run produced.
#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub mode: GenerationMode,
    pub artifacts: Vec<GeneratedArtifact>,
    pub stats: BatchStats,
    pub failures: Vec<RenderFailure>,
    /// Rule and resolution diagnostics.
    pub diagnostics: Vec<Diagnostic>,
    /// Per-row mode only.
    pub resolve_stats: Option<ResolveStats>,
}

impl GenerateOutput {
    pub fn diagnostic_count(&self, kind: DiagnosticKind) -> usize {
        crate::resolve::count_kind(&self.diagnostics, kind)
    }
}

/// Records to render, before any rendering happens.
#[derive(Debug, Clone)]
pub struct PreparedRecords {
    pub records: Vec<ResolvedRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub resolve_stats: Option<ResolveStats>,
}

/// Run rule preprocessing when the scheme needs it and an oracle is given.
///
/// Returns the tables and scheme to resolve with, plus rule diagnostics.
pub async fn apply_rules<O: RuleOracle>(
    tables: &TableSet,
    scheme: &MappingScheme,
    oracle: Option<&O>,
    options: &PreprocessOptions,
) -> (TableSet, MappingScheme, Vec<Diagnostic>) {
    if !scheme.has_rules() {
        return (tables.clone(), scheme.clone(), Vec::new());
    }
    let (Some(oracle), Some(primary)) = (oracle, tables.get(&scheme.primary_table)) else {
        if oracle.is_none() {
            log_warning("Scheme has rules but no oracle is configured; rule fields stay empty");
        }
        return (tables.clone(), scheme.clone(), Vec::new());
    };

    let output = preprocess_rules(primary, scheme, oracle, options).await;
    let mut tables = tables.clone();
    tables.insert(scheme.primary_table.clone(), output.rows);
    (tables, output.scheme, output.diagnostics)
}

/// Resolve or aggregate the records a run will render.
pub fn prepare_records(
    tables: &TableSet,
    scheme: &MappingScheme,
    mode: GenerationMode,
    options: &ResolveOptions,
) -> Result<PreparedRecords, PipelineError> {
    match mode {
        GenerationMode::PerRow => {
            let resolution = resolve_records(tables, scheme, options)?;
            Ok(PreparedRecords {
                records: resolution.records,
                diagnostics: resolution.diagnostics,
                resolve_stats: Some(resolution.stats),
            })
        }
        GenerationMode::Aggregate => {
            let mut diagnostics = Vec::new();
            let rows = prepare_primary_rows(tables, scheme, &mut diagnostics)?;
            let config = match &scheme.aggregate_config {
                Some(config) if !config.rules.is_empty() => config.clone(),
                _ => {
                    let mut placeholders: Vec<String> = scheme.direct_mappings.iter().map(|m| m.key()).collect();
                    placeholders.extend(scheme.unmapped_placeholders.iter().cloned());
                    let inferred = infer_aggregate_config(&placeholders, &tables.headers(&scheme.primary_table));
                    log_info(format!("No aggregate rules configured, inferred {}", inferred.rules.len()));
                    inferred
                }
            };
            let summaries = aggregate(&rows, &config);
            log_success(format!("Aggregated {} rows into {} summaries", rows.len(), summaries.len()));
            Ok(PreparedRecords {
                records: aggregate_records(summaries, scheme, &mut diagnostics),
                diagnostics,
                resolve_stats: None,
            })
        }
    }
}

/// Preprocess rules, resolve (or aggregate), then render every record.
pub async fn generate_documents<R: Renderer, O: RuleOracle>(
    template: &[u8],
    tables: &TableSet,
    scheme: &MappingScheme,
    renderer: &R,
    oracle: Option<&O>,
    options: &GenerateOptions,
) -> Result<GenerateOutput, PipelineError> {
    if template.is_empty() {
        return Err(PipelineError::EmptyTemplate);
    }

    let (tables, scheme, mut diagnostics) = apply_rules(tables, scheme, oracle, &options.preprocess).await;
    let prepared = prepare_records(&tables, &scheme, options.mode, &options.resolve)?;
    diagnostics.extend(prepared.diagnostics);

    let naming = match options.mode {
        GenerationMode::PerRow => options.naming(),
        GenerationMode::Aggregate => options.naming().for_summaries(prepared.records.len()),
    };

    let batch = run_batch(renderer, template, &prepared.records, &naming, &options.batch).await?;

    Ok(GenerateOutput {
        mode: options.mode,
        artifacts: batch.artifacts,
        stats: batch.stats,
        failures: batch.failures,
        diagnostics,
        resolve_stats: prepared.resolve_stats,
    })
}
