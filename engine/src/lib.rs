//! # Docbatch - mapping resolution and batch document generation
//!
//! Docbatch turns tabular data into one document per record: a mapping
//! scheme says where each template placeholder gets its value (a column, a
//! joined table, a repeated section, a computed rule), and a rendering
//! engine produces the bytes.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │   Tables   │──▶│    Rules    │──▶│   Resolve   │──▶│    Batch    │──▶│ Artifacts │
//! │ (CSV/JSON) │   │  (oracle)   │   │ (index+join)│   │  (render)   │   │  (bytes)  │
//! └────────────┘   └─────────────┘   └─────────────┘   └─────────────┘   └───────────┘
//!                        ▲                  ▲
//!                        └── MappingScheme ─┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docbatch::{generate_documents, load_scheme, load_tables, GenerateOptions, TextTemplateRenderer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tables = load_tables("data/").unwrap();
//!     let scheme = load_scheme(&std::fs::read_to_string("scheme.json").unwrap()).unwrap();
//!     let output = generate_documents(
//!         b"Dear {{Name}}",
//!         &tables,
//!         &scheme,
//!         &TextTemplateRenderer::new(),
//!         None::<&docbatch::AiClient>,
//!         &GenerateOptions::default(),
//!     )
//!     .await
//!     .unwrap();
//!     println!("Generated {} documents", output.artifacts.len());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`logs`] - Log broadcaster
//! - [`models`] - Rows, table sets, resolved records, artifacts
//! - [`scheme`] - Mapping scheme model and persistence
//! - [`transform`] - Transform and filter expressions
//! - [`validation`] - Scheme checks and JSON Schema validation
//! - [`resolve`] - Lookup indexes, joins, loops, aggregation
//! - [`rules`] - Rule preprocessing through an oracle
//! - [`render`] - Batch orchestration and the text renderer
//! - [`parser`] - CSV / JSON table loading
//! - [`ai`] - AI-backed rule oracle and scheme suggestion
//! - [`pipeline`] - End-to-end generation

// Core modules
pub mod error;
pub mod logs;
pub mod models;

// Configuration
pub mod scheme;
pub mod transform;
pub mod validation;

// Resolution
pub mod resolve;
pub mod rules;

// Output
pub mod render;

// Collaborators
pub mod ai;
pub mod parser;

// Orchestration
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{AiError, BatchError, PipelineError, RenderError, ResolveError, SchemeError, TableError};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{GeneratedArtifact, ProgressCallback, ResolvedRecord, Row, TableSet};

// =============================================================================
// Re-exports - Scheme
// =============================================================================

pub use scheme::{
    load_scheme, parse_scheme_response, AggregateConfig, AggregateOp, AggregateRule, CrossTableMapping,
    FieldMapping, LoopKind, LoopMapping, MappingScheme, SchemeDocument, SchemeParseOutcome, VirtualColumn,
    VirtualKind,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{check_scheme, detect_relationships, suggest_primary_table, SchemeReport};

// =============================================================================
// Re-exports - Resolution
// =============================================================================

pub use resolve::{
    aggregate, aggregate_records, infer_aggregate_config, resolve_records, Diagnostic, DiagnosticKind,
    LookupIndex, Resolution, ResolveOptions, ResolveStats,
};

// =============================================================================
// Re-exports - Rules
// =============================================================================

pub use rules::{preprocess_rules, PreprocessOptions, PreprocessOutput, RuleOracle, RuleOutcome};

// =============================================================================
// Re-exports - Rendering
// =============================================================================

pub use render::{run_batch, BatchOptions, BatchOutput, BatchStats, NamingStrategy, Renderer, TextTemplateRenderer};

// =============================================================================
// Re-exports - Collaborators
// =============================================================================

pub use ai::AiClient;
pub use parser::load_tables;

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{generate_documents, GenerateOptions, GenerateOutput, GenerationMode};
