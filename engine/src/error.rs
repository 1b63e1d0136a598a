//! Error types for the docbatch engine.
//!
//! Only failures that stop a stage are modelled here:
//!
//! - [`TableError`] - loading tables from CSV or JSON
//! - [`SchemeError`] - reading a persisted mapping scheme
//! - [`ResolveError`] - configuration errors that abort a resolution pass
//! - [`RenderError`] - a rendering engine failure for one record
//! - [`AiError`] - oracle / HTTP client errors
//! - [`BatchError`] - a batch stopped early (`continue_on_error = false`)
//! - [`PipelineError`] - top-level orchestration errors
//!
//! Recoverable per-row problems (missing join keys, unmatched lookups, failed
//! rules) are not errors; they surface as [`crate::resolve::Diagnostic`]s.

use thiserror::Error;

// =============================================================================
// Table Loading Errors
// =============================================================================

/// Errors while loading tables.
#[derive(Debug, Error)]
pub enum TableError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to decode bytes.
    #[error("Failed to decode content: {0}")]
    EncodingError(String),

    /// Invalid CSV content.
    #[error("Invalid CSV at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Invalid JSON table set.
    #[error("Invalid table JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Empty file.
    #[error("Table file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No headers found in CSV")]
    NoHeaders,

    /// Path is neither a CSV, a JSON file nor a directory.
    #[error("Unsupported table source: {0}")]
    UnsupportedSource(String),
}

// =============================================================================
// Scheme Errors
// =============================================================================

/// Errors reading or validating a mapping scheme document.
#[derive(Debug, Error)]
pub enum SchemeError {
    /// JSON serialization/deserialization error.
    #[error("Scheme JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Document version this build cannot read.
    #[error("Unsupported scheme document version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Structural validation against the embedded schema failed.
    #[error("Scheme failed validation: {errors:?}")]
    Invalid { errors: Vec<String> },
}

// =============================================================================
// Resolution Errors
// =============================================================================

/// Configuration errors that make a resolution pass impossible.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The declared primary table is not part of the table set.
    #[error("Primary table '{table}' not found (available: {available:?})")]
    PrimaryTableNotFound {
        table: String,
        available: Vec<String>,
    },

    /// The filter expression could not be parsed.
    #[error("Invalid filter expression '{expression}': {message}")]
    InvalidFilter { expression: String, message: String },
}

// =============================================================================
// Render Errors
// =============================================================================

/// Failure categories reported by a rendering engine.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Template structure is broken (unclosed tag, mismatched section).
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    /// Template references a key the record does not provide.
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    /// Template or output bytes could not be decoded / encoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Any other engine failure.
    #[error("Render engine failed: {0}")]
    Engine(String),
}

// =============================================================================
// AI Client Errors
// =============================================================================

/// Errors from the AI client.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing API key.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Response body was not the expected JSON.
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    /// API returned an error status.
    #[error("API error: {0}")]
    ApiError(String),

    /// The oracle answered but the answer was unusable.
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

// =============================================================================
// Batch Errors
// =============================================================================

/// Errors stopping a generation batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A record failed and `continue_on_error` was disabled.
    #[error("Batch aborted at record {index}: {source}")]
    Aborted {
        index: usize,
        #[source]
        source: RenderError,
    },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::pipeline::generate_documents`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Table loading error.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Scheme error.
    #[error("Scheme error: {0}")]
    Scheme(#[from] SchemeError),

    /// Fatal configuration error.
    #[error("Configuration error: {0}")]
    Resolve(#[from] ResolveError),

    /// Batch error.
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// AI client error.
    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The template has no content.
    #[error("Template is empty")]
    EmptyTemplate,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for table loading.
pub type TableResult<T> = Result<T, TableError>;

/// Result type for scheme documents.
pub type SchemeResult<T> = Result<T, SchemeError>;

/// Result type for resolution passes.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type for AI operations.
pub type AiResult<T> = Result<T, AiError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let table_err = TableError::EmptyFile;
        let pipeline_err: PipelineError = table_err.into();
        assert!(pipeline_err.to_string().contains("empty"));

        let resolve_err = ResolveError::PrimaryTableNotFound {
            table: "Orders".into(),
            available: vec!["Customers".into()],
        };
        let pipeline_err: PipelineError = resolve_err.into();
        assert!(pipeline_err.to_string().contains("Orders"));
        assert!(pipeline_err.to_string().contains("Customers"));
    }

    #[test]
    fn test_batch_error_keeps_source() {
        let err = BatchError::Aborted {
            index: 3,
            source: RenderError::UndefinedVariable("Total".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("record 3"));
        assert!(msg.contains("Total"));
    }
}
