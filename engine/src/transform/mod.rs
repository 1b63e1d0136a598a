//! Restricted expression layer.
//!
//! Mapping schemes carry two kinds of small expressions, both parsed here
//! into allow-listed forms instead of being evaluated as code:
//! - `transform` on a field mapping: a pipeline of [`Operation`]s
//! - `filterExpression` on a scheme: a boolean [`FilterExpr`] over a row

pub mod expr;
pub mod filter;
pub mod lexer;
pub mod operations;

pub use expr::TransformExpr;
pub use filter::FilterExpr;
pub use operations::{operations_description, Operation};
