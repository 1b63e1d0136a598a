//! Transform expressions attached to field mappings.
//!
//! A transform is parsed once into an ordered list of [`Operation`]s and then
//! applied to every value of the mapped column.
//!
//! ```text
//! trim | uppercase                       pipe syntax
//! pad_start(6, "0") | ensure_prefix(#)   calls with positional arguments
//! [{"type": "trim"}]                     JSON array of tagged operations
//! ```

use serde_json::Value;

use super::lexer::{tokenize, Token};
use super::operations::Operation;

/// A parsed, allow-listed transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformExpr {
    operations: Vec<Operation>,
}

impl TransformExpr {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// Parse a transform string in either syntax.
    pub fn parse(source: &str) -> Result<Self, String> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Ok(Self::identity());
        }
        if trimmed.starts_with('[') && trimmed.contains("\"type\"") {
            let operations: Vec<Operation> = serde_json::from_str(trimmed)
                .map_err(|e| format!("invalid JSON operation list: {}", e))?;
            return Ok(Self { operations });
        }
        parse_pipeline(trimmed).map(|operations| Self { operations })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_identity(&self) -> bool {
        self.operations.is_empty()
    }

    /// Apply operations in sequence.
    pub fn apply(&self, value: &Value) -> Value {
        self.operations
            .iter()
            .fold(value.clone(), |current, op| op.apply(&current))
    }
}

fn parse_pipeline(source: &str) -> Result<Vec<Operation>, String> {
    let tokens = tokenize(source)?;
    let mut operations = Vec::new();

    for step in tokens.split(|t| *t == Token::Pipe) {
        let (name, rest) = match step.split_first() {
            Some((Token::Ident(name), rest)) => (name, rest),
            Some((other, _)) => return Err(format!("expected operation name, found {:?}", other)),
            None => return Err("empty step in transform pipeline".to_string()),
        };
        let args = parse_arguments(rest)?;
        operations.push(Operation::from_call(name, &args)?);
    }

    Ok(operations)
}

/// `( arg, arg, ... )` or nothing.
fn parse_arguments(tokens: &[Token]) -> Result<Vec<String>, String> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let inner = match (tokens.first(), tokens.last()) {
        (Some(Token::LParen), Some(Token::RParen)) => &tokens[1..tokens.len() - 1],
        _ => return Err("operation arguments must be wrapped in parentheses".to_string()),
    };

    let mut args = Vec::new();
    for part in inner.split(|t| *t == Token::Comma) {
        match part {
            [] if inner.is_empty() => {}
            [Token::Str(s)] | [Token::Ident(s)] => args.push(s.clone()),
            [Token::Num(n)] => args.push(crate::models::value_to_string(&crate::models::number_value(*n))),
            other => return Err(format!("unsupported argument {:?}", other)),
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pipeline() {
        let expr = TransformExpr::parse(r#"trim | pad_start(6, "0") | ensure_prefix("INV-")"#).unwrap();
        assert_eq!(expr.operations().len(), 3);
        assert_eq!(expr.apply(&json!(" 42 ")), json!("INV-000042"));
    }

    #[test]
    fn test_parse_json_form() {
        let expr = TransformExpr::parse(
            r#"[{"type": "map", "mapping": {"M": "Male"}, "case_insensitive": true}, {"type": "uppercase"}]"#,
        )
        .unwrap();
        assert_eq!(expr.apply(&json!("m")), json!("MALE"));
    }

    #[test]
    fn test_empty_is_identity() {
        let expr = TransformExpr::parse("  ").unwrap();
        assert!(expr.is_identity());
        assert_eq!(expr.apply(&json!(5)), json!(5));
    }

    #[test]
    fn test_arbitrary_code_is_rejected() {
        assert!(TransformExpr::parse("value.toUpperCase()").is_err());
        assert!(TransformExpr::parse("eval(\"1+1\")").is_err());
        assert!(TransformExpr::parse("trim |").is_err());
    }

    #[test]
    fn test_numeric_arguments() {
        let expr = TransformExpr::parse("round(2)").unwrap();
        assert_eq!(expr.apply(&json!("2.346")), json!(2.35));
    }
}
