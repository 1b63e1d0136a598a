//! Row predicates for `filterExpression`.
//!
//! ```text
//! expr       := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := operand ( op operand )?
//! operand    := column | "string" | number | true | false | null
//! column     := Name | [Column Name] | row.Name | row["Column Name"]
//! op         := == != > >= < <= contains
//! ```

use std::cmp::Ordering;

use serde_json::Value;

use super::lexer::{tokenize, Token};
use crate::models::{is_empty, parse_number, value_to_string, Row};

/// A parsed filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    source: String,
    node: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Or(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare(Operand, CompareOp, Operand),
    Truthy(Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Column(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl FilterExpr {
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err("empty filter expression".to_string());
        }
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let node = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(format!("unexpected token {:?}", extra));
        }
        Ok(Self {
            source: source.trim().to_string(),
            node,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Columns referenced by the predicate.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_columns(&self.node, &mut out);
        out
    }

    pub fn matches(&self, row: &Row) -> bool {
        eval(&self.node, row)
    }
}

fn collect_columns(node: &Node, out: &mut Vec<String>) {
    let mut push = |operand: &Operand| {
        if let Operand::Column(name) = operand {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
    };
    match node {
        Node::Or(a, b) | Node::And(a, b) => {
            collect_columns(a, out);
            collect_columns(b, out);
        }
        Node::Not(inner) => collect_columns(inner, out),
        Node::Compare(l, _, r) => {
            push(l);
            push(r);
        }
        Node::Truthy(op) => push(op),
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn eval(node: &Node, row: &Row) -> bool {
    match node {
        Node::Or(a, b) => eval(a, row) || eval(b, row),
        Node::And(a, b) => eval(a, row) && eval(b, row),
        Node::Not(inner) => !eval(inner, row),
        Node::Truthy(op) => truthy(&resolve(op, row)),
        Node::Compare(l, op, r) => compare(&resolve(l, row), *op, &resolve(r, row)),
    }
}

fn resolve(operand: &Operand, row: &Row) -> Value {
    match operand {
        Operand::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
        Operand::Literal(v) => v.clone(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => !is_empty(other),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if op == CompareOp::Contains {
        return value_to_string(left).contains(&value_to_string(right));
    }

    let ordering = match (parse_number(left), parse_number(right)) {
        (Some(a), Some(b)) if !left.is_boolean() && !right.is_boolean() => a.partial_cmp(&b),
        _ => Some(value_to_string(left).trim().cmp(value_to_string(right).trim())),
    };
    let Some(ordering) = ordering else {
        return false;
    };

    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Contains => false,
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if *t == expected => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", expected, t)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    fn parse_or(&mut self) -> Result<Node, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, String> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Node, String> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Ident(word)) if word == "contains" => CompareOp::Contains,
            _ => return Ok(Node::Truthy(left)),
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Node::Compare(left, op, right))
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s.clone()))),
            Some(Token::Num(n)) => Ok(Operand::Literal(crate::models::number_value(*n))),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Operand::Literal(Value::Bool(true))),
                "false" => Ok(Operand::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Operand::Literal(Value::Null)),
                "row" if self.peek() == Some(&Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(name)) => Ok(Operand::Column(name.clone())),
                        other => Err(format!("expected column after 'row.', found {:?}", other)),
                    }
                }
                "row" if self.peek() == Some(&Token::LBracket) => {
                    self.pos += 1;
                    let name = match self.next() {
                        Some(Token::Str(name)) => name.clone(),
                        other => return Err(format!("expected quoted column, found {:?}", other)),
                    };
                    self.expect(Token::RBracket)?;
                    Ok(Operand::Column(name))
                }
                _ => Ok(Operand::Column(word.clone())),
            },
            Some(other) => Err(format!("expected value or column, found {:?}", other)),
            None => Err("unexpected end of filter expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_numeric_and_string_comparison() {
        let filter = FilterExpr::parse(r#"Amount >= 100 && Status != "void""#).unwrap();
        assert!(filter.matches(&row(json!({"Amount": "1,200", "Status": "paid"}))));
        assert!(!filter.matches(&row(json!({"Amount": 99, "Status": "paid"}))));
        assert!(!filter.matches(&row(json!({"Amount": 500, "Status": "void"}))));
    }

    #[test]
    fn test_column_reference_forms() {
        let r = row(json!({"Unit Price": 12, "Dept": "Sales"}));
        assert!(FilterExpr::parse("[Unit Price] > 10").unwrap().matches(&r));
        assert!(FilterExpr::parse(r#"row["Unit Price"] === 12"#).unwrap().matches(&r));
        assert!(FilterExpr::parse(r#"row.Dept == 'Sales'"#).unwrap().matches(&r));
        assert!(FilterExpr::parse(r#"Dept contains "al""#).unwrap().matches(&r));
    }

    #[test]
    fn test_truthiness_and_grouping() {
        let filter = FilterExpr::parse("!(Email) || (Active == true)").unwrap();
        assert!(filter.matches(&row(json!({"Email": ""}))));
        assert!(filter.matches(&row(json!({"Email": "a@b.c", "Active": true}))));
        assert!(!filter.matches(&row(json!({"Email": "a@b.c", "Active": false}))));
        assert_eq!(filter.columns(), vec!["Email", "Active"]);
    }

    #[test]
    fn test_null_matches_missing() {
        let filter = FilterExpr::parse("Manager == null").unwrap();
        assert!(filter.matches(&row(json!({"Name": "Alice"}))));
        assert!(!filter.matches(&row(json!({"Manager": "Bob"}))));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(FilterExpr::parse("").is_err());
        assert!(FilterExpr::parse("Amount >").is_err());
        assert!(FilterExpr::parse("(Amount > 1").is_err());
        assert!(FilterExpr::parse("Amount > 1 Status").is_err());
        assert!(FilterExpr::parse("row.").is_err());
    }
}
