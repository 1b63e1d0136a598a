//! Reference renderer for UTF-8 text templates.
//!
//! ```text
//! Dear {{Name}},
//! {#Items}- {{ProductName}} ({{Order}})
//! {/Items}
//! ```
//!
//! `{{key}}` is replaced by the record value. A `{#loop}...{/loop}` section is
//! repeated once per child of the loop array; inside it keys resolve against
//! the child first, then the enclosing scopes. A non-array section value
//! renders its body once when truthy.

use serde_json::{Map, Value};

use super::Renderer;
use crate::error::RenderError;
use crate::models::{is_empty, value_to_string, ResolvedRecord};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    Section { name: String, body: Vec<Node> },
}

/// `{{key}}` / `{#loop}` text renderer.
#[derive(Debug, Clone, Default)]
pub struct TextTemplateRenderer {
    strict: bool,
}

impl TextTemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`RenderError::UndefinedVariable`] on unknown keys instead
    /// of rendering them empty.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Render a template string against a record.
    pub fn render_str(&self, template: &str, record: &ResolvedRecord) -> Result<String, RenderError> {
        let nodes = parse(template)?;
        let mut out = String::with_capacity(template.len());
        let scopes = vec![record.fields()];
        self.render_nodes(&nodes, &scopes, &mut out)?;
        Ok(out)
    }

    fn render_nodes<'a>(
        &self,
        nodes: &[Node],
        scopes: &[&'a Map<String, Value>],
        out: &mut String,
    ) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var(key) => match lookup(scopes, key) {
                    Some(value) => out.push_str(&display(value)),
                    None if self.strict => return Err(RenderError::UndefinedVariable(key.clone())),
                    None => {}
                },
                Node::Section { name, body } => match lookup(scopes, name) {
                    Some(Value::Array(items)) => {
                        for item in items {
                            let mut inner: Vec<&Map<String, Value>> = scopes.to_vec();
                            if let Value::Object(child) = item {
                                inner.push(child);
                            }
                            self.render_nodes(body, &inner, out)?;
                        }
                    }
                    Some(Value::Bool(false)) => {}
                    Some(value) if is_empty(value) => {}
                    Some(Value::Object(child)) => {
                        let mut inner: Vec<&Map<String, Value>> = scopes.to_vec();
                        inner.push(child);
                        self.render_nodes(body, &inner, out)?;
                    }
                    Some(_) => self.render_nodes(body, scopes, out)?,
                    None if self.strict => return Err(RenderError::UndefinedVariable(name.clone())),
                    None => {}
                },
            }
        }
        Ok(())
    }
}

impl Renderer for TextTemplateRenderer {
    async fn render(&self, template: &[u8], record: &ResolvedRecord) -> Result<Vec<u8>, RenderError> {
        let template = std::str::from_utf8(template)
            .map_err(|e| RenderError::Decode(format!("template is not UTF-8: {}", e)))?;
        self.render_str(template, record).map(String::into_bytes)
    }
}

fn lookup<'a>(scopes: &[&'a Map<String, Value>], key: &str) -> Option<&'a Value> {
    scopes.iter().rev().find_map(|scope| scope.get(key))
}

fn display(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        other => value_to_string(other),
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn parse(template: &str) -> Result<Vec<Node>, RenderError> {
    // (name, nodes) per open section; the root has no name
    let mut stack: Vec<(Option<String>, Vec<Node>)> = vec![(None, Vec::new())];
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let (node_kind, consumed) = if let Some(body) = tail.strip_prefix("{{") {
            let end = body
                .find("}}")
                .ok_or_else(|| RenderError::MalformedTemplate(format!("unclosed tag '{}'", preview(tail))))?;
            (Tag::Var(body[..end].trim().to_string()), 2 + end + 2)
        } else if let Some(body) = tail.strip_prefix("{#").or_else(|| tail.strip_prefix("{/")) {
            let end = body
                .find('}')
                .ok_or_else(|| RenderError::MalformedTemplate(format!("unclosed tag '{}'", preview(tail))))?;
            let name = body[..end].trim().to_string();
            let tag = if tail.starts_with("{#") { Tag::Open(name) } else { Tag::Close(name) };
            (tag, 2 + end + 1)
        } else {
            text.push('{');
            rest = &tail[1..];
            continue;
        };

        if !text.is_empty() {
            current(&mut stack).push(Node::Text(std::mem::take(&mut text)));
        }

        match node_kind {
            Tag::Var(key) if key.is_empty() => {
                return Err(RenderError::MalformedTemplate("empty tag '{{}}'".to_string()))
            }
            Tag::Var(key) => current(&mut stack).push(Node::Var(key)),
            Tag::Open(name) => stack.push((Some(name), Vec::new())),
            Tag::Close(name) => {
                let (open, body) = match stack.pop() {
                    Some((Some(open), body)) => (open, body),
                    _ => {
                        return Err(RenderError::MalformedTemplate(format!(
                            "'{{/{}}}' closes nothing",
                            name
                        )))
                    }
                };
                if open != name {
                    return Err(RenderError::MalformedTemplate(format!(
                        "'{{#{}}}' closed by '{{/{}}}'",
                        open, name
                    )));
                }
                current(&mut stack).push(Node::Section { name, body });
            }
        }

        rest = &tail[consumed..];
    }

    text.push_str(rest);
    if !text.is_empty() {
        current(&mut stack).push(Node::Text(text));
    }

    match stack.pop() {
        Some((None, nodes)) if stack.is_empty() => Ok(nodes),
        Some((Some(open), _)) => Err(RenderError::MalformedTemplate(format!(
            "section '{{#{}}}' is never closed",
            open
        ))),
        _ => Err(RenderError::MalformedTemplate("unbalanced sections".to_string())),
    }
}

enum Tag {
    Var(String),
    Open(String),
    Close(String),
}

fn current(stack: &mut [(Option<String>, Vec<Node>)]) -> &mut Vec<Node> {
    // the root frame is never popped before the end of parsing
    let last = stack.len() - 1;
    &mut stack[last].1
}

fn preview(s: &str) -> String {
    s.chars().take(20).collect()
}
