//! Prompts for rule evaluation and scheme suggestion.

use serde_json::{json, Value};

use crate::models::{Row, TableSet};
use crate::transform::operations_description;

/// Rows of each table shown to the model when suggesting a scheme.
pub const PREVIEW_ROWS: usize = 5;

/// The mapping scheme JSON schema (embedded at compile time).
const SCHEME_SCHEMA: &str = include_str!("../../schemas/mapping-scheme.json");

/// System prompt for per-row rule evaluation.
pub fn rule_system_prompt() -> String {
    r#"You evaluate one data-processing rule against one table row.

## Output Format

Return ONLY a JSON object:

```json
{"result": "<value to insert into the document>", "error": null}
```

If the rule cannot be applied to this row, return `{"result": "", "error": "<short reason>"}`.

## Rules

1. `result` is always a string, with no surrounding quotes or commentary
2. Use only the values present in the row; do not invent data
3. Keep the answer as short as the rule allows"#
        .to_string()
}

/// User message for one rule and one row.
pub fn rule_user_prompt(rule: &str, row: &Row) -> String {
    let row_json = serde_json::to_string_pretty(row).unwrap_or_else(|_| "{}".to_string());
    format!("## Rule\n\n{}\n\n## Row\n\n```json\n{}\n```", rule, row_json)
}

/// System prompt for mapping-scheme suggestion.
pub fn scheme_system_prompt() -> String {
    format!(
        r#"You are a document-automation expert. Your task is to map the placeholders of a document template onto the columns of one or more tables.

## Your Mission

Given:
1. The template placeholders (`{{{{Name}}}}` fields and `{{#Loop}}` sections)
2. A preview of every table (name, headers, first rows)
3. An optional user instruction

Return a mapping scheme that says, for each placeholder, where its value comes from.

## CRITICAL: Output Format

You MUST return ONLY valid JSON matching this schema EXACTLY:

```json
{scheme_schema}
```

## Mapping kinds

- `directMappings`: placeholder ← column of the primary table
- `crossTableMappings`: placeholder ← column of another table, joined on `joinKey`
- `loopMappings`: a `{{#Loop}}` section, either `group_by` (rows sharing a column value) or `lookup` (rows of another table whose `foreignKey` equals the primary row's)
- `virtualColumns`: values that exist in no table (`const`, `variable`, `ai`, or `column` copying another column)
- `aggregateConfig`: only when the document summarizes many rows into one

## Transform Expressions

A mapping may carry a `transform` applied to the column value: {operations}

## Rules

1. Use exact table and column names from the preview (case-sensitive)
2. Choose as `primaryTable` the table with one row per output document
3. Leave placeholders you cannot map in `unmappedPlaceholders`
4. Do NOT invent tables or columns
5. Return ONLY the JSON object, no explanations or markdown"#,
        scheme_schema = SCHEME_SCHEMA,
        operations = operations_description(),
    )
}

/// User message describing placeholders, tables and the instruction.
pub fn scheme_user_prompt(placeholders: &[String], tables: &TableSet, instruction: Option<&str>) -> String {
    let previews: Vec<Value> = tables
        .iter()
        .map(|(name, rows)| {
            json!({
                "name": name,
                "rowCount": rows.len(),
                "headers": tables.headers(name),
                "preview": rows.iter().take(PREVIEW_ROWS).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut prompt = format!(
        "## Template placeholders\n\n{}\n\n## Tables\n\n```json\n{}\n```",
        placeholders.join("\n"),
        serde_json::to_string_pretty(&previews).unwrap_or_else(|_| "[]".to_string()),
    );
    if let Some(instruction) = instruction.filter(|i| !i.trim().is_empty()) {
        prompt.push_str(&format!("\n\n## Instruction\n\n{}", instruction.trim()));
    }
    prompt
}

/// Messages array for the Messages API.
pub fn build_messages(user_prompt: String) -> Value {
    json!([{ "role": "user", "content": user_prompt }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_prompt_embeds_schema() {
        let prompt = scheme_system_prompt();
        assert!(prompt.contains("primaryTable"));
        assert!(prompt.contains("{{Name}}"));
        assert!(prompt.contains("uppercase"));
    }

    #[test]
    fn test_scheme_user_prompt() {
        let rows: Vec<Row> = (0..8)
            .map(|i| json!({"Id": i}).as_object().cloned().unwrap())
            .collect();
        let tables = TableSet::new().with_table("Orders", rows);
        let prompt = scheme_user_prompt(&["{{Id}}".to_string()], &tables, Some(" one per order "));
        assert!(prompt.contains("\"rowCount\": 8"));
        assert!(prompt.contains("## Instruction\n\none per order"));
        assert!(!prompt.contains("\"Id\": 7"));
    }

    #[test]
    fn test_rule_user_prompt() {
        let row = json!({"Score": 91}).as_object().cloned().unwrap();
        let prompt = rule_user_prompt("grade it", &row);
        assert!(prompt.starts_with("## Rule\n\ngrade it"));
        assert!(prompt.contains("\"Score\": 91"));
    }
}
