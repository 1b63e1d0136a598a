//! Summary records over a table, optionally per group.
//!
//! Summaries feed the batch orchestrator in aggregate mode the same way
//! resolved rows do in per-row mode.

use std::collections::HashMap;

use serde_json::Value;

use super::{CompiledField, Diagnostic};
use crate::models::{is_empty, key_string, number_value, parse_number, value_to_string, ResolvedRecord, Row};
use crate::scheme::{normalize_placeholder, AggregateConfig, AggregateOp, AggregateRule, MappingScheme};

const DEFAULT_JOIN_DELIMITER: &str = ", ";

/// Compute one summary per group (one overall without `group_by`).
///
/// Groups keep the order of their first row. Rows with an empty group key
/// form the `""` group. Each summary carries the group value under the
/// `group_by` column name.
pub fn aggregate(rows: &[Row], config: &AggregateConfig) -> Vec<Row> {
    let group_by = config.group_by.as_deref().filter(|g| !g.trim().is_empty());

    let Some(group_by) = group_by else {
        let all: Vec<&Row> = rows.iter().collect();
        return vec![summarize(&all, &config.rules)];
    };

    let mut groups: Vec<(String, Vec<&Row>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key = key_string(row.get(group_by)).unwrap_or_default();
        match positions.get(&key) {
            Some(&position) => groups[position].1.push(row),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut summary = summarize(&members, &config.rules);
            summary.insert(group_by.to_string(), Value::String(key));
            summary
        })
        .collect()
}

fn summarize(rows: &[&Row], rules: &[AggregateRule]) -> Row {
    rules
        .iter()
        .map(|rule| (rule.output_key(), apply_rule(rows, rule)))
        .collect()
}

fn apply_rule(rows: &[&Row], rule: &AggregateRule) -> Value {
    let field = rule.field.as_str();
    let values = || rows.iter().filter_map(move |r| r.get(field));
    let numbers = || values().filter_map(parse_number);
    let present = || values().filter(|v| !is_empty(v));

    match rule.operation {
        AggregateOp::Sum => number_value(numbers().sum()),
        AggregateOp::Avg => {
            if rows.is_empty() {
                return Value::from(0);
            }
            let mean = numbers().sum::<f64>() / rows.len() as f64;
            number_value((mean * 100.0).round() / 100.0)
        }
        AggregateOp::Count => Value::from(rows.len()),
        AggregateOp::Min => numbers()
            .reduce(f64::min)
            .map(number_value)
            .unwrap_or_else(|| Value::String(String::new())),
        AggregateOp::Max => numbers()
            .reduce(f64::max)
            .map(number_value)
            .unwrap_or_else(|| Value::String(String::new())),
        AggregateOp::First => present().next().cloned().unwrap_or_else(|| Value::String(String::new())),
        AggregateOp::Last => present().last().cloned().unwrap_or_else(|| Value::String(String::new())),
        AggregateOp::Join => {
            let delimiter = rule.delimiter.as_deref().unwrap_or(DEFAULT_JOIN_DELIMITER);
            Value::String(present().map(value_to_string).collect::<Vec<_>>().join(delimiter))
        }
    }
}

/// Turn summaries into records for rendering.
///
/// Direct mappings whose placeholder or source column names a summary field
/// are copied under the placeholder key, then every summary field is added.
pub fn aggregate_records(summaries: Vec<Row>, scheme: &MappingScheme, diagnostics: &mut Vec<Diagnostic>) -> Vec<ResolvedRecord> {
    let fields: Vec<CompiledField> = scheme
        .direct_mappings
        .iter()
        .filter(|m| m.rule_text().is_none())
        .map(|m| CompiledField::compile(m, diagnostics))
        .collect();

    summaries
        .into_iter()
        .map(|summary| {
            let mut record = ResolvedRecord::new();
            for field in &fields {
                if summary.contains_key(&field.key) {
                    record.insert(field.key.clone(), summary[&field.key].clone());
                } else if summary.contains_key(&field.source_column) {
                    record.insert(field.key.clone(), field.value(&summary));
                }
            }
            for (key, value) in summary {
                record.insert(key, value);
            }
            record
        })
        .collect()
}

// =============================================================================
// Inference
// =============================================================================

const NUMERIC_KEYWORDS: &[&str] = &[
    "amount", "price", "total", "sum", "cost", "revenue", "sales", "profit", "quantity", "qty",
    "count", "金额", "价格", "数量", "总计", "合计", "销售额", "成本", "利润",
];

const COUNT_KEYWORDS: &[&str] = &["count", "number of", "总数", "条数", "人数"];

/// Guess aggregation rules from template placeholders and table headers.
///
/// Numeric-looking columns are summed. The alias is the placeholder that
/// mentions the column, else `Total<Column>`. A count-like placeholder adds
/// a `count` rule. With nothing recognizable, a single `Count` rule is used.
pub fn infer_aggregate_config(placeholders: &[String], headers: &[String]) -> AggregateConfig {
    let placeholders: Vec<String> = placeholders.iter().map(|p| normalize_placeholder(p)).collect();
    let mut rules = Vec::new();

    for header in headers {
        let lower = header.to_lowercase();
        if !NUMERIC_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        let alias = placeholders
            .iter()
            .find(|p| p.to_lowercase().contains(&lower))
            .cloned()
            .unwrap_or_else(|| format!("Total{}", header));
        rules.push(AggregateRule::new(header.clone(), AggregateOp::Sum, alias));
    }

    let count_placeholder = placeholders.iter().find(|p| {
        let lower = p.to_lowercase();
        COUNT_KEYWORDS.iter().any(|k| lower.contains(k)) && !rules.iter().any(|r| r.alias == **p)
    });
    if let (Some(alias), Some(first)) = (count_placeholder, headers.first()) {
        rules.push(AggregateRule::new(first.clone(), AggregateOp::Count, alias.clone()));
    }

    if rules.is_empty() {
        if let Some(first) = headers.first() {
            rules.push(AggregateRule::new(first.clone(), AggregateOp::Count, "Count"));
        }
    }

    AggregateConfig { rules, group_by: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::FieldMapping;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn config(rules: Vec<AggregateRule>, group_by: Option<&str>) -> AggregateConfig {
        AggregateConfig {
            rules,
            group_by: group_by.map(str::to_string),
        }
    }

    #[test]
    fn test_sum_and_count() {
        let table = rows(json!([{"Amount": 100}, {"Amount": "200"}, {"Amount": 300.0}]));
        let sum = aggregate(&table, &config(vec![AggregateRule::new("Amount", AggregateOp::Sum, "Total")], None));
        assert_eq!(sum, rows(json!([{"Total": 600}])));

        let odd = rows(json!([{"Amount": "n/a"}, {}, {"Amount": null}]));
        let count = aggregate(&odd, &config(vec![AggregateRule::new("Amount", AggregateOp::Count, "Count")], None));
        assert_eq!(count, rows(json!([{"Count": 3}])));
    }

    #[test]
    fn test_avg_min_max() {
        let table = rows(json!([{"V": 1}, {"V": "x"}, {"V": 4}]));
        let summary = aggregate(
            &table,
            &config(
                vec![
                    AggregateRule::new("V", AggregateOp::Avg, "Avg"),
                    AggregateRule::new("V", AggregateOp::Min, "Min"),
                    AggregateRule::new("V", AggregateOp::Max, ""),
                ],
                None,
            ),
        );
        // non-numeric values count in the denominator of avg
        assert_eq!(summary[0]["Avg"], json!(1.67));
        assert_eq!(summary[0]["Min"], json!(1));
        assert_eq!(summary[0]["max_V"], json!(4));

        let text = rows(json!([{"V": "a"}]));
        let summary = aggregate(&text, &config(vec![AggregateRule::new("V", AggregateOp::Min, "Min")], None));
        assert_eq!(summary[0]["Min"], json!(""));
    }

    #[test]
    fn test_many_groups() {
        // keys interleaved: k0..kN, then k0..kN again
        let n = 5_000;
        let table: Vec<Row> = (0..2 * n)
            .map(|i| json!({"K": format!("k{}", i % n), "V": 1}).as_object().cloned().unwrap())
            .collect();
        let summary = aggregate(&table, &config(vec![AggregateRule::new("V", AggregateOp::Sum, "S")], Some("K")));
        assert_eq!(summary.len(), n);
        assert_eq!(summary[0]["K"], json!("k0"));
        assert_eq!(summary[n - 1]["K"], json!(format!("k{}", n - 1)));
        assert!(summary.iter().all(|s| s["S"] == json!(2)));
    }

    #[test]
    fn test_grouping_keeps_first_occurrence_order() {
        let table = rows(json!([
            {"Dept": "Sales", "Amount": 10, "Name": "Bob"},
            {"Dept": "Eng", "Amount": 5, "Name": "Alice"},
            {"Dept": "Sales", "Amount": 15, "Name": "Carol"},
            {"Amount": 1, "Name": "Dan"}
        ]));
        let mut join = AggregateRule::new("Name", AggregateOp::Join, "Names");
        join.delimiter = Some(" / ".into());
        let summaries = aggregate(
            &table,
            &config(
                vec![
                    AggregateRule::new("Amount", AggregateOp::Sum, "Total"),
                    join,
                    AggregateRule::new("Name", AggregateOp::Last, "LastName"),
                ],
                Some("Dept"),
            ),
        );
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0]["Dept"], json!("Sales"));
        assert_eq!(summaries[0]["Total"], json!(25));
        assert_eq!(summaries[0]["Names"], json!("Bob / Carol"));
        assert_eq!(summaries[0]["LastName"], json!("Carol"));
        assert_eq!(summaries[1]["Dept"], json!("Eng"));
        assert_eq!(summaries[2]["Dept"], json!(""));
    }

    #[test]
    fn test_aggregate_records_copy_mapped_fields() {
        let scheme = MappingScheme::new("Sales")
            .with_direct(FieldMapping::new("{{Total}}", "Amount"))
            .with_direct(FieldMapping::new("Department", "Dept").with_transform("uppercase"))
            .with_direct(FieldMapping::new("Name", "Name"));
        let summaries = rows(json!([{"Dept": "eng", "Total": 5}]));
        let records = aggregate_records(summaries, &scheme, &mut Vec::new());
        assert_eq!(records[0].get("Total"), Some(&json!(5)));
        assert_eq!(records[0].get("Department"), Some(&json!("ENG")));
        assert_eq!(records[0].get("Dept"), Some(&json!("eng")));
        assert!(!records[0].contains_key("Name"));
    }

    #[test]
    fn test_infer_aggregate_config() {
        let placeholders = vec!["{{TotalAmount}}".to_string(), "Record Count".to_string()];
        let headers = vec!["Name".to_string(), "Amount".to_string()];
        let config = infer_aggregate_config(&placeholders, &headers);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].operation, AggregateOp::Sum);
        assert_eq!(config.rules[0].alias, "TotalAmount");
        assert_eq!(config.rules[1].operation, AggregateOp::Count);
        assert_eq!(config.rules[1].alias, "Record Count");

        let fallback = infer_aggregate_config(&[], &["Name".to_string()]);
        assert_eq!(fallback.rules, vec![AggregateRule::new("Name", AggregateOp::Count, "Count")]);
    }
}
