//! Mapping scheme configuration.
//!
//! A [`MappingScheme`] says, for one template, where every placeholder's
//! value comes from:
//!
//! ```text
//! primaryTable ──┬── directMappings       {{Name}}  ← Employees.Name
//!                ├── crossTableMappings   {{Dept}}  ← Depts.DeptName via DeptID
//!                ├── loopMappings         {#Items}  ← rows grouped / joined
//!                ├── virtualColumns       Today     ← CurrentDate, const, ai
//!                └── filterExpression     Status != "void"
//! ```
//!
//! Tagged variants (`LoopMapping.type`, `VirtualColumn.type`) are enums so the
//! resolver handles every case exhaustively. Older field names produced by
//! earlier scheme generators are accepted as serde aliases.

pub mod document;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use document::{
    load_scheme, parse_scheme_response, SchemeDocument, SchemeParseOutcome, SCHEME_DOCUMENT_VERSION,
};

// =============================================================================
// Scheme
// =============================================================================

/// Configuration root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingScheme {
    #[serde(alias = "primarySheet")]
    pub primary_table: String,

    #[serde(default, alias = "mappings")]
    pub direct_mappings: Vec<FieldMapping>,

    #[serde(default, alias = "crossSheetMappings")]
    pub cross_table_mappings: Vec<CrossTableMapping>,

    #[serde(default)]
    pub loop_mappings: Vec<LoopMapping>,

    #[serde(default)]
    pub virtual_columns: Vec<VirtualColumn>,

    /// Row predicate over the primary table.
    #[serde(default, alias = "filterCondition")]
    pub filter_expression: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_config: Option<AggregateConfig>,

    /// Placeholders no mapping covers. Derived; see [`MappingScheme::refresh_unmapped`].
    #[serde(default)]
    pub unmapped_placeholders: Vec<String>,

    /// Free text from whoever produced the scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// `{{placeholder}}` ← `row[sourceColumn]`, optionally transformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub placeholder: String,

    #[serde(alias = "excelColumn")]
    pub source_column: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    /// Instruction for the rule oracle; when set the value is computed per
    /// row by the preprocessor instead of read from `source_column`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl FieldMapping {
    pub fn new(placeholder: impl Into<String>, source_column: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            source_column: source_column.into(),
            transform: None,
            rule: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Output key: the placeholder without `{{ }}`.
    pub fn key(&self) -> String {
        normalize_placeholder(&self.placeholder)
    }

    /// Rule text when this mapping is evaluated by the rule oracle.
    ///
    /// Besides an explicit `rule`, a transform written as a `// AI ...`
    /// comment is treated as a rule.
    pub fn rule_text(&self) -> Option<&str> {
        if let Some(rule) = self.rule.as_deref().filter(|r| !r.trim().is_empty()) {
            return Some(rule.trim());
        }
        self.transform
            .as_deref()
            .map(str::trim)
            .and_then(|t| t.strip_prefix("// AI"))
            .map(|rest| rest.trim_start_matches(':').trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    OneToOne,
    #[default]
    ManyToOne,
}

/// `{{placeholder}}` ← `sourceTable[sourceColumn]` of the row whose `joinKey`
/// matches the primary row's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossTableMapping {
    pub placeholder: String,

    #[serde(alias = "sourceSheet")]
    pub source_table: String,

    pub source_column: String,

    #[serde(alias = "lookupKey")]
    pub join_key: String,

    #[serde(default)]
    pub relationship_type: RelationshipType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl CrossTableMapping {
    pub fn new(
        placeholder: impl Into<String>,
        source_table: impl Into<String>,
        source_column: impl Into<String>,
        join_key: impl Into<String>,
    ) -> Self {
        Self {
            placeholder: placeholder.into(),
            source_table: source_table.into(),
            source_column: source_column.into(),
            join_key: join_key.into(),
            relationship_type: RelationshipType::default(),
            transform: None,
        }
    }

    pub fn key(&self) -> String {
        normalize_placeholder(&self.placeholder)
    }
}

/// A one-to-many relation resolved into a named list of sub-records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopMapping {
    #[serde(default)]
    pub id: String,

    pub loop_placeholder: String,

    #[serde(flatten)]
    pub kind: LoopKind,

    #[serde(default, alias = "mappings")]
    pub inner_mappings: Vec<FieldMapping>,
}

impl LoopMapping {
    pub fn group_by(loop_placeholder: impl Into<String>, group_by_column: impl Into<String>) -> Self {
        let loop_placeholder = loop_placeholder.into();
        Self {
            id: normalize_loop_key(&loop_placeholder),
            loop_placeholder,
            kind: LoopKind::GroupBy {
                source_table: None,
                group_by_column: group_by_column.into(),
            },
            inner_mappings: Vec::new(),
        }
    }

    pub fn lookup(
        loop_placeholder: impl Into<String>,
        source_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let loop_placeholder = loop_placeholder.into();
        Self {
            id: normalize_loop_key(&loop_placeholder),
            loop_placeholder,
            kind: LoopKind::Lookup {
                source_table: source_table.into(),
                foreign_key: foreign_key.into(),
            },
            inner_mappings: Vec::new(),
        }
    }

    pub fn with_inner(mut self, mapping: FieldMapping) -> Self {
        self.inner_mappings.push(mapping);
        self
    }

    /// Output key: the loop name without `{# }` / `{/ }` markers.
    pub fn key(&self) -> String {
        normalize_loop_key(&self.loop_placeholder)
    }

    /// Table scanned by this loop, `primary` when a group-by omits it.
    pub fn target_table<'a>(&'a self, primary: &'a str) -> &'a str {
        match &self.kind {
            LoopKind::GroupBy { source_table, .. } => source_table.as_deref().unwrap_or(primary),
            LoopKind::Lookup { source_table, .. } => source_table,
        }
    }

    /// Column compared on both sides.
    pub fn key_column(&self) -> &str {
        match &self.kind {
            LoopKind::GroupBy { group_by_column, .. } => group_by_column,
            LoopKind::Lookup { foreign_key, .. } => foreign_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopKind {
    /// Rows of the target table sharing the current row's `group_by_column`.
    #[serde(rename_all = "camelCase")]
    GroupBy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_table: Option<String>,
        group_by_column: String,
    },
    /// Rows of `source_table` whose `foreign_key` equals the current row's.
    #[serde(rename_all = "camelCase")]
    Lookup {
        #[serde(alias = "sourceSheet")]
        source_table: String,
        foreign_key: String,
    },
}

/// A synthesized column injected into the primary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualColumn {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: VirtualKind,
}

impl VirtualColumn {
    pub fn new(name: impl Into<String>, kind: VirtualKind) -> Self {
        let name = name.into();
        Self { id: name.clone(), name, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VirtualKind {
    /// Literal value.
    Const { value: String },
    /// One of the built-in [`SystemVariable`]s.
    #[serde(alias = "var")]
    Variable { value: SystemVariable },
    /// Computed per row by the rule oracle.
    Ai {
        #[serde(default)]
        value: String,
        #[serde(default, rename = "aiPrompt", skip_serializing_if = "Option::is_none")]
        ai_prompt: Option<String>,
    },
    /// Value of another primary column, under this column's name.
    Column { source: String },
}

impl VirtualKind {
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemVariable {
    CurrentDate,
    CurrentTime,
    CurrentDateTime,
    RowIndex,
    #[serde(rename = "UUID", alias = "Uuid")]
    Uuid,
}

// =============================================================================
// Aggregation
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateConfig {
    pub rules: Vec<AggregateRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRule {
    pub field: String,
    pub operation: AggregateOp,
    /// Output key; `<operation>_<field>` when empty.
    #[serde(default)]
    pub alias: String,
    /// Separator for [`AggregateOp::Join`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl AggregateRule {
    pub fn new(field: impl Into<String>, operation: AggregateOp, alias: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operation,
            alias: alias.into(),
            delimiter: None,
        }
    }

    pub fn output_key(&self) -> String {
        if self.alias.trim().is_empty() {
            format!("{}_{}", self.operation.as_str(), self.field)
        } else {
            self.alias.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
    Join,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Join => "join",
        }
    }
}

// =============================================================================
// Scheme helpers
// =============================================================================

impl MappingScheme {
    pub fn new(primary_table: impl Into<String>) -> Self {
        Self {
            primary_table: primary_table.into(),
            ..Self::default()
        }
    }

    /// Minimal scheme used when nothing better is available: first table as
    /// primary, no mappings, every placeholder unmapped.
    pub fn fallback(placeholders: &[String], table_names: &[String], explanation: impl Into<String>) -> Self {
        let mut scheme = Self::new(table_names.first().cloned().unwrap_or_default());
        scheme.explanation = Some(explanation.into());
        scheme.refresh_unmapped(placeholders);
        scheme
    }

    pub fn with_direct(mut self, mapping: FieldMapping) -> Self {
        self.direct_mappings.push(mapping);
        self
    }

    pub fn with_cross(mut self, mapping: CrossTableMapping) -> Self {
        self.cross_table_mappings.push(mapping);
        self
    }

    pub fn with_loop(mut self, mapping: LoopMapping) -> Self {
        self.loop_mappings.push(mapping);
        self
    }

    pub fn with_virtual(mut self, column: VirtualColumn) -> Self {
        self.virtual_columns.push(column);
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter_expression = Some(expression.into());
        self
    }

    pub fn with_aggregate(mut self, config: AggregateConfig) -> Self {
        self.aggregate_config = Some(config);
        self
    }

    /// Placeholders covered by direct, cross-table and outer loop mappings.
    pub fn covered_placeholders(&self) -> BTreeSet<String> {
        self.direct_mappings
            .iter()
            .map(FieldMapping::key)
            .chain(self.cross_table_mappings.iter().map(CrossTableMapping::key))
            .chain(self.loop_mappings.iter().map(LoopMapping::key))
            .collect()
    }

    /// `placeholders` minus covered ones, in template order, without duplicates.
    pub fn compute_unmapped(&self, placeholders: &[String]) -> Vec<String> {
        let covered = self.covered_placeholders();
        let mut seen = BTreeSet::new();
        placeholders
            .iter()
            .filter(|p| {
                let key = normalize_placeholder(p);
                let loop_key = normalize_loop_key(p);
                !covered.contains(&key) && !covered.contains(&loop_key) && seen.insert(key)
            })
            .cloned()
            .collect()
    }

    pub fn refresh_unmapped(&mut self, placeholders: &[String]) {
        self.unmapped_placeholders = self.compute_unmapped(placeholders);
    }

    /// The first group-by loop, which drives group collapse.
    pub fn group_by_loop(&self) -> Option<&LoopMapping> {
        self.loop_mappings
            .iter()
            .find(|l| matches!(l.kind, LoopKind::GroupBy { .. }))
    }

    /// Whether anything needs the rule oracle.
    pub fn has_rules(&self) -> bool {
        self.direct_mappings.iter().any(|m| m.rule_text().is_some())
            || self.virtual_columns.iter().any(|c| c.kind.is_ai())
    }
}

/// `{{ Name }}` → `Name`.
pub fn normalize_placeholder(placeholder: &str) -> String {
    let trimmed = placeholder.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .unwrap_or(trimmed);
    inner.trim().to_string()
}

/// `{#Items}`, `{/Items}`, `#Items` → `Items`.
pub fn normalize_loop_key(placeholder: &str) -> String {
    let trimmed = placeholder.trim();
    let trimmed = trimmed.strip_prefix('{').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('}').unwrap_or(trimmed);
    trimmed.trim_start_matches(['#', '/']).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn placeholders(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_deserialize_tagged_variants() {
        let scheme: MappingScheme = serde_json::from_value(json!({
            "primaryTable": "Orders",
            "directMappings": [{ "placeholder": "{{Order}}", "sourceColumn": "Order" }],
            "loopMappings": [
                { "id": "items", "loopPlaceholder": "{#Items}", "type": "group_by",
                  "groupByColumn": "Order",
                  "innerMappings": [{ "placeholder": "ProductName", "sourceColumn": "Product" }] },
                { "loopPlaceholder": "Lines", "type": "lookup",
                  "sourceTable": "Lines", "foreignKey": "OrderID" }
            ],
            "virtualColumns": [
                { "id": "v1", "name": "Today", "type": "variable", "value": "CurrentDate" },
                { "id": "v2", "name": "Id", "type": "var", "value": "UUID" },
                { "id": "v3", "name": "Tag", "type": "const", "value": "Q3" },
                { "id": "v4", "name": "Summary", "type": "ai", "aiPrompt": "Summarize {{Notes}}" }
            ]
        }))
        .unwrap();

        assert_eq!(scheme.loop_mappings[0].key(), "Items");
        assert_eq!(scheme.loop_mappings[0].target_table("Orders"), "Orders");
        assert_eq!(
            scheme.loop_mappings[1].kind,
            LoopKind::Lookup { source_table: "Lines".into(), foreign_key: "OrderID".into() }
        );
        assert_eq!(
            scheme.virtual_columns[1].kind,
            VirtualKind::Variable { value: SystemVariable::Uuid }
        );
        assert!(scheme.virtual_columns[3].kind.is_ai());
        assert!(scheme.has_rules());
    }

    #[test]
    fn test_legacy_aliases() {
        let scheme: MappingScheme = serde_json::from_value(json!({
            "primarySheet": "Employees",
            "mappings": [{ "placeholder": "Name", "excelColumn": "FullName" }],
            "crossSheetMappings": [{ "placeholder": "Dept", "sourceSheet": "Depts",
                                     "sourceColumn": "DeptName", "lookupKey": "DeptID" }],
            "filterCondition": "Active == true"
        }))
        .unwrap();
        assert_eq!(scheme.primary_table, "Employees");
        assert_eq!(scheme.direct_mappings[0].source_column, "FullName");
        assert_eq!(scheme.cross_table_mappings[0].join_key, "DeptID");
        assert_eq!(scheme.cross_table_mappings[0].relationship_type, RelationshipType::ManyToOne);
        assert_eq!(scheme.filter_expression.as_deref(), Some("Active == true"));
    }

    #[test]
    fn test_unmapped_derivation_is_idempotent() {
        let template = placeholders(&["{{Name}}", "Dept", "{#Items}", "Total"]);
        let mut scheme = MappingScheme::new("Employees")
            .with_direct(FieldMapping::new("{{Name}}", "Name"))
            .with_loop(LoopMapping::group_by("Items", "Order"));
        scheme.refresh_unmapped(&template);
        let original = scheme.unmapped_placeholders.clone();
        assert_eq!(original, placeholders(&["Dept", "Total"]));

        scheme.cross_table_mappings.push(CrossTableMapping::new("Dept", "Depts", "DeptName", "DeptID"));
        scheme.refresh_unmapped(&template);
        assert_eq!(scheme.unmapped_placeholders, placeholders(&["Total"]));

        scheme.cross_table_mappings.pop();
        scheme.refresh_unmapped(&template);
        assert_eq!(scheme.unmapped_placeholders, original);
    }

    #[test]
    fn test_fallback_scheme() {
        let scheme = MappingScheme::fallback(
            &placeholders(&["A", "B", "A"]),
            &placeholders(&["Sheet1", "Sheet2"]),
            "oracle returned garbage",
        );
        assert_eq!(scheme.primary_table, "Sheet1");
        assert!(scheme.direct_mappings.is_empty());
        assert_eq!(scheme.unmapped_placeholders, placeholders(&["A", "B"]));
        assert_eq!(scheme.explanation.as_deref(), Some("oracle returned garbage"));
    }

    #[test]
    fn test_rule_text_detection() {
        assert_eq!(FieldMapping::new("A", "A").rule_text(), None);
        assert_eq!(FieldMapping::new("A", "A").with_rule(" Classify ").rule_text(), Some("Classify"));
        assert_eq!(
            FieldMapping::new("A", "A").with_transform("// AI: grade {{Score}}").rule_text(),
            Some("grade {{Score}}")
        );
        assert_eq!(FieldMapping::new("A", "A").with_transform("trim").rule_text(), None);
    }

    #[test]
    fn test_aggregate_rule_default_alias() {
        let rule = AggregateRule::new("Amount", AggregateOp::Sum, "");
        assert_eq!(rule.output_key(), "sum_Amount");
        let rule = AggregateRule::new("Amount", AggregateOp::Sum, "Total");
        assert_eq!(rule.output_key(), "Total");
    }
}
