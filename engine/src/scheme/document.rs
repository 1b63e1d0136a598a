//! Scheme documents: the persisted form of a scheme and the tolerant reader
//! for schemes produced by a suggestion oracle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MappingScheme;
use crate::error::{SchemeError, SchemeResult};
use crate::logs::{log_success, log_warning};
use crate::validation::validate_scheme_value;

/// Current persisted document version.
pub const SCHEME_DOCUMENT_VERSION: u32 = 1;

/// A scheme saved for later reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeDocument {
    pub version: u32,
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub scheme: MappingScheme,
}

impl SchemeDocument {
    pub fn new(name: impl Into<String>, scheme: MappingScheme) -> Self {
        Self {
            version: SCHEME_DOCUMENT_VERSION,
            name: name.into(),
            saved_at: Utc::now(),
            scheme,
        }
    }

    pub fn to_json(&self) -> SchemeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a document, rejecting versions this build does not know.
    pub fn from_json(json: &str) -> SchemeResult<Self> {
        let raw: Value = serde_json::from_str(json)?;
        let found = raw
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        if found != SCHEME_DOCUMENT_VERSION {
            return Err(SchemeError::UnsupportedVersion {
                found,
                expected: SCHEME_DOCUMENT_VERSION,
            });
        }
        Ok(serde_json::from_value(raw)?)
    }
}

/// Load a scheme from JSON: either a [`SchemeDocument`] or a bare scheme.
pub fn load_scheme(json: &str) -> SchemeResult<MappingScheme> {
    let raw: Value = serde_json::from_str(json)?;
    if raw.get("scheme").is_some() && raw.get("version").is_some() {
        return Ok(SchemeDocument::from_json(json)?.scheme);
    }
    validate_scheme_value(&raw).map_err(|errors| SchemeError::Invalid { errors })?;
    Ok(serde_json::from_value(raw)?)
}

// =============================================================================
// Oracle responses
// =============================================================================

/// Result of reading an oracle response.
#[derive(Debug, Clone)]
pub struct SchemeParseOutcome {
    pub scheme: MappingScheme,
    /// The response was unusable and the fallback scheme was substituted.
    pub used_fallback: bool,
    /// Validation errors or repairs applied to the response.
    pub warnings: Vec<String>,
}

/// Turn a free-text oracle response into a scheme, never failing.
///
/// The JSON is pulled out of markdown fences if needed, checked against the
/// embedded JSON Schema and deserialized. Any failure yields
/// [`MappingScheme::fallback`] with the reason kept in `explanation`.
/// A usable scheme is repaired against the known tables: an unknown primary
/// table becomes the first table and cross-table mappings to unknown tables
/// are dropped.
pub fn parse_scheme_response(response: &str, placeholders: &[String], table_names: &[String]) -> SchemeParseOutcome {
    let fallback = |reason: String, warnings: Vec<String>| {
        log_warning(format!("Scheme response rejected: {}", reason));
        SchemeParseOutcome {
            scheme: MappingScheme::fallback(placeholders, table_names, reason),
            used_fallback: true,
            warnings,
        }
    };

    let json_str = extract_json(response);
    let raw: Value = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => return fallback(format!("response is not JSON: {}", e), Vec::new()),
    };

    if let Err(errors) = validate_scheme_value(&raw) {
        return fallback(format!("response failed validation ({} errors)", errors.len()), errors);
    }

    let mut scheme: MappingScheme = match serde_json::from_value(raw) {
        Ok(s) => s,
        Err(e) => return fallback(format!("response does not describe a scheme: {}", e), Vec::new()),
    };

    let mut warnings = Vec::new();

    if !table_names.iter().any(|t| *t == scheme.primary_table) {
        let replacement = table_names.first().cloned().unwrap_or_default();
        warnings.push(format!(
            "primary table '{}' not found, using '{}'",
            scheme.primary_table, replacement
        ));
        scheme.primary_table = replacement;
    }

    scheme.cross_table_mappings.retain(|m| {
        let known = table_names.iter().any(|t| *t == m.source_table);
        if !known {
            warnings.push(format!(
                "dropped mapping for '{}': unknown table '{}'",
                m.placeholder, m.source_table
            ));
        }
        known
    });

    scheme.refresh_unmapped(placeholders);

    for warning in &warnings {
        log_warning(warning.clone());
    }
    log_success(format!(
        "Scheme accepted: {} direct, {} cross-table, {} loop mappings",
        scheme.direct_mappings.len(),
        scheme.cross_table_mappings.len(),
        scheme.loop_mappings.len()
    ));

    SchemeParseOutcome {
        scheme,
        used_fallback: false,
        warnings,
    }
}

/// Extract JSON from a response that may contain markdown code blocks.
pub(crate) fn extract_json(text: &str) -> String {
    if let Some(start) = text.find("```json") {
        let body = start + "```json".len();
        if let Some(end) = text[body..].find("```") {
            return text[body..body + end].trim().to_string();
        }
    }

    if let Some(start) = text.find("```") {
        let after_start = start + 3;
        // Skip language identifier if present
        let content_start = text[after_start..]
            .find('\n')
            .map(|i| after_start + i + 1)
            .unwrap_or(after_start);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return text[start..=end].to_string();
        }
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::FieldMapping;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_json_from_code_block() {
        let response = "Here is the scheme:\n\n```json\n{\"primaryTable\": \"A\"}\n```\n\nDone!";
        assert_eq!(extract_json(response), "{\"primaryTable\": \"A\"}");
        let raw = r#"{"primaryTable": "A"}"#;
        assert_eq!(extract_json(raw), raw);
    }

    #[test]
    fn test_parse_valid_response_with_repairs() {
        let response = r#"```json
{
  "primaryTable": "Staff",
  "directMappings": [{ "placeholder": "Name", "sourceColumn": "Name" }],
  "crossTableMappings": [
    { "placeholder": "Dept", "sourceTable": "Depts", "sourceColumn": "DeptName", "joinKey": "DeptID" },
    { "placeholder": "Boss", "sourceTable": "Ghost", "sourceColumn": "Name", "joinKey": "BossID" }
  ]
}
```"#;
        let outcome = parse_scheme_response(response, &names(&["Name", "Dept", "Boss"]), &names(&["Employees", "Depts"]));
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.scheme.primary_table, "Employees");
        assert_eq!(outcome.scheme.cross_table_mappings.len(), 1);
        assert_eq!(outcome.scheme.unmapped_placeholders, names(&["Boss"]));
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_invalid_response_falls_back() {
        let placeholders = names(&["Name", "Dept"]);
        let tables = names(&["Employees"]);

        let outcome = parse_scheme_response("I cannot help with that.", &placeholders, &tables);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.scheme.primary_table, "Employees");
        assert_eq!(outcome.scheme.unmapped_placeholders, placeholders);
        assert!(outcome.scheme.explanation.is_some());

        let outcome = parse_scheme_response(r#"{"directMappings": "nope"}"#, &placeholders, &tables);
        assert!(outcome.used_fallback);
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn test_document_versioning() {
        let scheme = MappingScheme::new("Employees").with_direct(FieldMapping::new("Name", "Name"));
        let doc = SchemeDocument::new("staff letters", scheme.clone());
        let json = doc.to_json().unwrap();
        assert_eq!(SchemeDocument::from_json(&json).unwrap().scheme, scheme);
        assert_eq!(load_scheme(&json).unwrap(), scheme);

        let future = json.replace("\"version\": 1", "\"version\": 2");
        assert!(matches!(
            SchemeDocument::from_json(&future),
            Err(SchemeError::UnsupportedVersion { found: 2, expected: 1 })
        ));

        // 2^32 + 1 must not wrap around to 1
        let wrapped = json.replace("\"version\": 1", "\"version\": 4294967297");
        assert!(matches!(
            SchemeDocument::from_json(&wrapped),
            Err(SchemeError::UnsupportedVersion { found: 0, expected: 1 })
        ));
    }

    #[test]
    fn test_load_bare_scheme_is_validated() {
        assert!(load_scheme(r#"{"primaryTable": "A"}"#).is_ok());
        assert!(matches!(
            load_scheme(r#"{"primaryTable": 5}"#),
            Err(SchemeError::Invalid { .. })
        ));
    }
}
