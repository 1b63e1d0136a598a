//! Output file naming.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ResolvedRecord;

/// Name-like fields, in priority order.
pub const NAME_FIELDS: &[&str] = &[
    "name",
    "名称",
    "title",
    "标题",
    "subject",
    "主题",
    "productName",
    "产品名称",
    "companyName",
    "公司名称",
    "customerName",
    "客户名称",
    "employeeName",
    "员工姓名",
    "studentName",
    "学生姓名",
];

/// Longest file stem kept after sanitizing, in characters.
pub const MAX_FILE_STEM_CHARS: usize = 100;

/// Separator between base name and index in fallback names.
pub const INDEX_SEPARATOR: char = '_';

/// How artifacts are named.
///
/// The stem comes from the record's first non-blank name-like field
/// (`field` first when set), else `<base_name>_<index + 1>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamingStrategy {
    pub base_name: String,
    /// Extension without the dot.
    pub extension: Option<String>,
    /// Field checked before the built-in name fields.
    pub field: Option<String>,
    /// Name summaries `<base>_summary` (one) or `<base>_summary_<i + 1>`.
    #[serde(skip)]
    pub summaries: Option<usize>,
}

impl Default for NamingStrategy {
    fn default() -> Self {
        Self {
            base_name: "document".to_string(),
            extension: None,
            field: None,
            summaries: None,
        }
    }
}

impl NamingStrategy {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            ..Self::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.');
        self.extension = (!extension.is_empty()).then(|| extension.to_string());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Name `count` aggregate summaries instead of per-row records.
    pub fn for_summaries(mut self, count: usize) -> Self {
        self.summaries = Some(count);
        self
    }

    /// File name for the record at `index` (0-based), extension included.
    pub fn file_name(&self, record: &ResolvedRecord, index: usize) -> String {
        if let Some(count) = self.summaries {
            let stem = format!("{}{}summary", self.base_stem(), INDEX_SEPARATOR);
            return match count {
                1 => self.with_ext(stem),
                _ => self.with_ext(format!("{}{}{}", stem, INDEX_SEPARATOR, index + 1)),
            };
        }
        let stem = self
            .name_value(record)
            .map(|v| sanitize_file_name(&v))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.fallback_stem(index));
        self.with_ext(stem)
    }

    /// `<base>_<index + 1>`.
    pub fn fallback_stem(&self, index: usize) -> String {
        format!("{}{}{}", self.base_stem(), INDEX_SEPARATOR, index + 1)
    }

    fn base_stem(&self) -> String {
        let base = sanitize_file_name(&self.base_name);
        if base.is_empty() {
            "document".to_string()
        } else {
            base
        }
    }

    fn with_ext(&self, stem: String) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        }
    }

    fn name_value(&self, record: &ResolvedRecord) -> Option<String> {
        if let Some(field) = self.field.as_deref() {
            if let Some(v) = record.get(field).and_then(non_blank) {
                return Some(v);
            }
        }
        NAME_FIELDS.iter().find_map(|candidate| {
            record
                .fields()
                .iter()
                .find(|(key, _)| key_matches(key, candidate))
                .and_then(|(_, v)| non_blank(v))
        })
    }
}

fn key_matches(key: &str, candidate: &str) -> bool {
    if candidate.is_ascii() {
        key.eq_ignore_ascii_case(candidate)
    } else {
        key == candidate
    }
}

fn non_blank(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Make `name` safe as a file stem.
///
/// Drops `<>:"/\|?*` and control characters, turns whitespace runs into `_`,
/// strips leading dots and keeps at most [`MAX_FILE_STEM_CHARS`] characters.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;

    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control() {
            continue;
        }
        out.push(c);
    }

    out.trim_start_matches('.')
        .chars()
        .take(MAX_FILE_STEM_CHARS)
        .collect()
}

/// Keeps file names unique within one batch: `a`, `a_2`, `a_3`, ...
#[derive(Debug, Default)]
pub(crate) struct UniqueNames {
    seen: std::collections::HashMap<String, usize>,
}

impl UniqueNames {
    pub(crate) fn claim(&mut self, name: String) -> String {
        let count = self.seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return name;
        }
        let (stem, ext) = match name.rfind('.') {
            Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
            _ => (name.as_str(), ""),
        };
        let candidate = format!("{}{}{}{}", stem, INDEX_SEPARATOR, count, ext);
        // a generated name may itself collide with a later natural one
        self.claim(candidate)
    }
}
