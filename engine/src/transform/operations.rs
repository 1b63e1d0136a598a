//! Allow-listed value operations.
//!
//! A `transform` on a mapping is an ordered chain of these operations; there is
//! no general-purpose evaluation. Every operation is total: on input it cannot
//! handle it returns the value unchanged (or null where noted).

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::{number_value, parse_number, value_to_string};

/// All available transformation operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    /// Convert to uppercase
    Uppercase,

    /// Convert to lowercase
    Lowercase,

    /// Replace using regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    /// Pad string at start to reach target length
    PadStart {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Pad string at end to reach target length
    PadEnd {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Extract year (4 digits) from a date string
    ExtractYear,

    /// Ensure string starts with given prefix
    EnsurePrefix {
        value: String,
    },

    /// Ensure string ends with given suffix
    EnsureSuffix {
        value: String,
    },

    /// Map values using a lookup table
    Map {
        mapping: HashMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Value to use when no mapping match found
        #[serde(default)]
        default_unmapped: Option<String>,
    },

    /// Split string into array
    Split {
        #[serde(default = "default_split_separator")]
        separator: String,
    },

    /// Convert to boolean
    ToBoolean {
        #[serde(default = "default_true_values")]
        true_values: Vec<String>,
    },

    /// Convert to number (decimals kept, separators stripped)
    ToNumber,

    /// Characters from `start`, optionally limited to `length`
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    /// Remove all non-alphanumeric characters
    Alphanumeric,

    /// Remove all non-digit characters
    DigitsOnly,

    /// Replace an empty value
    Default {
        value: String,
    },

    /// Round a numeric value
    Round {
        #[serde(default)]
        decimals: u32,
    },

    /// Reformat a date (ISO, d/m/Y, Y/m/d or spreadsheet serial) with a chrono pattern
    FormatDate {
        #[serde(default = "default_date_format")]
        format: String,
    },
}

fn default_pad_char() -> String {
    "0".to_string()
}

fn default_split_separator() -> String {
    ",".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_true_values() -> Vec<String> {
    vec![
        "true".to_string(),
        "1".to_string(),
        "yes".to_string(),
        "y".to_string(),
        "x".to_string(),
        "是".to_string(),
    ]
}

impl Operation {
    /// Build an operation from its pipe-syntax name and positional arguments.
    ///
    /// Returns `Err` with a human-readable reason for unknown names or bad
    /// arguments.
    pub fn from_call(name: &str, args: &[String]) -> Result<Self, String> {
        let arg = |i: usize| args.get(i).cloned();
        let required = |i: usize| {
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} expects at least {} argument(s)", name, i + 1))
        };
        let number = |i: usize| -> Result<usize, String> {
            required(i)?
                .parse::<usize>()
                .map_err(|_| format!("{}: argument {} must be a non-negative integer", name, i + 1))
        };

        let op = match name.to_lowercase().as_str() {
            "trim" => Operation::Trim,
            "uppercase" | "upper" => Operation::Uppercase,
            "lowercase" | "lower" => Operation::Lowercase,
            "replace" => Operation::Replace {
                pattern: required(0)?,
                value: arg(1).unwrap_or_default(),
            },
            "pad_start" => Operation::PadStart {
                length: number(0)?,
                char: arg(1).unwrap_or_else(default_pad_char),
            },
            "pad_end" => Operation::PadEnd {
                length: number(0)?,
                char: arg(1).unwrap_or_else(default_pad_char),
            },
            "extract_year" => Operation::ExtractYear,
            "ensure_prefix" | "prefix" => Operation::EnsurePrefix { value: required(0)? },
            "ensure_suffix" | "suffix" => Operation::EnsureSuffix { value: required(0)? },
            "split" => Operation::Split {
                separator: arg(0).unwrap_or_else(default_split_separator),
            },
            "to_boolean" => Operation::ToBoolean {
                true_values: if args.is_empty() { default_true_values() } else { args.to_vec() },
            },
            "to_number" => Operation::ToNumber,
            "substring" => Operation::Substring {
                start: number(0)?,
                length: if args.len() > 1 { Some(number(1)?) } else { None },
            },
            "alphanumeric" => Operation::Alphanumeric,
            "digits_only" => Operation::DigitsOnly,
            "default" => Operation::Default { value: required(0)? },
            "round" => Operation::Round {
                decimals: if args.is_empty() { 0 } else { number(0)? as u32 },
            },
            "format_date" => Operation::FormatDate {
                format: arg(0).unwrap_or_else(default_date_format),
            },
            "map" => return Err("map is only available in the JSON operation form".to_string()),
            other => return Err(format!("unknown operation '{}'", other)),
        };
        Ok(op)
    }

    /// Apply this operation to a value
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Operation::Trim => self.apply_trim(value),
            Operation::Uppercase => self.apply_uppercase(value),
            Operation::Lowercase => self.apply_lowercase(value),
            Operation::Replace { pattern, value: replacement } => {
                self.apply_replace(value, pattern, replacement)
            }
            Operation::PadStart { length, char } => self.apply_pad(value, *length, char, true),
            Operation::PadEnd { length, char } => self.apply_pad(value, *length, char, false),
            Operation::ExtractYear => self.apply_extract_year(value),
            Operation::EnsurePrefix { value: prefix } => self.apply_ensure_prefix(value, prefix),
            Operation::EnsureSuffix { value: suffix } => self.apply_ensure_suffix(value, suffix),
            Operation::Map { mapping, case_insensitive, default_unmapped } => {
                self.apply_map(value, mapping, *case_insensitive, default_unmapped.as_deref())
            }
            Operation::Split { separator } => self.apply_split(value, separator),
            Operation::ToBoolean { true_values } => self.apply_to_boolean(value, true_values),
            Operation::ToNumber => self.apply_to_number(value),
            Operation::Substring { start, length } => self.apply_substring(value, *start, *length),
            Operation::Alphanumeric => self.apply_alphanumeric(value),
            Operation::DigitsOnly => self.apply_digits_only(value),
            Operation::Default { value: fallback } => self.apply_default(value, fallback),
            Operation::Round { decimals } => self.apply_round(value, *decimals),
            Operation::FormatDate { format } => self.apply_format_date(value, format),
        }
    }

    fn as_string(value: &Value) -> Option<String> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(value_to_string(value)),
            _ => None,
        }
    }

    fn apply_trim(&self, value: &Value) -> Value {
        Self::as_string(value)
            .map(|s| Value::String(s.trim().to_string()))
            .unwrap_or(value.clone())
    }

    fn apply_uppercase(&self, value: &Value) -> Value {
        Self::as_string(value)
            .map(|s| Value::String(s.to_uppercase()))
            .unwrap_or(value.clone())
    }

    fn apply_lowercase(&self, value: &Value) -> Value {
        Self::as_string(value)
            .map(|s| Value::String(s.to_lowercase()))
            .unwrap_or(value.clone())
    }

    fn apply_replace(&self, value: &Value, pattern: &str, replacement: &str) -> Value {
        Self::as_string(value)
            .and_then(|s| {
                regex::Regex::new(pattern)
                    .ok()
                    .map(|re| Value::String(re.replace_all(&s, replacement).to_string()))
            })
            .unwrap_or(value.clone())
    }

    fn apply_pad(&self, value: &Value, length: usize, pad_char: &str, at_start: bool) -> Value {
        Self::as_string(value)
            .map(|s| {
                let current = s.chars().count();
                if current >= length {
                    return Value::String(s);
                }
                let pad = pad_char.chars().next().unwrap_or('0');
                let padding: String = std::iter::repeat(pad).take(length - current).collect();
                if at_start {
                    Value::String(format!("{}{}", padding, s))
                } else {
                    Value::String(format!("{}{}", s, padding))
                }
            })
            .unwrap_or(value.clone())
    }

    fn apply_extract_year(&self, value: &Value) -> Value {
        Self::as_string(value)
            .and_then(|s| {
                regex::Regex::new(r"\d{4}")
                    .ok()
                    .and_then(|re| re.find(&s).map(|m| m.as_str().to_string()))
                    .and_then(|year| year.parse::<i64>().ok())
                    .map(|n| Value::Number(n.into()))
            })
            .unwrap_or(Value::Null)
    }

    fn apply_ensure_prefix(&self, value: &Value, prefix: &str) -> Value {
        Self::as_string(value)
            .map(|s| {
                if s.starts_with(prefix) {
                    Value::String(s)
                } else {
                    Value::String(format!("{}{}", prefix, s))
                }
            })
            .unwrap_or(value.clone())
    }

    fn apply_ensure_suffix(&self, value: &Value, suffix: &str) -> Value {
        Self::as_string(value)
            .map(|s| {
                if s.ends_with(suffix) {
                    Value::String(s)
                } else {
                    Value::String(format!("{}{}", s, suffix))
                }
            })
            .unwrap_or(value.clone())
    }

    fn apply_map(
        &self,
        value: &Value,
        mapping: &HashMap<String, String>,
        case_insensitive: bool,
        default_unmapped: Option<&str>,
    ) -> Value {
        Self::as_string(value)
            .map(|s| {
                let found = if case_insensitive {
                    let key = s.to_lowercase();
                    mapping.iter().find(|(k, _)| k.to_lowercase() == key)
                } else {
                    mapping.get_key_value(&s)
                };

                match found {
                    Some((_, v)) => Value::String(v.clone()),
                    None => match default_unmapped {
                        Some(d) => Value::String(d.to_string()),
                        // Unmapped values pass through unchanged
                        None => Value::String(s),
                    },
                }
            })
            .unwrap_or(value.clone())
    }

    fn apply_split(&self, value: &Value, separator: &str) -> Value {
        Self::as_string(value)
            .map(|s| {
                let parts: Vec<Value> = s
                    .split(separator)
                    .map(|p| Value::String(p.trim().to_string()))
                    .collect();
                Value::Array(parts)
            })
            .unwrap_or(value.clone())
    }

    fn apply_to_boolean(&self, value: &Value, true_values: &[String]) -> Value {
        match value {
            Value::Bool(b) => Value::Bool(*b),
            _ => Self::as_string(value)
                .map(|s| {
                    let lower = s.trim().to_lowercase();
                    Value::Bool(true_values.iter().any(|tv| tv.to_lowercase() == lower))
                })
                .unwrap_or(Value::Bool(false)),
        }
    }

    fn apply_to_number(&self, value: &Value) -> Value {
        match value {
            Value::Number(_) => value.clone(),
            _ => parse_number(value).map(number_value).unwrap_or(Value::Null),
        }
    }

    fn apply_substring(&self, value: &Value, start: usize, length: Option<usize>) -> Value {
        Self::as_string(value)
            .map(|s| {
                let chars: Vec<char> = s.chars().collect();
                let end = length.map(|l| start + l).unwrap_or(chars.len());
                let result: String = chars
                    .get(start.min(chars.len())..end.min(chars.len()))
                    .map(|c| c.iter().collect())
                    .unwrap_or_default();
                Value::String(result)
            })
            .unwrap_or(value.clone())
    }

    fn apply_alphanumeric(&self, value: &Value) -> Value {
        Self::as_string(value)
            .map(|s| Value::String(s.chars().filter(|c| c.is_alphanumeric()).collect()))
            .unwrap_or(value.clone())
    }

    fn apply_digits_only(&self, value: &Value) -> Value {
        Self::as_string(value)
            .map(|s| Value::String(s.chars().filter(|c| c.is_ascii_digit()).collect()))
            .unwrap_or(value.clone())
    }

    fn apply_default(&self, value: &Value, fallback: &str) -> Value {
        if crate::models::is_empty(value) {
            Value::String(fallback.to_string())
        } else {
            value.clone()
        }
    }

    fn apply_round(&self, value: &Value, decimals: u32) -> Value {
        match parse_number(value) {
            Some(n) => {
                let factor = 10f64.powi(decimals as i32);
                number_value((n * factor).round() / factor)
            }
            None => value.clone(),
        }
    }

    fn apply_format_date(&self, value: &Value, format: &str) -> Value {
        parse_date(value)
            .map(|d| Value::String(d.format(format).to_string()))
            .unwrap_or(value.clone())
    }
}

/// Read a date from common textual layouts or a spreadsheet serial number.
fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    if let Value::Number(n) = value {
        // Spreadsheet serial dates count days from 1899-12-30
        let serial = n.as_f64()?;
        if !(1.0..2_958_466.0).contains(&serial) {
            return None;
        }
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
        let seconds = (serial * 86_400.0).round() as i64;
        return epoch.checked_add_signed(Duration::seconds(seconds));
    }

    let text = value.as_str()?.trim();
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];
    const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y", "%Y年%m月%d日"];

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Get a description of all available operations
pub fn operations_description() -> String {
    r#"Available transform operations:

| Operation | Description | Arguments |
|-----------|-------------|-----------|
| trim | Remove leading/trailing whitespace | - |
| uppercase | Convert to uppercase | - |
| lowercase | Convert to lowercase | - |
| replace | Regex pattern replacement | pattern, replacement |
| pad_start | Pad string at start | length, char (default "0") |
| pad_end | Pad string at end | length, char (default "0") |
| extract_year | Extract 4-digit year from date | - |
| ensure_prefix | Add prefix if not present | prefix |
| ensure_suffix | Add suffix if not present | suffix |
| map | Map values using lookup table (JSON form only) | mapping, case_insensitive, default_unmapped |
| split | Split into array | separator (default ",") |
| to_boolean | Convert to boolean | truthy strings... |
| to_number | Convert to number | - |
| substring | Extract substring | start, length (optional) |
| alphanumeric | Keep only alphanumeric chars | - |
| digits_only | Keep only digits | - |
| default | Replace an empty value | value |
| round | Round a number | decimals (default 0) |
| format_date | Reformat a date | chrono format (default "%Y-%m-%d") |

Pipe syntax:
  trim | pad_start(6, "0") | ensure_prefix("INV-")

JSON syntax:
  [{"type": "trim"}, {"type": "map", "mapping": {"M": "Male"}, "case_insensitive": true}]"#
        .to_string()
}
