//! Table loading with encoding and delimiter auto-detection.
//!
//! A table source is one of:
//!
//! - a `.csv` file: one table named after the file stem
//! - a `.json` file: `{ "Table": [ {row}, ... ], ... }`, or a bare array of
//!   rows named after the file stem
//! - a directory: every `.csv` / `.json` file in it, in name order
//!
//! CSV cells are loaded as strings; numeric interpretation happens where a
//! value is used.

use serde_json::Value;
use std::path::Path;

use crate::error::{TableError, TableResult};
use crate::logs::{log_info_indent, log_warning_indent};
use crate::models::{Row, TableSet};

/// One decoded CSV table with detection metadata.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub name: String,
    pub rows: Vec<Row>,
    /// Column headers in file order
    pub headers: Vec<String>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        "gb2312" | "gbk" | "gb18030" => "gb18030".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding.
///
/// A UTF-8 byte order mark is dropped. Unknown encodings go through
/// `encoding_rs` labels, then lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> TableResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let decoded = match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).to_string(),
        },
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.to_string(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => {
                let (text, _, had_errors) = enc.decode(bytes);
                if had_errors {
                    return Err(TableError::EncodingError(format!(
                        "content is not valid {}",
                        enc.name()
                    )));
                }
                text.to_string()
            }
            None => String::from_utf8_lossy(bytes).to_string(),
        },
    };
    Ok(decoded)
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text with an explicit delimiter.
///
/// Header cells are trimmed; blank headers get `Column<N>`. Short rows are
/// padded with `""`, extra cells are ignored and blank lines are skipped.
pub fn parse_csv_str(content: &str, delimiter: char) -> TableResult<(Vec<String>, Vec<Row>)> {
    if content.trim().is_empty() {
        return Err(TableError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(&e, 1))?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("Column{}", i + 1)
            } else {
                h.to_string()
            }
        })
        .collect();

    if headers.is_empty() {
        return Err(TableError::NoHeaders);
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(&e, idx + 2))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = record.get(i).map(str::trim).unwrap_or("");
                (header.clone(), Value::String(cell.to_string()))
            })
            .collect();
        rows.push(row);
    }

    Ok((headers, rows))
}

fn csv_error(e: &csv::Error, fallback_line: usize) -> TableError {
    let line = e
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or(fallback_line);
    TableError::ParseError {
        line,
        message: e.to_string(),
    }
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_csv_bytes(name: &str, bytes: &[u8]) -> TableResult<ParsedTable> {
    if bytes.is_empty() {
        return Err(TableError::EmptyFile);
    }
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding)?;
    let delimiter = detect_delimiter(&content);
    let (headers, rows) = parse_csv_str(&content, delimiter)?;

    Ok(ParsedTable {
        name: name.to_string(),
        rows,
        headers,
        encoding,
        delimiter,
    })
}

/// Parse a CSV file; the table is named after the file stem.
pub fn load_csv_file<P: AsRef<Path>>(path: P) -> TableResult<ParsedTable> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    parse_csv_bytes(&table_name(path), &bytes)
}

/// Read a JSON table file.
pub fn load_json_file<P: AsRef<Path>>(path: P) -> TableResult<TableSet> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;

    if value.is_array() {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(table_name(path), value);
        return TableSet::from_value(&Value::Object(wrapped))
            .ok_or_else(|| TableError::UnsupportedSource(path.display().to_string()));
    }
    TableSet::from_value(&value).ok_or_else(|| {
        TableError::UnsupportedSource(format!("{} (expected an object of tables)", path.display()))
    })
}

/// Load every table found at `path` (file or directory).
pub fn load_tables<P: AsRef<Path>>(path: P) -> TableResult<TableSet> {
    let path = path.as_ref();

    if path.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && extension(p).is_some())
            .collect();
        files.sort();

        let mut tables = TableSet::new();
        for file in files {
            for (name, rows) in load_file(&file)?.iter() {
                if tables.contains(name) {
                    log_warning_indent(format!("Table '{}' defined twice, keeping the last", name), 1);
                }
                tables.insert(name.clone(), rows.clone());
            }
        }
        if tables.is_empty() {
            return Err(TableError::UnsupportedSource(format!(
                "{} contains no .csv or .json files",
                path.display()
            )));
        }
        return Ok(tables);
    }

    load_file(path)
}

fn load_file(path: &Path) -> TableResult<TableSet> {
    match extension(path).as_deref() {
        Some("csv") => {
            let table = load_csv_file(path)?;
            log_info_indent(
                format!(
                    "{}: {} rows, {} columns ({}, '{}')",
                    table.name,
                    table.rows.len(),
                    table.headers.len(),
                    table.encoding,
                    table.delimiter.escape_default()
                ),
                1,
            );
            Ok(TableSet::new().with_table(table.name, table.rows))
        }
        Some("json") => load_json_file(path),
        _ => Err(TableError::UnsupportedSource(path.display().to_string())),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .filter(|e| e == "csv" || e == "json")
}

fn table_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_simple_csv() {
        let (headers, rows) = parse_csv_str("name;age\nAlice;30\nBob;25", ';').unwrap();
        assert_eq!(headers, vec!["name", "age"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("Alice"));
        assert_eq!(rows[1]["age"], json!("25"));
    }

    #[test]
    fn test_quoted_values_with_delimiter() {
        let (_, rows) = parse_csv_str("name,note\n\"Doe, Jane\",\"said \"\"hi\"\"\"", ',').unwrap();
        assert_eq!(rows[0]["name"], json!("Doe, Jane"));
        assert_eq!(rows[0]["note"], json!("said \"hi\""));
    }

    #[test]
    fn test_ragged_rows_and_blank_lines() {
        let (_, rows) = parse_csv_str("a;b;c\n1;;3\n\n4\n5;6;7;8", ';').unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["b"], json!(""));
        assert_eq!(rows[1]["c"], json!(""));
        assert_eq!(rows[2].len(), 3);
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_csv_str("  \n", ','), Err(TableError::EmptyFile)));
        assert!(matches!(parse_csv_bytes("t", b""), Err(TableError::EmptyFile)));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a|b|c"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_auto_parse_with_bom() {
        let bytes = b"\xEF\xBB\xBFname;age\nAlice;30";
        let table = parse_csv_bytes("People", bytes).unwrap();
        assert_eq!(table.delimiter, ';');
        assert_eq!(table.headers, vec!["name", "age"]);
        assert_eq!(table.rows[0]["name"], json!("Alice"));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1").unwrap();
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Employees.csv"), "Name,DeptID\nAlice,D1\n").unwrap();
        fs::write(
            dir.path().join("extra.json"),
            r#"{"Departments": [{"DeptID": "D1", "DeptName": "Eng"}, "skipped"]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tables = load_tables(dir.path()).unwrap();
        assert_eq!(tables.names(), vec!["Departments", "Employees"]);
        assert_eq!(tables.get("Departments").unwrap().len(), 1);
        assert_eq!(tables.get("Employees").unwrap()[0]["DeptID"], json!("D1"));
    }

    #[test]
    fn test_load_json_array_and_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Orders.json");
        fs::write(&path, r#"[{"Id": 1}, {"Id": 2}]"#).unwrap();
        let tables = load_tables(&path).unwrap();
        assert_eq!(tables.get("Orders").unwrap().len(), 2);

        let txt = dir.path().join("notes.txt");
        fs::write(&txt, "x").unwrap();
        assert!(matches!(load_tables(&txt), Err(TableError::UnsupportedSource(_))));

        let empty = TempDir::new().unwrap();
        assert!(matches!(load_tables(empty.path()), Err(TableError::UnsupportedSource(_))));
    }
}
