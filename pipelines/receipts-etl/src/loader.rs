//! Record loader for newline-delimited JSON sources
//!
//! Reads one JSON object per line into a [`RawTable`]: one record per line,
//! one column per distinct top-level key in first-seen order. Nested values
//! stay as opaque JSON per cell; a key missing from a line reads as null.

use receipts_common::{EtlError, MalformedLinePolicy, Result};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use tracing::{debug, info, warn};

static NULL: Value = Value::Null;

/// One source line parsed into its top-level fields
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based line number in the source
    pub line: usize,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Cell value, null when the key is absent from this line
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&NULL)
    }
}

/// A loaded source before normalization
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    name: String,
    columns: Vec<String>,
    records: Vec<RawRecord>,
    /// Non-blank lines read from the source
    pub source_lines: usize,
    /// Malformed lines dropped under [`MalformedLinePolicy::Skip`]
    pub skipped_lines: usize,
}

impl RawTable {
    /// Create an empty table for a named source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinct top-level keys in first-seen order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Fail when a required key is absent from every record of a non-empty table
    pub fn require_column(&self, column: &str) -> Result<()> {
        if self.is_empty() || self.has_column(column) {
            return Ok(());
        }
        Err(EtlError::MissingColumn {
            table: self.name.clone(),
            column: column.to_string(),
        })
    }

    /// Append a parsed record, registering any new columns
    pub fn push(&mut self, record: RawRecord) {
        for key in record.fields.keys() {
            if !self.has_column(key) {
                debug!("{}: new column '{}' at line {}", self.name, key, record.line);
                self.columns.push(key.clone());
            }
        }
        self.records.push(record);
    }
}

/// Load a newline-delimited JSON file
pub fn load_jsonl_file(
    path: impl AsRef<Path>,
    name: &str,
    policy: MalformedLinePolicy,
) -> Result<RawTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| EtlError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let table = load_jsonl_reader(BufReader::new(file), name, policy)?;

    info!(
        "Loaded {} records from {} ({} columns, {} skipped lines)",
        table.len(),
        path.display(),
        table.columns().len(),
        table.skipped_lines
    );
    Ok(table)
}

/// Load newline-delimited JSON from any buffered reader
pub fn load_jsonl_reader<R: BufRead>(
    reader: R,
    name: &str,
    policy: MalformedLinePolicy,
) -> Result<RawTable> {
    let mut table = RawTable::new(name);

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let parsed = match line {
            Ok(text) => {
                let text = text.trim_start_matches('\u{feff}').trim();
                if text.is_empty() {
                    continue;
                }
                table.source_lines += 1;
                parse_record(text)
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                table.source_lines += 1;
                Err(format!("invalid UTF-8: {}", e))
            }
            Err(e) => {
                return Err(EtlError::Io(format!(
                    "Failed to read {} at line {}: {}",
                    name, line_number, e
                )))
            }
        };

        match parsed {
            Ok(fields) => {
                table.push(RawRecord {
                    line: line_number,
                    fields,
                });
            }
            Err(message) => match policy {
                MalformedLinePolicy::Abort => {
                    return Err(EtlError::MalformedRecord {
                        source_name: name.to_string(),
                        line: line_number,
                        message,
                    });
                }
                MalformedLinePolicy::Skip => {
                    warn!(
                        "Skipping malformed line {} in {}: {}",
                        line_number, name, message
                    );
                    table.skipped_lines += 1;
                }
            },
        }
    }

    Ok(table)
}

fn parse_record(text: &str) -> std::result::Result<Map<String, Value>, String> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(e) => quote_overflowing_numbers(text)
            .and_then(|quoted| serde_json::from_str::<Value>(&quoted).ok())
            .ok_or_else(|| e.to_string())?,
    };

    match value {
        Value::Object(fields) => Ok(fields),
        other => Err(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        )),
    }
}

/// Rewrite numeric literals that overflow a double (`1e400`) as JSON strings
///
/// serde_json rejects the whole line for such a literal. Quoted, the value
/// reaches the normalizer as text and fails coercion for that cell only.
/// Returns `None` when the line has no such literal.
fn quote_overflowing_numbers(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut copied_to = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                let end = bytes[i..]
                    .iter()
                    .position(|c| !matches!(c, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
                    .map_or(bytes.len(), |offset| i + offset);
                let literal = &text[i..end];
                if literal.parse::<f64>().is_ok_and(f64::is_infinite) {
                    out.push_str(&text[copied_to..i]);
                    out.push('"');
                    out.push_str(literal);
                    out.push('"');
                    copied_to = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    if copied_to == 0 {
        return None;
    }
    out.push_str(&text[copied_to..]);
    Some(out)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
