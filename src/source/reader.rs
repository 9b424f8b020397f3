//! NDJSON parsing of source files.
//!
//! A file is decompressed as a stream and split into lines. Each non-blank
//! line must be a JSON object; anything else is kept aside as a malformed
//! line so the rest of the file still loads.

use serde_json::{Map, Value};
use snafu::prelude::*;
use std::io::BufRead;

use crate::error::{DecompressSnafu, SourceError};

use super::CompressionFormat;

/// A parsed record and the 1-based line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub line: usize,
    pub fields: Map<String, Value>,
}

/// A line that could not be parsed as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedLine {
    pub line: usize,
    pub raw: String,
    pub reason: String,
}

/// Records parsed from one source file.
#[derive(Debug, Clone, Default)]
pub struct FileRecords {
    pub path: String,
    pub records: Vec<Record>,
    pub malformed: Vec<MalformedLine>,
}

/// Parse the raw bytes of a source file.
///
/// Fails only when the file cannot be decompressed.
pub fn read_ndjson(path: &str, data: &[u8]) -> Result<FileRecords, SourceError> {
    let mut reader = CompressionFormat::from_path(path)
        .codec()
        .create_reader(data)
        .context(DecompressSnafu { path })?;

    let mut file = FileRecords {
        path: path.to_string(),
        ..Default::default()
    };
    let mut buf = Vec::new();
    let mut line_number = 0;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .context(DecompressSnafu { path })?;
        if read == 0 {
            break;
        }
        line_number += 1;

        let line = trim_line_end(&buf);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(fields)) => file.records.push(Record {
                line: line_number,
                fields,
            }),
            Ok(other) => file.malformed.push(MalformedLine {
                line: line_number,
                raw: String::from_utf8_lossy(line).into_owned(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => file.malformed.push(MalformedLine {
                line: line_number,
                raw: String::from_utf8_lossy(line).into_owned(),
                reason: e.to_string(),
            }),
        }
    }

    Ok(file)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
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
