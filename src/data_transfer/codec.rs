//! Delimited text codec: header-driven decoding with best-effort typing, and
//! encoding with a declared column order.
//!
//! Fields containing the delimiter, a quote or a line break are wrapped in
//! double quotes with inner quotes doubled, so `encode` followed by `decode`
//! reproduces the rows.

use crate::db_types::{Row, Value};
use crate::error::TransferError;
use csv::{QuoteStyle, Reader, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use log::warn;
use std::collections::HashSet;
use std::io::Read;

pub const DEFAULT_DELIMITER: char = ',';

pub fn delimiter_byte(delimiter: char) -> Result<u8, TransferError> {
    if !delimiter.is_ascii() {
        return Err(TransferError::validation(format!(
            "Delimiter '{}' must be a single ASCII character",
            delimiter
        )));
    }
    if matches!(delimiter, '"' | '\n' | '\r') {
        return Err(TransferError::validation(format!(
            "Delimiter {:?} is reserved",
            delimiter
        )));
    }
    Ok(delimiter as u8)
}

/// Numeric-looking text becomes a number, `true`/`false` a boolean, an empty
/// field null; anything else stays text.
pub fn coerce_field(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if !looks_numeric(raw) {
        return Value::Text(raw.to_string());
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Value::Float(v),
        _ => Value::Text(raw.to_string()),
    }
}

fn looks_numeric(raw: &str) -> bool {
    let digits = raw
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(raw);
    if digits.is_empty() || !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return false;
    }
    // "007" is an identifier, not seven
    let bytes = digits.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' && bytes[1].is_ascii_digit() {
        return false;
    }
    digits.chars().any(|c| c.is_ascii_digit())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
}

pub(crate) fn csv_reader<R: Read>(source: R, delimiter: u8) -> Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        // field counts are checked per record so malformed rows can be skipped
        .flexible(true)
        .from_reader(source)
}

pub(crate) fn read_header<R: Read>(reader: &mut Reader<R>) -> Result<Vec<String>, TransferError> {
    let headers = reader.headers()?.clone();
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(headers.len());

    for (index, header) in headers.iter().enumerate() {
        let name = if index == 0 {
            header.trim_start_matches('\u{feff}')
        } else {
            header
        };
        if !seen.insert(name.to_string()) {
            return Err(TransferError::parse(1, format!("Duplicate column '{}' in header", name)));
        }
        columns.push(name.to_string());
    }

    if columns.len() == 1 && columns[0].is_empty() {
        return Ok(Vec::new());
    }
    Ok(columns)
}

/// Result of reading up to `max_rows` records.
pub(crate) struct RecordChunk {
    pub rows: Vec<Row>,
    pub skipped: u64,
    pub exhausted: bool,
}

pub(crate) fn read_records<R: Read>(
    reader: &mut Reader<R>,
    columns: &[String],
    validate: bool,
    max_rows: usize,
) -> Result<RecordChunk, TransferError> {
    let mut record = StringRecord::new();
    let mut chunk = RecordChunk {
        rows: Vec::new(),
        skipped: 0,
        exhausted: false,
    };

    while chunk.rows.len() < max_rows {
        if !reader.read_record(&mut record)? {
            chunk.exhausted = true;
            break;
        }

        let line = record.position().map(|p| p.line()).unwrap_or_default();
        if record.len() != columns.len() {
            let message = format!(
                "expected {} fields, found {}",
                columns.len(),
                record.len()
            );
            if validate {
                return Err(TransferError::parse(line, message));
            }
            warn!("Skipping malformed row at line {}: {}", line, message);
            chunk.skipped += 1;
            continue;
        }

        let row = columns
            .iter()
            .zip(record.iter())
            .map(|(column, field)| (column.clone(), coerce_field(field)))
            .collect::<Row>();
        chunk.rows.push(row);
    }

    Ok(chunk)
}

pub(crate) fn encode_records(
    rows: &[Row],
    columns: &[String],
    delimiter: u8,
    include_header: bool,
) -> Result<Vec<u8>, TransferError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(Vec::new());

    let encode_err = |e: csv::Error| TransferError::write(0, format!("Failed to encode row: {}", e));

    if include_header {
        writer.write_record(columns).map_err(encode_err)?;
    }

    for row in rows {
        let cells = columns
            .iter()
            .map(|column| row.get(column).map(Value::to_string).unwrap_or_default());
        writer.write_record(cells).map_err(encode_err)?;
    }

    writer
        .into_inner()
        .map_err(|e| TransferError::write(0, format!("Failed to flush encoded rows: {}", e)))
}

/// Header line plus one line per row, values in `columns` order.
pub fn encode(rows: &[Row], columns: &[String], delimiter: char) -> Result<String, TransferError> {
    let bytes = encode_records(rows, columns, delimiter_byte(delimiter)?, true)?;
    String::from_utf8(bytes)
        .map_err(|e| TransferError::write(0, format!("Encoded output is not UTF-8: {}", e)))
}

/// Strict inverse of `encode`: a row with the wrong field count is an error.
pub fn decode(text: &str, delimiter: char) -> Result<(Vec<String>, Vec<Row>), TransferError> {
    let mut reader = csv_reader(text.as_bytes(), delimiter_byte(delimiter)?);
    let columns = read_header(&mut reader)?;
    if columns.is_empty() {
        return Ok((columns, Vec::new()));
    }
    let chunk = read_records(&mut reader, &columns, true, usize::MAX)?;
    Ok((columns, chunk.rows))
}
