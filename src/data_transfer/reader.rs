//! Lazy row sources for the transfer pipeline.
//!
//! A `RowStream` is finite and not restartable: re-reading means opening a new
//! one. The ClickHouse implementation lives next to the client in
//! `crate::clickhouse`; this module holds the flat-file and in-memory ones.

use crate::data_transfer::codec;
use crate::data_transfer::models::FlatFileInput;
use crate::db_types::Row;
use crate::error::TransferError;
use async_trait::async_trait;
use log::{info, warn};
use std::io::{Cursor, Read};

#[async_trait]
pub trait RowStream: Send {
    /// Column order of the source; drives headers and insert column lists.
    fn columns(&self) -> &[String];

    /// Up to `max_rows` rows, or `None` once the source is exhausted. Never
    /// returns an empty batch.
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, TransferError>;

    /// Total row count when cheaply known; used for advisory progress only.
    fn estimated_total(&self) -> Option<u64> {
        None
    }
}

// --- In-memory records ---

pub struct RecordsRowStream {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    total: u64,
}

impl RecordsRowStream {
    /// An empty `columns` list falls back to the union of row keys.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let columns = if columns.is_empty() {
            let mut names = Vec::new();
            for row in &rows {
                for key in row.keys() {
                    if !names.contains(key) {
                        names.push(key.clone());
                    }
                }
            }
            names
        } else {
            columns
        };

        Self {
            columns,
            total: rows.len() as u64,
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowStream for RecordsRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, TransferError> {
        let batch = self.rows.by_ref().take(max_rows.max(1)).collect::<Vec<Row>>();
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    fn estimated_total(&self) -> Option<u64> {
        Some(self.total)
    }
}

// --- Delimited text ---

type BoxedCsvReader = csv::Reader<Box<dyn Read + Send>>;

/// Parses one batch at a time on the blocking pool so file reads never stall
/// the runtime.
pub struct FlatFileRowStream {
    columns: Vec<String>,
    reader: Option<BoxedCsvReader>,
    validate: bool,
    total: Option<u64>,
    skipped: u64,
    exhausted: bool,
}

impl FlatFileRowStream {
    pub async fn open(
        input: FlatFileInput,
        delimiter: char,
        validate: bool,
    ) -> Result<Box<dyn RowStream>, TransferError> {
        let delimiter = codec::delimiter_byte(delimiter)?;

        let (source, total): (Box<dyn Read + Send>, Option<u64>) = match input {
            FlatFileInput::Records { columns, rows } => {
                return Ok(Box::new(RecordsRowStream::new(columns, rows)));
            }
            FlatFileInput::Text { text } => {
                let total = estimate_data_lines(&text);
                (Box::new(Cursor::new(text.into_bytes())), Some(total))
            }
            FlatFileInput::Path { path } => {
                info!("Reading flat file {}", path.display());
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| {
                        TransferError::validation(format!(
                            "Cannot open flat file {}: {}",
                            path.display(),
                            e
                        ))
                    })?
                    .into_std()
                    .await;
                (Box::new(std::io::BufReader::new(file)), None)
            }
        };

        let (reader, columns) = tokio::task::spawn_blocking(move || {
            let mut reader = codec::csv_reader(source, delimiter);
            let columns = codec::read_header(&mut reader);
            (reader, columns)
        })
        .await
        .map_err(|e| TransferError::parse(1, format!("Flat-file header task failed: {}", e)))?;
        let columns = columns?;

        Ok(Box::new(FlatFileRowStream {
            exhausted: columns.is_empty(),
            columns,
            reader: Some(reader),
            validate,
            total,
            skipped: 0,
        }))
    }
}

// Advisory only: quoted line breaks inflate the count.
fn estimate_data_lines(text: &str) -> u64 {
    let lines = text.lines().filter(|line| !line.trim().is_empty()).count() as u64;
    lines.saturating_sub(1)
}

#[async_trait]
impl RowStream for FlatFileRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, TransferError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| TransferError::parse(0, "Flat-file reader is no longer available"))?;
        let columns = self.columns.clone();
        let validate = self.validate;
        let max_rows = max_rows.max(1);

        let (reader, chunk) = tokio::task::spawn_blocking(move || {
            let chunk = codec::read_records(&mut reader, &columns, validate, max_rows);
            (reader, chunk)
        })
        .await
        .map_err(|e| TransferError::parse(0, format!("Flat-file reader task failed: {}", e)))?;
        self.reader = Some(reader);

        let chunk = chunk?;
        self.skipped += chunk.skipped;
        if chunk.exhausted {
            self.exhausted = true;
            if self.skipped > 0 {
                warn!("Dropped {} malformed flat-file rows", self.skipped);
            }
        }

        if chunk.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk.rows))
        }
    }

    fn estimated_total(&self) -> Option<u64> {
        self.total
    }
}

#[cfg(test)]
mod tests;
