//! Batch writer: drains a `RowStream` into a sink one fixed-size batch at a
//! time.
//!
//! Delivery is at-least-once with no rollback. When a batch fails, batches
//! flushed before it stay in the target and the failure reports how many
//! records they hold. Re-running a transfer starts over from the first row.

use crate::data_transfer::codec;
use crate::data_transfer::reader::RowStream;
use crate::db::traits::Warehouse;
use crate::db_types::Row;
use crate::error::TransferError;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[async_trait]
pub trait BatchSink: Send {
    /// One write operation for the whole batch.
    async fn write_batch(&mut self, columns: &[String], rows: &[Row]) -> Result<(), TransferError>;

    /// Called once after the last batch.
    async fn finish(&mut self, columns: &[String]) -> Result<(), TransferError>;
}

/// Receives the running totals after every flushed batch.
#[async_trait]
pub trait BatchProgress: Send + Sync {
    async fn batch_flushed(&self, batches: u64, records_written: u64);
}

#[async_trait]
impl BatchProgress for () {
    async fn batch_flushed(&self, _batches: u64, _records_written: u64) {}
}

// --- Database target ---

/// One `insert_rows` call per batch, rows kept in structured form.
pub struct DatabaseSink {
    warehouse: Arc<dyn Warehouse>,
    table: String,
}

impl DatabaseSink {
    pub fn new(warehouse: Arc<dyn Warehouse>, table: impl Into<String>) -> Self {
        Self {
            warehouse,
            table: table.into(),
        }
    }
}

#[async_trait]
impl BatchSink for DatabaseSink {
    async fn write_batch(&mut self, columns: &[String], rows: &[Row]) -> Result<(), TransferError> {
        self.warehouse.insert_rows(&self.table, columns, rows).await
    }

    async fn finish(&mut self, _columns: &[String]) -> Result<(), TransferError> {
        Ok(())
    }
}

// --- Flat-file target ---

/// Appends delimited text to any async writer. The header goes out with the
/// first batch, or at `finish` when there were no rows at all.
pub struct FlatFileSink<W> {
    writer: W,
    delimiter: u8,
    header_written: bool,
}

impl<W> FlatFileSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, delimiter: char) -> Result<Self, TransferError> {
        Ok(Self {
            writer,
            delimiter: codec::delimiter_byte(delimiter)?,
            header_written: false,
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn append(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| TransferError::write(0, format!("Failed to write output: {}", e)))
    }
}

#[async_trait]
impl<W> BatchSink for FlatFileSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_batch(&mut self, columns: &[String], rows: &[Row]) -> Result<(), TransferError> {
        let bytes = codec::encode_records(rows, columns, self.delimiter, !self.header_written)?;
        self.append(&bytes).await?;
        self.header_written = true;
        Ok(())
    }

    async fn finish(&mut self, columns: &[String]) -> Result<(), TransferError> {
        if !self.header_written {
            let bytes = codec::encode_records(&[], columns, self.delimiter, true)?;
            self.append(&bytes).await?;
            self.header_written = true;
        }
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::write(0, format!("Failed to flush output: {}", e)))
    }
}

// --- Writer ---

/// A stopped write: what reached the target, and why it stopped.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BatchFailure {
    pub records_written: u64,
    pub error: TransferError,
}

impl BatchFailure {
    fn new(records_written: u64, error: TransferError) -> Self {
        // sinks don't know the running total; stamp it here
        let error = match error {
            TransferError::Write { message, .. } => TransferError::Write {
                records_written,
                message,
            },
            other => other,
        };
        Self {
            records_written,
            error,
        }
    }
}

pub struct BatchWriter {
    pub batch_size: usize,
    pub cancel: CancellationToken,
}

impl BatchWriter {
    pub fn new(batch_size: usize, cancel: CancellationToken) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cancel,
        }
    }

    /// Pulls batch N+1 only after batch N is flushed, so at most one batch is
    /// held in memory. Cancellation is honoured between batches.
    pub async fn write(
        &self,
        stream: &mut dyn RowStream,
        sink: &mut dyn BatchSink,
        progress: &dyn BatchProgress,
    ) -> Result<u64, BatchFailure> {
        let columns = stream.columns().to_vec();
        let mut written = 0u64;
        let mut batches = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(BatchFailure::new(written, TransferError::Cancelled));
            }

            let batch = match stream.next_batch(self.batch_size).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => return Err(BatchFailure::new(written, err)),
            };

            if let Err(err) = sink.write_batch(&columns, &batch).await {
                return Err(BatchFailure::new(written, err));
            }

            batches += 1;
            written += batch.len() as u64;
            debug!("Flushed batch {} ({} records total)", batches, written);
            progress.batch_flushed(batches, written).await;
        }

        sink.finish(&columns)
            .await
            .map_err(|err| BatchFailure::new(written, err))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests;
