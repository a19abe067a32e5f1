use crate::config::TransferSettings;
use crate::data_transfer::mapper::{ColumnMappingRule, MappedRowStream};
use crate::data_transfer::models::{
    FlatFileInput, SourceSpec, TargetSpec, TransferDirection, TransferRequest, TransferStatus,
};
use crate::data_transfer::reader::{FlatFileRowStream, RowStream};
use crate::data_transfer::sink::{
    BatchFailure, BatchProgress, BatchSink, BatchWriter, DatabaseSink, FlatFileSink,
};
use crate::data_transfer::storage::TransferStore;
use crate::db::registry::ConnectionRegistry;
use crate::db::traits::Warehouse;
use crate::db_types::ConnectionDescriptor;
use crate::error::TransferError;
use async_trait::async_trait;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, BufWriter};
use tokio_util::sync::CancellationToken;

/// Advisory percentage after a flushed batch. Known totals scale to 99;
/// unknown ones step by 5 up to 95. Completion alone reports 100.
pub fn progress_percent(records_written: u64, batches: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (records_written.saturating_mul(100) / total).min(99) as u8,
        _ => batches.saturating_mul(5).min(95) as u8,
    }
}

struct StoreProgress {
    store: Arc<TransferStore>,
    id: String,
    total: Option<u64>,
}

#[async_trait]
impl BatchProgress for StoreProgress {
    async fn batch_flushed(&self, batches: u64, records_written: u64) {
        let pct = progress_percent(records_written, batches, self.total);
        self.store.record_progress(&self.id, records_written, pct).await;
    }
}

fn before_streaming(error: TransferError) -> BatchFailure {
    BatchFailure {
        records_written: 0,
        error,
    }
}

/// Columns the caller asked for must all exist on the source table.
async fn check_columns(
    warehouse: &dyn Warehouse,
    table: &str,
    columns: &[String],
) -> Result<(), TransferError> {
    let described = warehouse.describe_table(table).await?;
    if described.is_empty() {
        return Err(TransferError::schema(format!("Table '{}' not found", table)));
    }
    for column in columns {
        if !described.iter().any(|d| &d.name == column) {
            return Err(TransferError::schema(format!(
                "Column '{}' does not exist in table '{}'",
                column, table
            )));
        }
    }
    Ok(())
}

struct ExportSource<'a> {
    connection: &'a ConnectionDescriptor,
    table: &'a str,
    columns: &'a [String],
}

fn export_parts(request: &TransferRequest) -> Result<(ExportSource<'_>, &str, char), TransferError> {
    match (&request.source, &request.target) {
        (
            SourceSpec::Database {
                connection,
                table,
                columns,
            },
            TargetSpec::FlatFile {
                table: stem,
                delimiter,
            },
        ) => Ok((
            ExportSource {
                connection,
                table,
                columns,
            },
            stem,
            *delimiter,
        )),
        _ => Err(TransferError::validation(
            "Expected a database source and a flat-file target",
        )),
    }
}

/// Accepts transfer requests, tracks their status and runs one sequential
/// reader/writer pipeline per transfer.
#[derive(Clone)]
pub struct TransferOrchestrator {
    registry: Arc<ConnectionRegistry>,
    settings: TransferSettings,
    store: Arc<TransferStore>,
}

impl TransferOrchestrator {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: TransferSettings) -> Self {
        Self {
            registry,
            settings,
            store: Arc::new(TransferStore::new()),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Where an export of `stem` is written.
    pub fn export_path(&self, stem: &str) -> PathBuf {
        self.settings.output_dir.join(format!("{}_export.csv", stem))
    }

    // Mints the id first so even a rejected request leaves a failed status.
    async fn accept(
        &self,
        request: &TransferRequest,
    ) -> Result<(TransferStatus, TransferDirection, CancellationToken), TransferStatus> {
        match request.validate() {
            Ok(direction) => {
                let (status, cancel) = self.store.create(Some(direction)).await;
                info!("Accepted {:?} transfer {}", direction, status.id);
                Ok((status, direction, cancel))
            }
            Err(error) => {
                let (status, _) = self.store.create(request.direction().ok()).await;
                warn!("Rejected transfer {}: {}", status.id, error);
                Err(self
                    .store
                    .fail(&status.id, &error, 0)
                    .await
                    .unwrap_or(status))
            }
        }
    }

    /// Returns the `pending` status at once; the pipeline runs on its own task.
    pub async fn start_transfer(&self, request: TransferRequest) -> TransferStatus {
        let (status, direction, cancel) = match self.accept(&request).await {
            Ok(accepted) => accepted,
            Err(failed) => return failed,
        };

        let this = self.clone();
        let id = status.id.clone();
        tokio::spawn(async move {
            this.execute(&id, &request, direction, cancel).await;
        });
        status
    }

    /// Runs the transfer to a terminal state before returning.
    pub async fn run_transfer(&self, request: TransferRequest) -> TransferStatus {
        let (status, direction, cancel) = match self.accept(&request).await {
            Ok(accepted) => accepted,
            Err(failed) => return failed,
        };
        self.execute(&status.id, &request, direction, cancel).await
    }

    /// Streams a database export into `writer` instead of a file.
    pub async fn export_to_writer<W>(&self, request: TransferRequest, writer: W) -> TransferStatus
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (status, direction, cancel) = match self.accept(&request).await {
            Ok(accepted) => accepted,
            Err(failed) => return failed,
        };
        if direction != TransferDirection::Export {
            let error = TransferError::validation("export_to_writer requires a database source");
            return self
                .store
                .fail(&status.id, &error, 0)
                .await
                .unwrap_or(status);
        }

        let result = match export_parts(&request) {
            Ok((source, _, delimiter)) => match self.open_export(&source).await {
                Ok((stream, total)) => {
                    self.export_into(&status.id, stream, total, writer, delimiter, cancel)
                        .await
                }
                Err(error) => Err(before_streaming(error)),
            },
            Err(error) => Err(before_streaming(error)),
        };
        self.finalize(&status.id, result).await
    }

    pub async fn get_status(&self, id: &str) -> Result<TransferStatus, TransferError> {
        self.store.get(id).await
    }

    pub async fn list_transfers(&self, limit: Option<usize>) -> Vec<TransferStatus> {
        self.store.list(limit).await
    }

    /// The pipeline stops after its in-flight batch and fails as `cancelled`.
    pub async fn cancel_transfer(&self, id: &str) -> Result<TransferStatus, TransferError> {
        let status = self.store.cancel(id).await?;
        if !status.state.is_terminal() {
            info!("Cancellation requested for transfer {}", status.id);
        }
        Ok(status)
    }

    // =====================================================
    // PIPELINE
    // =====================================================

    async fn execute(
        &self,
        id: &str,
        request: &TransferRequest,
        direction: TransferDirection,
        cancel: CancellationToken,
    ) -> TransferStatus {
        let result = match direction {
            TransferDirection::Export => self.run_export(id, request, cancel).await,
            TransferDirection::Import => self.run_import(id, request, cancel).await,
        };
        self.finalize(id, result).await
    }

    async fn finalize(&self, id: &str, result: Result<u64, BatchFailure>) -> TransferStatus {
        let finished = match result {
            Ok(records) => {
                info!("Transfer {} completed: {} records", id, records);
                self.store.complete(id, records).await
            }
            Err(failure) => {
                warn!(
                    "Transfer {} failed after {} records: {}",
                    id, failure.records_written, failure.error
                );
                self.store
                    .fail(id, &failure.error, failure.records_written)
                    .await
            }
        };

        match finished {
            Some(status) => status,
            None => match self.store.get(id).await {
                Ok(status) => status,
                Err(_) => TransferStatus::pending(id.to_string()),
            },
        }
    }

    async fn pump(
        &self,
        id: &str,
        stream: &mut dyn RowStream,
        sink: &mut dyn BatchSink,
        total: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<u64, BatchFailure> {
        if self.store.mark_running(id).await.is_none() {
            return Err(before_streaming(TransferError::validation(format!(
                "Transfer '{}' is no longer pending",
                id
            ))));
        }

        let progress = StoreProgress {
            store: self.store.clone(),
            id: id.to_string(),
            total,
        };
        BatchWriter::new(self.settings.batch_size, cancel)
            .write(stream, sink, &progress)
            .await
    }

    async fn open_export(
        &self,
        source: &ExportSource<'_>,
    ) -> Result<(Box<dyn RowStream>, Option<u64>), TransferError> {
        let warehouse = self.registry.acquire(source.connection).await?;
        check_columns(warehouse.as_ref(), source.table, source.columns).await?;

        let total = match warehouse.count_rows(source.table).await {
            Ok(total) => Some(total),
            Err(err) => {
                warn!("Row count for {} unavailable: {}", source.table, err);
                None
            }
        };
        let stream = warehouse
            .open_rows(source.table, source.columns, None)
            .await?;
        Ok((stream, total))
    }

    async fn export_into<W>(
        &self,
        id: &str,
        mut stream: Box<dyn RowStream>,
        total: Option<u64>,
        writer: W,
        delimiter: char,
        cancel: CancellationToken,
    ) -> Result<u64, BatchFailure>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut sink = FlatFileSink::new(writer, delimiter).map_err(before_streaming)?;
        self.pump(id, stream.as_mut(), &mut sink, total, cancel)
            .await
    }

    // The source is checked before the output file exists, so a bad table or
    // column never leaves an empty file behind.
    async fn run_export(
        &self,
        id: &str,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<u64, BatchFailure> {
        let (source, stem, delimiter) = export_parts(request).map_err(before_streaming)?;
        let (stream, total) = self.open_export(&source).await.map_err(before_streaming)?;
        let path = self.export_path(stem);

        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| {
                before_streaming(TransferError::write(
                    0,
                    format!(
                        "Cannot create output directory {}: {}",
                        self.settings.output_dir.display(),
                        e
                    ),
                ))
            })?;
        let file = tokio::fs::File::create(&path).await.map_err(|e| {
            before_streaming(TransferError::write(
                0,
                format!("Cannot create {}: {}", path.display(), e),
            ))
        })?;
        self.store
            .set_output_path(id, path.display().to_string())
            .await;
        info!("Exporting {} to {}", source.table, path.display());

        self.export_into(id, stream, total, BufWriter::new(file), delimiter, cancel)
            .await
    }

    async fn open_import(
        &self,
        input: FlatFileInput,
        delimiter: char,
        validate: bool,
        mapping: Vec<ColumnMappingRule>,
        warehouse: &dyn Warehouse,
        table: &str,
    ) -> Result<Box<dyn RowStream>, TransferError> {
        let stream = FlatFileRowStream::open(input, delimiter, validate).await?;
        let stream = MappedRowStream::wrap(stream, mapping)?;
        check_columns(warehouse, table, stream.columns()).await?;
        Ok(stream)
    }

    async fn run_import(
        &self,
        id: &str,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<u64, BatchFailure> {
        let (
            SourceSpec::FlatFile {
                input,
                delimiter,
                validate,
            },
            TargetSpec::Database {
                connection,
                table,
                mapping,
            },
        ) = (&request.source, &request.target)
        else {
            return Err(before_streaming(TransferError::validation(
                "Expected a flat-file source and a database target",
            )));
        };

        let warehouse = self
            .registry
            .acquire(connection)
            .await
            .map_err(before_streaming)?;
        let mut stream = self
            .open_import(
                input.clone(),
                *delimiter,
                *validate,
                mapping.clone(),
                warehouse.as_ref(),
                table,
            )
            .await
            .map_err(before_streaming)?;
        let total = stream.estimated_total();
        info!("Importing into {} ({} columns)", table, stream.columns().len());

        let mut sink = DatabaseSink::new(warehouse, table.clone());
        self.pump(id, stream.as_mut(), &mut sink, total, cancel)
            .await
    }
}
