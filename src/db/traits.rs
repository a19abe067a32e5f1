// Store seams used by the registry, the schema inspector and the transfer
// pipeline. ClickHouse implements them for real; tests plug in fakes.

use crate::data_transfer::reader::RowStream;
use crate::db_types::{ColumnDescriptor, ConnectionDescriptor, Row};
use crate::error::TransferError;
use async_trait::async_trait;
use std::sync::Arc;

/// A live, reusable handle to one remote database.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Lightweight reachability check; touches no table data.
    async fn ping(&self) -> Result<(), TransferError>;

    async fn list_tables(&self) -> Result<Vec<String>, TransferError>;

    /// Columns in ordinal position order.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>, TransferError>;

    async fn count_rows(&self, table: &str) -> Result<u64, TransferError>;

    /// Projection over `columns` in the given order, pulled incrementally.
    async fn open_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<usize>,
    ) -> Result<Box<dyn RowStream>, TransferError>;

    /// One bulk insert call for the whole slice.
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<(), TransferError>;

    async fn close(&self) {}
}

/// Creates handles for the registry. Implementations must verify the handle
/// works before returning it.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Warehouse>, TransferError>;
}
