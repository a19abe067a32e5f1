//! Streams tables between ClickHouse and delimited flat files in fixed-size
//! batches, tracking every transfer by id.

pub mod clickhouse;
pub mod config;
pub mod data_transfer;
pub mod db;
pub mod db_types;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::clickhouse::{ClickHouseConnector, ClickHouseWarehouse};
pub use crate::config::{ClickHouseDefaults, TransferSettings};
pub use crate::data_transfer::commands::TransferOrchestrator;
pub use crate::data_transfer::models::{
    FlatFileInput, SourceSpec, TargetSpec, TransferRequest, TransferState, TransferStatus,
};
pub use crate::db::registry::ConnectionRegistry;
pub use crate::db_types::{ColumnDescriptor, ConnectionDescriptor, Row, ValidationResponse, Value};
pub use crate::error::TransferError;
