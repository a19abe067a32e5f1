// =====================================================
// SCHEMA INSPECTOR
// Reachability, table listing, column description and bounded previews
// =====================================================

use crate::db::registry::ConnectionRegistry;
use crate::db_types::{ColumnDescriptor, ConnectionDescriptor, Row, ValidationResponse};
use crate::error::TransferError;
use log::warn;

pub const MAX_PREVIEW_LIMIT: usize = 1000;

/// Never errors: every failure becomes `success: false` with a reason.
pub async fn validate_connection(
    registry: &ConnectionRegistry,
    descriptor: &ConnectionDescriptor,
) -> ValidationResponse {
    let warehouse = match registry.checkout(descriptor).await {
        // the connector pinged it moments ago
        Ok((_, true)) => return ValidationResponse::ok(),
        Ok((warehouse, false)) => warehouse,
        Err(err) => {
            warn!("Validation of {} failed: {}", descriptor.display_label(), err);
            return ValidationResponse::failed(err.to_string());
        }
    };

    match warehouse.ping().await {
        Ok(()) => ValidationResponse::ok(),
        Err(err) => {
            // the pooled handle went stale; drop it so the next acquire reconnects
            registry.release(descriptor).await;
            warn!("Validation of {} failed: {}", descriptor.display_label(), err);
            ValidationResponse::failed(err.to_string())
        }
    }
}

pub async fn list_tables(
    registry: &ConnectionRegistry,
    descriptor: &ConnectionDescriptor,
) -> Result<Vec<String>, TransferError> {
    let warehouse = registry.acquire(descriptor).await?;
    let mut tables = warehouse.list_tables().await?;
    tables.sort();
    Ok(tables)
}

pub async fn describe_table(
    registry: &ConnectionRegistry,
    descriptor: &ConnectionDescriptor,
    table: &str,
) -> Result<Vec<ColumnDescriptor>, TransferError> {
    let table = table.trim();
    if table.is_empty() {
        return Err(TransferError::validation("Table name is required"));
    }

    let warehouse = registry.acquire(descriptor).await?;
    let columns = warehouse.describe_table(table).await?;
    if columns.is_empty() {
        return Err(TransferError::schema(format!(
            "Table '{}' not found in database '{}'",
            table, descriptor.database
        )));
    }
    Ok(columns)
}

/// First `limit` rows of a projection, for display. Not a transfer path.
pub async fn preview(
    registry: &ConnectionRegistry,
    descriptor: &ConnectionDescriptor,
    table: &str,
    columns: &[String],
    limit: usize,
) -> Result<Vec<Row>, TransferError> {
    if table.trim().is_empty() {
        return Err(TransferError::validation("Table name is required"));
    }
    if columns.is_empty() {
        return Err(TransferError::validation(
            "At least one column must be selected",
        ));
    }
    let limit = limit.clamp(1, MAX_PREVIEW_LIMIT);

    let warehouse = registry.acquire(descriptor).await?;
    let mut stream = warehouse.open_rows(table.trim(), columns, Some(limit)).await?;

    let mut rows = Vec::with_capacity(limit);
    while rows.len() < limit {
        match stream.next_batch(limit - rows.len()).await? {
            Some(batch) => rows.extend(batch),
            None => break,
        }
    }
    rows.truncate(limit);
    Ok(rows)
}
