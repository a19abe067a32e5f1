// =====================================================
// ClickHouse NATIVE HTTP OPERATIONS
// =====================================================

use crate::data_transfer::reader::RowStream;
use crate::db::sql_utils;
use crate::db::traits::{Warehouse, WarehouseConnector};
use crate::db_types::{ColumnDescriptor, ConnectionDescriptor, Row, Value};
use crate::error::TransferError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use clickhouse::Client;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const READ_FORMAT: &str = "JSONCompactEachRowWithNamesAndTypes";

// --- Error classification ---

/// Maps ClickHouse error text onto the transfer taxonomy. `fallback` decides
/// what an unrecognised failure becomes for the calling operation.
pub(crate) fn classify_error(
    message: &str,
    fallback: impl FnOnce(String) -> TransferError,
) -> TransferError {
    let msg = message.trim().to_string();
    let lower = msg.to_lowercase();

    if lower.contains("authentication")
        || lower.contains("access denied")
        || lower.contains("wrong password")
        || lower.contains("required_password")
        || lower.contains("unknown_user")
    {
        TransferError::connection_fatal(msg)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        TransferError::connection(msg)
    } else if lower.contains("unknown_table")
        || lower.contains("unknown_database")
        || lower.contains("unknown table")
        || lower.contains("unknown database")
        || lower.contains("doesn't exist")
        || lower.contains("does not exist")
        || lower.contains("no_such_column")
        || lower.contains("no such column")
        || lower.contains("unknown_identifier")
        || lower.contains("unknown identifier")
        || lower.contains("missing columns")
        || lower.contains("there_is_no_column")
    {
        TransferError::schema(msg)
    } else if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
        || lower.contains("service_unavailable")
        || lower.contains("dns error")
    {
        TransferError::connection(msg)
    } else {
        fallback(msg)
    }
}

fn transport_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() || err.is_connect() {
        TransferError::connection(format!("ClickHouse request failed: {}", err))
    } else {
        classify_error(&err.to_string(), TransferError::connection)
    }
}

async fn bounded<T, F>(timeout: Duration, operation: &str, future: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| TransferError::timeout(operation, timeout.as_secs()))?
}

// --- Value conversion ---

fn base_type(column_type: &str) -> &str {
    let mut current = column_type.trim();
    for wrapper in ["Nullable(", "LowCardinality("] {
        if let Some(inner) = current
            .strip_prefix(wrapper)
            .and_then(|rest| rest.strip_suffix(')'))
        {
            current = inner;
        }
    }
    // LowCardinality(Nullable(T))
    if let Some(inner) = current
        .strip_prefix("Nullable(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        current = inner;
    }
    current
}

/// ClickHouse's text form of DateTime / DateTime64, read as UTC.
pub(crate) fn parse_datetime(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Types one JSON cell using the column type from the response header.
pub(crate) fn convert_cell(cell: serde_json::Value, column_type: &str) -> Value {
    if cell.is_null() {
        return Value::Null;
    }

    let base = base_type(column_type);
    if base.starts_with("DateTime") {
        if let Some(text) = cell.as_str() {
            return parse_datetime(text)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::Text(text.to_string()));
        }
    } else if base == "Bool" {
        if let Some(flag) = cell.as_bool() {
            return Value::Bool(flag);
        }
    } else if base.starts_with("Int") || base.starts_with("UInt") {
        if let Some(text) = cell.as_str() {
            return text
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(text.to_string()));
        }
    } else if base.starts_with("Float") || base.starts_with("Decimal") {
        if let Some(number) = cell.as_f64() {
            return Value::Float(number);
        }
    }
    Value::from_json(cell)
}

fn row_from_cells(
    cells: Vec<serde_json::Value>,
    columns: &[String],
    types: &[String],
) -> Result<Row, TransferError> {
    if cells.len() != columns.len() {
        return Err(TransferError::connection_fatal(format!(
            "ClickHouse returned {} values for {} columns",
            cells.len(),
            columns.len()
        )));
    }
    Ok(columns
        .iter()
        .zip(types.iter())
        .zip(cells)
        .map(|((name, column_type), cell)| (name.clone(), convert_cell(cell, column_type)))
        .collect())
}

fn encode_json_rows(columns: &[String], rows: &[Row]) -> Result<Vec<u8>, TransferError> {
    let mut body = Vec::new();
    for row in rows {
        let object = columns
            .iter()
            .map(|column| {
                let value = row.get(column).map(Value::to_json).unwrap_or_default();
                (column.clone(), value)
            })
            .collect::<serde_json::Map<String, serde_json::Value>>();
        serde_json::to_writer(&mut body, &object)
            .map_err(|e| TransferError::write(0, format!("Failed to encode row: {}", e)))?;
        body.push(b'\n');
    }
    Ok(body)
}

// --- Row stream ---

type ChunkStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

/// Splits a streamed response body into lines as chunks arrive; never holds
/// more than one chunk plus one partial line.
pub struct ClickHouseRowStream {
    columns: Vec<String>,
    types: Vec<String>,
    body: ChunkStream,
    buffer: Vec<u8>,
    // start of the first unread line in `buffer`
    consumed: usize,
    // everything before this offset is known to hold no newline
    scanned: usize,
    body_done: bool,
    timeout: Duration,
}

impl ClickHouseRowStream {
    async fn open(response: reqwest::Response, timeout: Duration) -> Result<Self, TransferError> {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Self::from_chunks(body, timeout).await
    }

    pub(crate) async fn from_chunks(body: ChunkStream, timeout: Duration) -> Result<Self, TransferError> {
        let mut stream = ClickHouseRowStream {
            columns: Vec::new(),
            types: Vec::new(),
            body,
            buffer: Vec::new(),
            consumed: 0,
            scanned: 0,
            body_done: false,
            timeout,
        };

        stream.columns = stream.header_line("column names").await?;
        stream.types = stream.header_line("column types").await?;
        if stream.columns.len() != stream.types.len() {
            return Err(TransferError::connection_fatal(
                "ClickHouse returned mismatched name and type headers",
            ));
        }
        Ok(stream)
    }

    async fn header_line(&mut self, what: &str) -> Result<Vec<String>, TransferError> {
        let line = self.next_line().await?.ok_or_else(|| {
            TransferError::connection_fatal(format!("ClickHouse response ended before {}", what))
        })?;
        serde_json::from_slice::<Vec<String>>(&line).map_err(|_| server_error_line(&line))
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let line = self.buffer[self.consumed..end].to_vec();
                self.consumed = end + 1;
                self.scanned = self.consumed;
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }
            self.scanned = self.buffer.len();

            if self.body_done {
                let rest = self.buffer.split_off(self.consumed);
                self.buffer.clear();
                self.consumed = 0;
                self.scanned = 0;
                if rest.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Ok(Some(rest));
            }

            // one compaction per chunk; only the partial line is moved
            self.buffer.drain(..self.consumed);
            self.scanned -= self.consumed;
            self.consumed = 0;

            match tokio::time::timeout(self.timeout, self.body.next()).await {
                Err(_) => {
                    return Err(TransferError::timeout(
                        "Reading from ClickHouse",
                        self.timeout.as_secs(),
                    ))
                }
                Ok(None) => self.body_done = true,
                Ok(Some(Err(e))) => return Err(transport_error(e)),
                Ok(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
            }
        }
    }
}

// An exception raised after streaming began arrives as plain text in the body.
fn server_error_line(line: &[u8]) -> TransferError {
    let text = String::from_utf8_lossy(line);
    classify_error(&text, |msg| {
        TransferError::connection_fatal(format!("Unexpected ClickHouse response: {}", msg))
    })
}

#[async_trait]
impl RowStream for ClickHouseRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, TransferError> {
        let mut rows = Vec::new();
        while rows.len() < max_rows.max(1) {
            let Some(line) = self.next_line().await? else {
                break;
            };
            let cells = serde_json::from_slice::<Vec<serde_json::Value>>(&line)
                .map_err(|_| server_error_line(&line))?;
            rows.push(row_from_cells(cells, &self.columns, &self.types)?);
        }

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

// --- Warehouse ---

#[derive(Debug, clickhouse::Row, Deserialize)]
struct TableNameRow {
    name: String,
}

#[derive(Debug, clickhouse::Row, Deserialize)]
struct ColumnRow {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    default_kind: String,
    default_expression: String,
}

pub(crate) fn create_client(descriptor: &ConnectionDescriptor) -> Client {
    let mut client = Client::default()
        .with_url(descriptor.base_url())
        .with_user(&descriptor.username);

    if !descriptor.credential.is_empty() {
        client = client.with_password(&descriptor.credential);
    }
    if !descriptor.database.trim().is_empty() {
        client = client.with_database(&descriptor.database);
    }
    client
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub struct ClickHouseWarehouse {
    descriptor: ConnectionDescriptor,
    client: Client,
    http: reqwest::Client,
    timeout: Duration,
}

impl ClickHouseWarehouse {
    pub fn new(descriptor: ConnectionDescriptor, timeout: Duration) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransferError::connection_fatal(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client: create_client(&descriptor),
            descriptor,
            http,
            timeout,
        })
    }

    // Credentials travel in headers so they never show up in URLs or logs.
    fn request(&self) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(self.descriptor.base_url())
            .header("X-ClickHouse-User", &self.descriptor.username)
            .header("X-ClickHouse-Key", &self.descriptor.credential);
        if !self.descriptor.database.trim().is_empty() {
            request = request.query(&[("database", self.descriptor.database.as_str())]);
        }
        request
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
        fallback: fn(String) -> TransferError,
    ) -> Result<reqwest::Response, TransferError> {
        bounded(self.timeout, operation, async {
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            Err(classify_error(
                &format!("ClickHouse error ({}): {}", status, body.trim()),
                fallback,
            ))
        })
        .await
    }

    fn metadata_error(err: clickhouse::error::Error) -> TransferError {
        classify_error(&err.to_string(), TransferError::connection)
    }
}

fn insert_failure(message: String) -> TransferError {
    TransferError::write(0, message)
}

#[async_trait]
impl Warehouse for ClickHouseWarehouse {
    async fn ping(&self) -> Result<(), TransferError> {
        let result = bounded(self.timeout, "Ping", async {
            self.client
                .query("SELECT 1")
                .fetch_one::<u8>()
                .await
                .map_err(Self::metadata_error)
        })
        .await?;

        if result == 1 {
            Ok(())
        } else {
            Err(TransferError::connection_fatal(
                "ClickHouse returned unexpected result during connection test",
            ))
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>, TransferError> {
        let rows = bounded(self.timeout, "Listing tables", async {
            self.client
                .query("SELECT name FROM system.tables WHERE database = ? AND NOT is_temporary ORDER BY name")
                .bind(self.descriptor.database.as_str())
                .fetch_all::<TableNameRow>()
                .await
                .map_err(Self::metadata_error)
        })
        .await?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>, TransferError> {
        let rows = bounded(self.timeout, "Describing table", async {
            self.client
                .query(
                    "SELECT name, type, default_kind, default_expression FROM system.columns \
                     WHERE database = ? AND table = ? ORDER BY position",
                )
                .bind(self.descriptor.database.as_str())
                .bind(table)
                .fetch_all::<ColumnRow>()
                .await
                .map_err(Self::metadata_error)
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.name,
                column_type: row.column_type,
                default_kind: non_empty(row.default_kind),
                default_expression: non_empty(row.default_expression),
            })
            .collect())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, TransferError> {
        let query = format!(
            "SELECT count() FROM {}",
            sql_utils::qualified_table_name(&self.descriptor.database, table)
        );
        bounded(self.timeout, "Counting rows", async {
            self.client
                .query(&query)
                .fetch_one::<u64>()
                .await
                .map_err(Self::metadata_error)
        })
        .await
    }

    async fn open_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<usize>,
    ) -> Result<Box<dyn RowStream>, TransferError> {
        let query = format!(
            "{} FORMAT {}",
            sql_utils::build_projection_query(&self.descriptor.database, table, columns, limit),
            READ_FORMAT
        );
        debug!("Streaming: {}", query);

        let request = self
            .request()
            .query(&[("output_format_json_quote_64bit_integers", "0")])
            .body(query);
        let response = self
            .send(request, "Opening row stream", TransferError::connection_fatal)
            .await?;
        let stream = bounded(
            self.timeout,
            "Reading row stream header",
            ClickHouseRowStream::open(response, self.timeout),
        )
        .await?;
        Ok(Box::new(stream))
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<(), TransferError> {
        if rows.is_empty() {
            return Ok(());
        }

        let query = sql_utils::build_insert_query(&self.descriptor.database, table, columns);
        let body = encode_json_rows(columns, rows)?;
        debug!("Inserting {} rows: {}", rows.len(), query);

        let request = self
            .request()
            .query(&[
                ("query", query.as_str()),
                ("date_time_input_format", "best_effort"),
            ])
            .body(body);
        self.send(request, "Insert", insert_failure).await?;
        Ok(())
    }
}

// A failed handshake is a connection failure whatever the server reported,
// e.g. UNKNOWN_DATABASE during the ping.
fn handshake_error(err: TransferError) -> TransferError {
    match err {
        TransferError::Connection { .. } => err,
        TransferError::Schema(message) | TransferError::Validation(message) => {
            TransferError::connection_fatal(message)
        }
        other => TransferError::connection_fatal(other.to_string()),
    }
}

/// Builds ClickHouse handles for the registry; each one is pinged first.
pub struct ClickHouseConnector {
    timeout: Duration,
}

impl ClickHouseConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl WarehouseConnector for ClickHouseConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Warehouse>, TransferError> {
        let warehouse = ClickHouseWarehouse::new(descriptor.clone(), self.timeout)?;
        warehouse.ping().await.map_err(handshake_error)?;
        Ok(Arc::new(warehouse))
    }
}
