// In-memory stand-ins for ClickHouse used across the unit tests.

use crate::data_transfer::reader::{RecordsRowStream, RowStream};
use crate::db::traits::{Warehouse, WarehouseConnector};
use crate::db_types::{ColumnDescriptor, ConnectionDescriptor, Row, Value};
use crate::error::TransferError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub(crate) fn descriptor(host: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        host: host.to_string(),
        port: 8123,
        database: "default".to_string(),
        username: "default".to_string(),
        credential: "secret".to_string(),
    }
}

pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub(crate) fn user_rows(count: usize) -> Vec<Row> {
    (1..=count)
        .map(|i| {
            row(&[
                ("id", Value::Int(i as i64)),
                ("name", Value::Text(format!("user{}", i))),
                ("email", Value::Text(format!("user{}@example.com", i))),
            ])
        })
        .collect()
}

#[derive(Default)]
struct MemoryTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
}

/// Holds a table insert until the test releases it.
#[derive(Clone)]
pub(crate) struct InsertPause {
    pub after_call: usize,
    pub reached: Arc<Notify>,
    pub resume: Arc<Notify>,
}

#[derive(Default)]
pub(crate) struct MemoryWarehouse {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    insert_calls: AtomicUsize,
    pings: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    fail_insert_on_call: Option<usize>,
    ping_error: Option<TransferError>,
    pause: Option<InsertPause>,
    closed: AtomicBool,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, columns: &[(&str, &str)], rows: Vec<Row>) -> Self {
        let columns = columns
            .iter()
            .map(|(name, column_type)| ColumnDescriptor {
                name: name.to_string(),
                column_type: column_type.to_string(),
                default_kind: None,
                default_expression: None,
            })
            .collect();
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(name.to_string(), MemoryTable { columns, rows });
        }
        self
    }

    /// The n-th insert call (1-based) fails without touching the table.
    pub fn failing_insert_on(mut self, call: usize) -> Self {
        self.fail_insert_on_call = Some(call);
        self
    }

    pub fn failing_ping(mut self, error: TransferError) -> Self {
        self.ping_error = Some(error);
        self
    }

    pub fn pausing_after_insert(mut self, pause: InsertPause) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn missing(table: &str) -> TransferError {
        TransferError::schema(format!("Table default.{} doesn't exist", table))
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ping(&self) -> Result<(), TransferError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match &self.ping_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>, TransferError> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>, TransferError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, TransferError> {
        let tables = self.tables.lock().unwrap();
        let table_data = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(table_data.rows.len() as u64)
    }

    async fn open_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<usize>,
    ) -> Result<Box<dyn RowStream>, TransferError> {
        let tables = self.tables.lock().unwrap();
        let table_data = tables.get(table).ok_or_else(|| Self::missing(table))?;
        let rows = table_data
            .rows
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|source| {
                columns
                    .iter()
                    .map(|c| (c.clone(), source.get(c).cloned().unwrap_or(Value::Null)))
                    .collect::<Row>()
            })
            .collect();
        Ok(Box::new(RecordsRowStream::new(columns.to_vec(), rows)))
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<(), TransferError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert_on_call == Some(call) {
            return Err(TransferError::write(0, "simulated insert failure"));
        }

        {
            let mut tables = self.tables.lock().unwrap();
            let table_data = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
            for source in rows {
                let projected = columns
                    .iter()
                    .map(|c| (c.clone(), source.get(c).cloned().unwrap_or(Value::Null)))
                    .collect::<Row>();
                table_data.rows.push(projected);
            }
            self.batch_sizes.lock().unwrap().push(rows.len());
        }

        if let Some(pause) = &self.pause {
            if pause.after_call == call {
                pause.reached.notify_one();
                pause.resume.notified().await;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared warehouse, counting connects.
pub(crate) struct CountingConnector {
    warehouse: Arc<MemoryWarehouse>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl CountingConnector {
    pub fn new(warehouse: Arc<MemoryWarehouse>) -> Self {
        Self {
            warehouse,
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `count` connects are refused.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseConnector for CountingConnector {
    async fn connect(
        &self,
        _descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Warehouse>, TransferError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransferError::connection("Connection refused (simulated)"));
        }

        self.warehouse.ping().await?;
        Ok(self.warehouse.clone() as Arc<dyn Warehouse>)
    }
}
