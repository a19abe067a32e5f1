// =====================================================
// CONNECTION REGISTRY
// Pooled warehouse handles keyed by connection identity
// =====================================================

use crate::db::traits::{Warehouse, WarehouseConnector};
use crate::db_types::ConnectionDescriptor;
use crate::error::TransferError;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

type HandleCell = Arc<OnceCell<Arc<dyn Warehouse>>>;

/// Owned by the process root and injected wherever handles are needed.
pub struct ConnectionRegistry {
    connector: Arc<dyn WarehouseConnector>,
    handles: Mutex<HashMap<ConnectionDescriptor, HandleCell>>,
    acquire_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn WarehouseConnector>, acquire_timeout: Duration) -> Self {
        Self {
            connector,
            handles: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// Returns the pooled handle for `descriptor`, creating it on first use.
    /// Concurrent callers for the same identity wait on a single creation.
    pub async fn acquire(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Warehouse>, TransferError> {
        self.checkout(descriptor).await.map(|(handle, _)| handle)
    }

    /// Like `acquire`, also reporting whether this call created the handle.
    /// A freshly created handle has just passed the connector's ping.
    pub async fn checkout(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(Arc<dyn Warehouse>, bool), TransferError> {
        let cell = {
            let mut handles = self.handles.lock().await;
            handles
                .entry(descriptor.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let created = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                info!("Creating connection for {}", descriptor.display_label());
                created.store(true, Ordering::SeqCst);
                match tokio::time::timeout(self.acquire_timeout, self.connector.connect(descriptor))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransferError::timeout(
                        &format!("Connecting to {}", descriptor.display_label()),
                        self.acquire_timeout.as_secs(),
                    )),
                }
            })
            .await;

        let handle = match result {
            Ok(handle) => Arc::clone(handle),
            Err(err) => {
                self.evict_uninitialized(descriptor, &cell).await;
                return Err(err);
            }
        };

        // released while being created: nobody owns this handle any more
        if !self.is_current(descriptor, &cell).await {
            if created.load(Ordering::SeqCst) {
                handle.close().await;
            }
            return Err(TransferError::connection(format!(
                "Connection for {} was released while it was being created",
                descriptor.display_label()
            )));
        }
        Ok((handle, created.load(Ordering::SeqCst)))
    }

    async fn is_current(&self, descriptor: &ConnectionDescriptor, cell: &HandleCell) -> bool {
        let handles = self.handles.lock().await;
        handles
            .get(descriptor)
            .map(|current| Arc::ptr_eq(current, cell))
            .unwrap_or(false)
    }

    // A failed creation must not leave a cached entry behind.
    async fn evict_uninitialized(&self, descriptor: &ConnectionDescriptor, cell: &HandleCell) {
        let mut handles = self.handles.lock().await;
        let stale = handles
            .get(descriptor)
            .map(|current| Arc::ptr_eq(current, cell) && !current.initialized())
            .unwrap_or(false);
        if stale {
            handles.remove(descriptor);
        }
    }

    /// Closes and evicts one handle. No-op when nothing is cached.
    pub async fn release(&self, descriptor: &ConnectionDescriptor) {
        let cell = {
            let mut handles = self.handles.lock().await;
            handles.remove(descriptor)
        };

        if let Some(handle) = cell.and_then(|cell| cell.get().cloned()) {
            info!("Releasing connection for {}", descriptor.display_label());
            handle.close().await;
        }
    }

    pub async fn release_all(&self) {
        let drained = {
            let mut handles = self.handles.lock().await;
            handles.drain().collect::<Vec<_>>()
        };

        for (descriptor, cell) in drained {
            match cell.get() {
                Some(handle) => handle.close().await,
                None => warn!(
                    "Dropping connection for {} while it was still being created",
                    descriptor.display_label()
                ),
            }
        }
        info!("Connection registry cleared");
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests;
