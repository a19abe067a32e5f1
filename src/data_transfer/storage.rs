use crate::data_transfer::models::{TransferDirection, TransferState, TransferStatus};
use crate::error::TransferError;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

struct TransferEntry {
    status: TransferStatus,
    cancel: CancellationToken,
    // creation order; breaks started_at ties
    seq: u64,
}

/// Status of every transfer started by this process. In memory only: a
/// restart forgets all of them.
#[derive(Default)]
pub struct TransferStore {
    entries: Mutex<HashMap<String, TransferEntry>>,
    next_seq: Mutex<u64>,
}

fn not_found(id: &str) -> TransferError {
    TransferError::validation(format!("Transfer '{}' not found", id))
}

fn require_id(id: &str) -> Result<&str, TransferError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(TransferError::validation("transferId is required"));
    }
    Ok(id)
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints an id and records the transfer as `pending`.
    pub async fn create(
        &self,
        direction: Option<TransferDirection>,
    ) -> (TransferStatus, CancellationToken) {
        let seq = {
            let mut next = self.next_seq.lock().await;
            *next += 1;
            *next
        };
        let mut status = TransferStatus::pending(Uuid::new_v4().to_string());
        status.direction = direction;
        let cancel = CancellationToken::new();

        let mut entries = self.entries.lock().await;
        entries.insert(
            status.id.clone(),
            TransferEntry {
                status: status.clone(),
                cancel: cancel.clone(),
                seq,
            },
        );
        (status, cancel)
    }

    pub async fn get(&self, id: &str) -> Result<TransferStatus, TransferError> {
        let id = require_id(id)?;
        let entries = self.entries.lock().await;
        entries
            .get(id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Newest first.
    pub async fn list(&self, limit: Option<usize>) -> Vec<TransferStatus> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let entries = self.entries.lock().await;
        let mut ordered = entries.values().collect::<Vec<_>>();
        ordered.sort_by(|a, b| {
            b.status
                .started_at
                .cmp(&a.status.started_at)
                .then(b.seq.cmp(&a.seq))
        });
        ordered
            .into_iter()
            .take(limit)
            .map(|entry| entry.status.clone())
            .collect()
    }

    /// pending -> running. `None` when the transfer is not pending.
    pub async fn mark_running(&self, id: &str) -> Option<TransferStatus> {
        let mut entries = self.entries.lock().await;
        let status = &mut entries.get_mut(id)?.status;
        if status.state != TransferState::Pending {
            return None;
        }
        status.state = TransferState::Running;
        status.updated_at = Utc::now();
        Some(status.clone())
    }

    /// Only applies while running; neither field ever goes backwards.
    pub async fn record_progress(&self, id: &str, records_processed: u64, progress: u8) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        let status = &mut entry.status;
        if status.state != TransferState::Running {
            return false;
        }
        status.records_processed = status.records_processed.max(records_processed);
        status.progress = status.progress.max(progress.min(99));
        status.updated_at = Utc::now();
        true
    }

    pub async fn set_output_path(&self, id: &str, path: String) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.status.output_path = Some(path);
        }
    }

    pub async fn complete(&self, id: &str, records_processed: u64) -> Option<TransferStatus> {
        self.finish(id, records_processed, None).await
    }

    pub async fn fail(
        &self,
        id: &str,
        error: &TransferError,
        records_processed: u64,
    ) -> Option<TransferStatus> {
        self.finish(id, records_processed, Some(error)).await
    }

    async fn finish(
        &self,
        id: &str,
        records_processed: u64,
        error: Option<&TransferError>,
    ) -> Option<TransferStatus> {
        let mut entries = self.entries.lock().await;
        let status = &mut entries.get_mut(id)?.status;
        if status.state.is_terminal() {
            return None;
        }

        let now = Utc::now();
        match error {
            None => {
                status.state = TransferState::Completed;
                status.progress = 100;
            }
            Some(error) => {
                status.state = TransferState::Failed;
                status.error = Some(error.to_string());
                status.error_kind = Some(error.kind().to_string());
            }
        }
        status.records_processed = records_processed;
        status.updated_at = now;
        status.finished_at = Some(now);
        Some(status.clone())
    }

    /// Requests a stop between batches. A terminal transfer is returned
    /// unchanged.
    pub async fn cancel(&self, id: &str) -> Result<TransferStatus, TransferError> {
        let id = require_id(id)?;
        let entries = self.entries.lock().await;
        let entry = entries.get(id).ok_or_else(|| not_found(id))?;
        if !entry.status.state.is_terminal() {
            entry.cancel.cancel();
        }
        Ok(entry.status.clone())
    }
}
