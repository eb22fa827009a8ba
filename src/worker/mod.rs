//! Event-triggered background worker: wakes on demand, sweeps every raw
//! record in Processing status, and decodes each one independently.

pub mod trigger;

pub use trigger::ProcessingTrigger;

use crate::decode;
use crate::ledger::{IngestionLedger, RawRecord, RecordStatus};
use crate::store::ResultStore;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct IngestionWorker {
    ledger: Arc<IngestionLedger>,
    store: Arc<ResultStore>,
    trigger: Arc<ProcessingTrigger>,
    error_backoff: Duration,
    passes: AtomicU64,
}

impl IngestionWorker {
    pub fn new(
        ledger: Arc<IngestionLedger>,
        store: Arc<ResultStore>,
        trigger: Arc<ProcessingTrigger>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            trigger,
            error_backoff,
            passes: AtomicU64::new(0),
        }
    }

    /// Request an immediate batch pass (delegates to the trigger).
    pub fn notify(&self) {
        self.trigger.notify();
    }

    /// Number of batch passes executed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Worker loop: wait for a wake or cancellation, run one batch pass,
    /// repeat. An error escaping the batch itself (not an individual record)
    /// is logged and followed by a cool-down so a persistent fault cannot
    /// spin the loop hot.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Ingestion worker started");
        loop {
            if !self.trigger.wait(&cancel).await {
                break;
            }
            if let Err(e) = self.process_batch().await {
                log::error!(
                    "Batch pass failed: {} (cooling down {:?})",
                    e,
                    self.error_backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.error_backoff) => {}
                }
            }
        }
        log::info!("Ingestion worker stopped");
    }

    /// One full sweep over all records currently in Processing status.
    ///
    /// Records are decoded concurrently and independently; the pass returns
    /// once every record has been attempted. Returns the number attempted.
    pub async fn process_batch(&self) -> crate::error::Result<usize> {
        self.passes.fetch_add(1, Ordering::Relaxed);

        let records = self.ledger.list(Some(RecordStatus::Processing)).await?;
        if records.is_empty() {
            log::debug!("Batch pass: nothing to process");
            return Ok(0);
        }

        let count = records.len();
        log::info!("Batch pass: processing {} record(s)", count);
        join_all(records.into_iter().map(|r| self.process_record(r))).await;
        Ok(count)
    }

    /// Decode one record and replace its stored result. Infallible by
    /// construction: every failure mode is absorbed here so one bad record
    /// never affects the rest of the batch.
    async fn process_record(&self, record: RawRecord) {
        let email = match decode::decode(&record.original_content) {
            Ok(email) => email,
            Err(e) => {
                log::warn!("Decode failed for record {}: {}", record.id, e);
                // Any prior successful decode stays visible and unchanged
                if let Err(e) = self.ledger.update_status(&record.id, RecordStatus::Failed).await {
                    log::error!("Failed to mark record {} failed: {}", record.id, e);
                }
                return;
            }
        };

        if let Err(e) = self.store.replace_for_record(&record.id, email).await {
            // Record stays Processing, so the next trigger retries it
            log::error!(
                "Failed to persist decoded result for record {}: {}",
                record.id,
                e
            );
            return;
        }

        match self
            .ledger
            .update_status(&record.id, RecordStatus::Completed)
            .await
        {
            Ok(true) => log::debug!("Record {} completed", record.id),
            Ok(false) => log::warn!("Record {} vanished before status update", record.id),
            // At-least-once: the replace committed, the stale Processing
            // status gets the record picked up again on the next pass
            Err(e) => log::error!(
                "Status update failed for record {} after replace: {}",
                record.id,
                e
            ),
        }
    }
}

/// Handle to a spawned worker loop.
pub struct WorkerHandle {
    worker: Arc<IngestionWorker>,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn notify(&self) {
        self.worker.notify();
    }

    /// Request cancellation and wait for the loop to exit. Safe to call
    /// after the loop has already exited.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            log::error!("Worker task did not exit cleanly: {}", e);
        }
    }
}

/// Spawn the worker loop on the runtime and return a stop/notify handle.
pub fn spawn(worker: Arc<IngestionWorker>) -> WorkerHandle {
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_worker = worker.clone();
    let join = tokio::spawn(async move { run_worker.run(run_cancel).await });
    WorkerHandle {
        worker,
        cancel,
        join,
    }
}
