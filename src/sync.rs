//! Keeps the search index in step with the record store.
//!
//! Every store write appends an entry to `index_outbox` inside the same
//! transaction. A single background worker applies those entries to the
//! index in commit order and removes each one only after the index accepted
//! it, so changes to one image are never reordered and a crash between apply
//! and ack just replays an idempotent operation. Index failures are retried
//! with backoff; they never reach the client whose write already committed.

use crate::config::SyncConfig;
use crate::error::AppError;
use crate::images::ImageCapture;
use crate::search::Searcher;
use crate::store::{IndexOp, OutboxEntry, RecordStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const SETTLE_POLL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct SyncStats {
    applied: AtomicU64,
    retries: AtomicU64,
    stalls: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: u64,
    pub applied: u64,
    pub retries: u64,
    pub stalls: u64,
    pub last_error: Option<String>,
    pub oldest_pending_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: u64,
    pub missing: u64,
    pub stale: u64,
    pub orphaned: u64,
    pub repaired: u64,
    /// Ids left uncompared in a dry run because changes for them are queued.
    pub pending: u64,
}

impl ReconcileReport {
    pub fn drift(&self) -> u64 {
        self.missing + self.stale + self.orphaned
    }
}

pub struct SyncBridge {
    store: RecordStore,
    searcher: Arc<dyn Searcher>,
    config: SyncConfig,
    wake: Notify,
    // held while applying outbox entries or reconciling
    apply_lock: AsyncMutex<()>,
    stats: SyncStats,
}

impl SyncBridge {
    pub fn new(store: RecordStore, searcher: Arc<dyn Searcher>, config: SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            searcher,
            config,
            wake: Notify::new(),
            apply_lock: AsyncMutex::new(()),
            stats: SyncStats::default(),
        })
    }

    // The outbox entry written with the row carries the snapshot; these
    // only wake the worker.
    pub fn on_create(&self, id: i64) {
        log::debug!("Image {} created, scheduling index upsert", id);
        self.wake.notify_one();
    }

    pub fn on_update(&self, id: i64) {
        log::debug!("Image {} updated, scheduling index upsert", id);
        self.wake.notify_one();
    }

    pub fn on_delete(&self, id: i64) {
        log::debug!("Image {} deleted, scheduling index removal", id);
        self.wake.notify_one();
    }

    /// Starts the background worker. It drains on every wake-up and at
    /// least once per poll interval, which also picks up entries left over
    /// from a previous run.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move { bridge.run().await })
    }

    async fn run(&self) {
        log::info!(
            "Index sync worker started (max {} attempts, poll every {:?})",
            self.config.max_attempts,
            self.config.poll_interval()
        );
        self.prepare_index().await;
        loop {
            match self.drain().await {
                Ok(0) => {}
                Ok(applied) => log::debug!("Applied {} outbox entries to the index", applied),
                Err(e) => {
                    self.stats.stalls.fetch_add(1, Ordering::Relaxed);
                    log::error!("Index sync stalled: {}", e);
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Retries `ensure_index_exists` with capped backoff until it succeeds.
    /// Writes keep committing and queueing meanwhile.
    pub async fn prepare_index(&self) {
        let mut delay = self.config.initial_backoff();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let reason = match self.searcher.ensure_index_exists().await {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("Search index ready after {} attempts", attempt);
                    }
                    return;
                }
                Err(e) => e.to_string(),
            };
            log::warn!(
                "Search index not ready (attempt {}), retrying in {:?}: {}",
                attempt,
                delay,
                reason
            );
            self.set_last_error(reason);
            sleep(delay).await;
            delay = (delay * 2).min(self.config.max_backoff());
        }
    }

    fn set_last_error(&self, reason: String) {
        if let Ok(mut last_error) = self.stats.last_error.lock() {
            *last_error = Some(reason);
        }
    }

    /// Applies pending outbox entries in commit order until the outbox is
    /// empty. Stops at the first entry that exhausts its retries, leaving it
    /// and everything behind it queued.
    pub async fn drain(&self) -> Result<usize, AppError> {
        let _guard = self.apply_lock.lock().await;
        self.drain_locked().await
    }

    async fn drain_locked(&self) -> Result<usize, AppError> {
        let mut applied = 0;
        loop {
            let batch = self.store.pending_ops(self.config.batch_size.max(1)).await?;
            if batch.is_empty() {
                return Ok(applied);
            }
            for entry in batch {
                self.apply_with_retry(&entry).await?;
                self.store.ack(entry.seq).await?;
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                applied += 1;
            }
        }
    }

    async fn apply_with_retry(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.initial_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let reason = match self.apply(entry).await {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("Outbox entry {} applied after {} attempts", entry.seq, attempt);
                    }
                    return Ok(());
                }
                Err(e) => e.to_string(),
            };

            self.store.record_failure(entry.seq, reason.clone()).await?;
            self.set_last_error(reason.clone());

            if attempt >= max_attempts {
                let err = AppError::IndexPropagation {
                    seq: entry.seq,
                    attempts: entry.attempts + attempt,
                    reason,
                };
                log::error!("{}", err);
                return Err(err);
            }

            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Index update for image {} failed (attempt {}/{}), retrying in {:?}: {}",
                entry.image_id,
                attempt,
                max_attempts,
                delay,
                reason
            );
            sleep(delay).await;
            delay = (delay * 2).min(self.config.max_backoff());
        }
    }

    async fn apply(&self, entry: &OutboxEntry) -> Result<(), AppError> {
        match &entry.op {
            IndexOp::Upsert(image) => self.searcher.upsert_image(image).await,
            IndexOp::Delete => self.searcher.delete_image(entry.image_id).await,
        }
    }

    /// Waits until the outbox is empty. Returns `false` if `timeout` passed
    /// first.
    pub async fn await_settled(&self, timeout: Duration) -> Result<bool, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.store.pending_count().await? == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.wake.notify_one();
            sleep(SETTLE_POLL).await;
        }
    }

    pub async fn status(&self) -> Result<SyncStatus, AppError> {
        let last_error = self
            .stats
            .last_error
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or_default();
        Ok(SyncStatus {
            pending: self.store.pending_count().await?,
            applied: self.stats.applied.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            stalls: self.stats.stalls.load(Ordering::Relaxed),
            last_error,
            oldest_pending_ms: self.store.oldest_pending_age_ms().await?,
        })
    }

    /// Compares every record with its index document. Missing and stale
    /// documents are re-upserted and orphans deleted when `repair` is set;
    /// otherwise the drift is only reported and the index is left untouched.
    /// A repair applies pending outbox entries first; a dry run skips the ids
    /// they name instead, so queued changes are never counted as drift.
    pub async fn reconcile(&self, repair: bool) -> Result<ReconcileReport, AppError> {
        let _guard = self.apply_lock.lock().await;
        let queued: HashSet<i64> = if repair {
            self.drain_locked().await?;
            HashSet::new()
        } else {
            self.store.pending_image_ids().await?
        };

        let records = self.store.find_all().await?;
        let mut indexed: HashMap<i64, ImageCapture> = self
            .searcher
            .all_images()
            .await?
            .into_iter()
            .map(|image| (image.id, image))
            .collect();

        let mut report = ReconcileReport::default();
        for record in records {
            if queued.contains(&record.id) {
                indexed.remove(&record.id);
                report.pending += 1;
                continue;
            }
            report.checked += 1;
            let needs_upsert = match indexed.remove(&record.id) {
                None => {
                    report.missing += 1;
                    true
                }
                Some(document) if document != record => {
                    report.stale += 1;
                    true
                }
                Some(_) => false,
            };
            if needs_upsert && repair {
                self.searcher.upsert_image(&record).await?;
                report.repaired += 1;
            }
        }

        let mut orphans: Vec<i64> = indexed.into_keys().collect();
        orphans.sort_unstable();
        for id in orphans {
            if queued.contains(&id) {
                report.pending += 1;
                continue;
            }
            report.orphaned += 1;
            if repair {
                self.searcher.delete_image(id).await?;
                report.repaired += 1;
            }
        }

        if report.drift() > 0 {
            log::warn!("Reconcile found drift: {:?} (repair: {})", report, repair);
        } else {
            log::info!("Reconcile checked {} images, no drift", report.checked);
        }
        Ok(report)
    }
}
