//! Staging area layered on the TTL store: `transaction:<hash>` entries hold
//! unevaluated payloads, `processed_tx:<hash>` markers record evaluation.
//!
//! Hashes staged by subscribers are also pushed onto a bounded pending queue
//! so the detection drain never walks the whole keyspace. When the queue is
//! full the hash is only kept in the store and the next drain pass performs a
//! recovery sweep over the staged prefix. The sweep only re-queues entries the
//! caller can evaluate, and a sweep cut short by a full queue resumes at the
//! key where it stopped.

use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use fraud_watch_domain::{
    model::StagedTransaction,
    services::cache::{CacheError, CacheResult, TtlStore},
};
use metrics::gauge;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const STAGED_PREFIX: &str = "transaction:";
pub const PROCESSED_PREFIX: &str = "processed_tx:";

const PROCESSED_VALUE: &[u8] = b"processed";

pub fn staged_key(hash: &str) -> String {
    format!("{STAGED_PREFIX}{hash}")
}

pub fn processed_key(hash: &str) -> String {
    format!("{PROCESSED_PREFIX}{hash}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Staged,
    AlreadyStaged,
    AlreadyProcessed,
}

/// Hashes taken off the pending queue together with the payloads that were
/// still staged and unprocessed.
#[derive(Debug, Default)]
pub struct StagedBatch {
    pub popped: usize,
    pub transactions: Vec<StagedTransaction>,
}

/// FIFO of hashes awaiting evaluation; a hash is queued at most once.
#[derive(Debug, Default)]
struct PendingQueue {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl PendingQueue {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn pop(&mut self) -> Option<String> {
        let hash = self.order.pop_front()?;
        self.members.remove(&hash);
        Some(hash)
    }
}

/// Whether an enqueue attempt left the hash in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    Added,
    AlreadyQueued,
    Full,
}

pub struct StagingArea<C> {
    store: C,
    retention: Duration,
    capacity: usize,
    pending: Mutex<PendingQueue>,
    overflowed: AtomicBool,
    /// Staged key the next recovery sweep starts at.
    sweep_resume: Mutex<Option<String>>,
}

impl<C> StagingArea<C>
where
    C: TtlStore,
{
    pub fn new(store: C, retention: Duration, capacity: usize) -> Self {
        Self {
            store,
            retention,
            capacity: capacity.max(1),
            pending: Mutex::new(PendingQueue::default()),
            overflowed: AtomicBool::new(false),
            sweep_resume: Mutex::new(None),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Stages a transaction unless it was already evaluated or is already
    /// staged. The staging write is a single set-if-absent.
    pub async fn stage(&self, tx: &StagedTransaction) -> CacheResult<StageOutcome> {
        if self.store.exists(&processed_key(&tx.hash)).await? {
            return Ok(StageOutcome::AlreadyProcessed);
        }

        let payload = serde_json::to_vec(tx).map_err(|err| CacheError::Malformed {
            key: staged_key(&tx.hash),
            reason: err.to_string(),
        })?;
        let created = self
            .store
            .set_if_absent(&staged_key(&tx.hash), payload, self.retention)
            .await?;
        if !created {
            return Ok(StageOutcome::AlreadyStaged);
        }

        self.enqueue(tx.hash.clone()).await;
        Ok(StageOutcome::Staged)
    }

    /// Sets the processed marker. Only the first caller for a hash gets
    /// `true`; everyone else must treat the transaction as handled.
    pub async fn claim(&self, hash: &str) -> CacheResult<bool> {
        self.store
            .set_if_absent(
                &processed_key(hash),
                PROCESSED_VALUE.to_vec(),
                self.retention,
            )
            .await
    }

    pub async fn is_processed(&self, hash: &str) -> CacheResult<bool> {
        self.store.exists(&processed_key(hash)).await
    }

    /// Puts a hash back so a later drain pass retries it.
    pub async fn requeue(&self, hash: String) {
        self.enqueue(hash).await;
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Refills the pending queue from the store after an overflow. Only
    /// unprocessed entries whose account satisfies `watched` are queued;
    /// entries nobody can evaluate stay in the store until they expire.
    /// Returns the number of hashes recovered.
    pub async fn recover_overflow<P>(&self, watched: P) -> CacheResult<usize>
    where
        P: Fn(&str) -> bool + Send + Sync,
    {
        if !self.overflowed.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }

        let result = self.sweep(&watched).await;
        if result.is_err() {
            self.overflowed.store(true, Ordering::Release);
        }
        result
    }

    async fn sweep<P>(&self, watched: &P) -> CacheResult<usize>
    where
        P: Fn(&str) -> bool + Send + Sync,
    {
        let mut keys = self.store.scan_keys(STAGED_PREFIX).await?;
        keys.sort_unstable();
        let resume = self.sweep_resume.lock().await.take();
        if let Some(resume) = resume {
            let start = keys.partition_point(|key| *key < resume);
            keys.rotate_left(start);
        }

        let mut recovered = 0;
        for key in &keys {
            let Some(hash) = key.strip_prefix(STAGED_PREFIX) else {
                continue;
            };
            let tx = match self.load_unprocessed(hash).await {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(err @ CacheError::Malformed { .. }) => {
                    warn!(%err, hash, "skipping unreadable staged transaction");
                    continue;
                }
                Err(err) => {
                    *self.sweep_resume.lock().await = Some(key.clone());
                    return Err(err);
                }
            };
            if !watched(&tx.account) {
                continue;
            }
            match self.enqueue(tx.hash).await {
                Enqueued::Added => recovered += 1,
                Enqueued::AlreadyQueued => {}
                Enqueued::Full => {
                    *self.sweep_resume.lock().await = Some(key.clone());
                    break;
                }
            }
        }
        debug!(recovered, scanned = keys.len(), "staging overflow recovery sweep finished");
        Ok(recovered)
    }

    /// Pops up to `max` hashes and loads the ones that are still staged and
    /// not yet processed. Expired or already-processed hashes are dropped.
    pub async fn next_batch(&self, max: usize) -> CacheResult<StagedBatch> {
        let hashes: Vec<String> = {
            let mut pending = self.pending.lock().await;
            let hashes: Vec<String> = std::iter::from_fn(|| pending.pop()).take(max).collect();
            gauge!("monitor_staging_pending").set(pending.len() as f64);
            hashes
        };

        let mut batch = StagedBatch {
            popped: hashes.len(),
            transactions: Vec::with_capacity(hashes.len()),
        };
        for (index, hash) in hashes.iter().enumerate() {
            match self.load_unprocessed(hash).await {
                Ok(Some(tx)) => batch.transactions.push(tx),
                Ok(None) => {}
                Err(err @ CacheError::Malformed { .. }) => {
                    warn!(%err, hash, "dropping unreadable staged transaction");
                }
                Err(err) => {
                    for remaining in &hashes[index..] {
                        self.enqueue(remaining.clone()).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(batch)
    }

    async fn load_unprocessed(&self, hash: &str) -> CacheResult<Option<StagedTransaction>> {
        if self.is_processed(hash).await? {
            return Ok(None);
        }
        let key = staged_key(hash);
        let Some(raw) = self.store.get(&key).await? else {
            debug!(hash, "staged transaction expired before evaluation");
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| CacheError::Malformed {
                key,
                reason: err.to_string(),
            })
    }

    async fn enqueue(&self, hash: String) -> Enqueued {
        let mut pending = self.pending.lock().await;
        if pending.members.contains(&hash) {
            return Enqueued::AlreadyQueued;
        }
        if pending.len() >= self.capacity {
            self.overflowed.store(true, Ordering::Release);
            warn!(hash, "staging queue full; hash left for recovery sweep");
            return Enqueued::Full;
        }
        pending.members.insert(hash.clone());
        pending.order.push_back(hash);
        Enqueued::Added
    }
}
