//! Evaluation of staged transactions against each wallet's rule.
//!
//! Per-account failure lists live in a sharded map; the append, threshold
//! check and reset happen under the account's entry lock, so concurrent
//! failures for one account cannot interleave. Every transaction is claimed
//! through its processed marker before it touches that state.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use fraud_watch_domain::{
    config::MonitorConfig,
    model::{FraudFinding, FraudNotification, RuleKind, StagedTransaction},
    services::{cache::TtlStore, notify::Notifier},
    storage::{AlertRuleStore, FindingStore, StorageError},
};
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::registry::RegistrySnapshot;
use crate::staging::StagingArea;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSettings {
    pub failure_threshold: usize,
    pub drain_batch_size: usize,
    pub persist_attempts: u32,
    /// Delay before the first persistence retry; doubled on each attempt.
    pub persist_backoff: Duration,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            drain_batch_size: 256,
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&MonitorConfig> for DetectionSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold(),
            drain_batch_size: config.drain_batch_size(),
            persist_attempts: config.persist_attempts(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct AccountFailureState {
    failed_hashes: Vec<String>,
}

/// Result of evaluating one staged transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The account has no rule in the current snapshot.
    Unregistered,
    /// Another evaluation already claimed this hash.
    AlreadyProcessed,
    /// The processed marker could not be written; the hash was requeued.
    Deferred,
    /// Successful transaction on a high-failure-rate wallet.
    Ignored,
    /// Failure recorded; the account's current run length.
    FailureRecorded { failures: usize },
    FindingEmitted(FraudFinding),
    /// Double-spend detection is not implemented; the transaction is only
    /// acknowledged.
    DoubleSpendObserved,
}

impl Evaluation {
    fn label(&self) -> &'static str {
        match self {
            Evaluation::Unregistered => "unregistered",
            Evaluation::AlreadyProcessed => "already_processed",
            Evaluation::Deferred => "deferred",
            Evaluation::Ignored => "ignored",
            Evaluation::FailureRecorded { .. } => "failure_recorded",
            Evaluation::FindingEmitted(_) => "finding",
            Evaluation::DoubleSpendObserved => "double_spend_observed",
        }
    }
}

/// Counters for one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub evaluated: usize,
    pub findings: usize,
    pub skipped: usize,
    pub deferred: usize,
}

pub struct DetectionEngine<C, S, N> {
    staging: Arc<StagingArea<C>>,
    storage: S,
    notifier: N,
    settings: DetectionSettings,
    failures: DashMap<String, AccountFailureState>,
    unsaved_findings: Mutex<Vec<FraudFinding>>,
}

impl<C, S, N> DetectionEngine<C, S, N>
where
    C: TtlStore,
    S: AlertRuleStore + FindingStore,
    N: Notifier,
{
    pub fn new(
        staging: Arc<StagingArea<C>>,
        storage: S,
        notifier: N,
        settings: DetectionSettings,
    ) -> Self {
        Self {
            staging,
            storage,
            notifier,
            settings,
            failures: DashMap::new(),
            unsaved_findings: Mutex::new(Vec::new()),
        }
    }

    /// Number of failures accumulated for `account` since its last finding.
    pub fn failure_count(&self, account: &str) -> usize {
        self.failures
            .get(account)
            .map(|state| state.failed_hashes.len())
            .unwrap_or(0)
    }

    pub fn failed_hashes(&self, account: &str) -> Vec<String> {
        self.failures
            .get(account)
            .map(|state| state.failed_hashes.clone())
            .unwrap_or_default()
    }

    pub async fn unsaved_findings(&self) -> usize {
        self.unsaved_findings.lock().await.len()
    }

    /// One bounded pass over the staged-but-unprocessed transactions known at
    /// the start of the pass. Hashes staged while the pass runs wait for the
    /// next one.
    pub async fn drain(&self, snapshot: &RegistrySnapshot) -> DrainReport {
        let mut report = DrainReport::default();
        self.retry_unsaved_findings().await;

        let watched = |account: &str| snapshot.contains(account);
        if let Err(err) = self.staging.recover_overflow(watched).await {
            warn!(%err, "staging recovery sweep failed");
        }

        let mut budget = self.staging.pending_len().await;
        let batch_size = self.settings.drain_batch_size.max(1);
        while budget > 0 {
            let batch = match self.staging.next_batch(batch_size.min(budget)).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(%err, "failed to load staged transactions; retrying next cycle");
                    break;
                }
            };
            if batch.popped == 0 {
                break;
            }
            budget = budget.saturating_sub(batch.popped);
            report.skipped += batch.popped - batch.transactions.len();
            histogram!("monitor_drain_batch_entries").record(batch.transactions.len() as f64);

            for tx in &batch.transactions {
                match self.evaluate(tx, snapshot).await {
                    Evaluation::FindingEmitted(_) => {
                        report.evaluated += 1;
                        report.findings += 1;
                    }
                    Evaluation::Unregistered | Evaluation::AlreadyProcessed => report.skipped += 1,
                    Evaluation::Deferred => report.deferred += 1,
                    _ => report.evaluated += 1,
                }
            }
        }

        if report != DrainReport::default() {
            debug!(?report, "drain pass finished");
        }
        report
    }

    /// Evaluates one staged transaction. Safe to call concurrently and
    /// repeatedly for the same hash: only the caller that claims the
    /// processed marker has an effect.
    pub async fn evaluate(&self, tx: &StagedTransaction, snapshot: &RegistrySnapshot) -> Evaluation {
        let evaluation = self.evaluate_inner(tx, snapshot).await;
        counter!("monitor_evaluations_total", "result" => evaluation.label()).increment(1);
        evaluation
    }

    async fn evaluate_inner(
        &self,
        tx: &StagedTransaction,
        snapshot: &RegistrySnapshot,
    ) -> Evaluation {
        let Some(rule_kind) = snapshot.rule_for(&tx.account) else {
            debug!(account = tx.account, hash = tx.hash, "no rule found for wallet");
            return Evaluation::Unregistered;
        };

        match self.staging.claim(&tx.hash).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(hash = tx.hash, "skipping already processed transaction");
                return Evaluation::AlreadyProcessed;
            }
            Err(err) => {
                warn!(%err, hash = tx.hash, "could not mark transaction processed");
                self.staging.requeue(tx.hash.clone()).await;
                return Evaluation::Deferred;
            }
        }

        match rule_kind {
            RuleKind::HighFailureRate => self.check_high_failure_rate(tx).await,
            RuleKind::DoubleSpend => {
                info!(
                    hash = tx.hash,
                    account = tx.account,
                    "double-spend rule recognised; detection not implemented"
                );
                Evaluation::DoubleSpendObserved
            }
        }
    }

    async fn check_high_failure_rate(&self, tx: &StagedTransaction) -> Evaluation {
        if tx.successful {
            return Evaluation::Ignored;
        }

        let threshold = self.settings.failure_threshold.max(1);
        let (failures, crossed) = {
            let mut state = self.failures.entry(tx.account.clone()).or_default();
            state.failed_hashes.push(tx.hash.clone());
            let failures = state.failed_hashes.len();
            let crossed = (failures >= threshold).then(|| std::mem::take(&mut state.failed_hashes));
            (failures, crossed)
        };
        info!(
            hash = tx.hash,
            account = tx.account,
            total_failures = failures,
            "failed transaction detected"
        );

        let Some(hashes) = crossed else {
            return Evaluation::FailureRecorded { failures };
        };

        warn!(
            account = tx.account,
            failed_tx_count = hashes.len(),
            "high failure rate detected"
        );
        let finding = FraudFinding {
            account: tx.account.clone(),
            kind: RuleKind::HighFailureRate,
            failure_count: u32::try_from(hashes.len()).unwrap_or(u32::MAX),
            transaction_hashes: hashes,
            created_at: Utc::now(),
        };
        counter!("monitor_findings_total", "kind" => finding.kind.to_string())
            .increment(1);
        self.record_finding(finding.clone()).await;
        Evaluation::FindingEmitted(finding)
    }

    /// Persists the finding, then notifies the wallet owner. A finding that
    /// cannot be saved is parked for the next drain pass; a failed
    /// notification is only logged.
    async fn record_finding(&self, finding: FraudFinding) {
        if let Err(err) = self.persist_with_retry(&finding).await {
            error!(
                %err,
                account = finding.account,
                failure_count = finding.failure_count,
                hashes = ?finding.transaction_hashes,
                "could not persist fraud finding; will retry next cycle"
            );
            self.unsaved_findings.lock().await.push(finding);
            return;
        }
        self.dispatch(finding).await;
    }

    async fn persist_with_retry(&self, finding: &FraudFinding) -> Result<(), StorageError> {
        let attempts = self.settings.persist_attempts.max(1);
        let mut delay = self.settings.persist_backoff;
        let mut attempt = 1;
        loop {
            match self.storage.create_fraud_finding(finding).await {
                Ok(record) => {
                    debug!(finding_id = record.id, account = record.account, "finding persisted");
                    return Ok(());
                }
                Err(err) => {
                    counter!("monitor_finding_persist_failures_total").increment(1);
                    if attempt >= attempts {
                        return Err(err);
                    }
                    warn!(%err, attempt, "persisting finding failed; backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    async fn dispatch(&self, finding: FraudFinding) {
        let user_id = match self.storage.lookup_owner_user_id(&finding.account).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                warn!(account = finding.account, "no owner found for wallet; notification skipped");
                return;
            }
            Err(err) => {
                counter!("monitor_dispatch_failures_total").increment(1);
                warn!(%err, account = finding.account, "owner lookup failed; notification skipped");
                return;
            }
        };

        let notification = FraudNotification::for_finding(finding);
        if let Err(err) = self.notifier.notify(user_id, &notification).await {
            counter!("monitor_dispatch_failures_total").increment(1);
            warn!(%err, user_id, "failed to dispatch fraud notification");
        }
    }

    async fn retry_unsaved_findings(&self) {
        let parked = std::mem::take(&mut *self.unsaved_findings.lock().await);
        for finding in parked {
            self.record_finding(finding).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fraud_watch_domain::model::{AlertRule, FraudFindingRecord, MonitoredWallet, NewAlertRule};
    use crate::staging::PROCESSED_PREFIX;
    use fraud_watch_domain::services::cache::{CacheError, CacheResult, InMemoryTtlStore};
    use fraud_watch_domain::services::notify::DispatchError;
    use fraud_watch_domain::storage::StorageResult;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const ACCOUNT: &str = "GA";

    /// Clones share state, so the harness keeps a handle to what the engine
    /// owns.
    #[derive(Clone, Default)]
    struct MockStorage {
        findings: Arc<StdMutex<Vec<FraudFinding>>>,
        failing_writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AlertRuleStore for MockStorage {
        async fn list_active_alert_rules(&self) -> StorageResult<Vec<AlertRule>> {
            Ok(Vec::new())
        }

        async fn lookup_owner_user_id(&self, _address: &str) -> StorageResult<Option<i64>> {
            Ok(Some(42))
        }

        async fn insert_alert_rule(&self, _rule: NewAlertRule) -> StorageResult<AlertRule> {
            Err(StorageError::Database("unused".into()))
        }

        async fn deactivate_alert_rule(&self, _id: i64) -> StorageResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl FindingStore for MockStorage {
        async fn create_fraud_finding(
            &self,
            finding: &FraudFinding,
        ) -> StorageResult<FraudFindingRecord> {
            let remaining = self.failing_writes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_writes.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError::Database("disk full".into()));
            }
            let mut findings = self.findings.lock().unwrap();
            findings.push(finding.clone());
            Ok(FraudFindingRecord {
                id: findings.len() as i64,
                account: finding.account.clone(),
                kind: finding.kind.to_string(),
                failure_count: finding.failure_count,
                transaction_hashes: finding.transaction_hashes.clone(),
                created_at: finding.created_at,
            })
        }

        async fn list_fraud_findings(
            &self,
            _account: &str,
        ) -> StorageResult<Vec<FraudFindingRecord>> {
            Ok(Vec::new())
        }
    }

    #[derive(Clone, Default)]
    struct MockNotifier {
        sent: Arc<StdMutex<Vec<(i64, FraudNotification)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(
            &self,
            user_id: i64,
            notification: &FraudNotification,
        ) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Failed("smtp down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((user_id, notification.clone()));
            Ok(())
        }
    }

    type Engine = DetectionEngine<InMemoryTtlStore, MockStorage, MockNotifier>;

    struct Harness {
        engine: Engine,
        staging: Arc<StagingArea<InMemoryTtlStore>>,
        storage: MockStorage,
        notifier: MockNotifier,
    }

    fn harness_with(storage: MockStorage, notifier: MockNotifier) -> Harness {
        let staging = Arc::new(StagingArea::new(
            InMemoryTtlStore::default(),
            Duration::from_secs(1800),
            1024,
        ));
        let settings = DetectionSettings {
            persist_backoff: Duration::from_millis(1),
            ..DetectionSettings::default()
        };
        let engine = DetectionEngine::new(
            staging.clone(),
            storage.clone(),
            notifier.clone(),
            settings,
        );
        Harness {
            engine,
            staging,
            storage,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(MockStorage::default(), MockNotifier::default())
    }

    fn registry(rule_kind: RuleKind) -> RegistrySnapshot {
        RegistrySnapshot::from_wallets([MonitoredWallet {
            address: ACCOUNT.to_string(),
            rule_kind,
        }])
    }

    fn tx(hash: &str, successful: bool) -> StagedTransaction {
        StagedTransaction {
            hash: hash.to_string(),
            account: ACCOUNT.to_string(),
            successful,
            raw_payload: serde_json::json!({ "hash": hash }),
            inserted_at: Utc::now(),
        }
    }

    async fn stage_failures(staging: &StagingArea<InMemoryTtlStore>, range: std::ops::RangeInclusive<u32>) {
        for n in range {
            staging.stage(&tx(&format!("f{n}"), false)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn nine_failures_and_a_success_do_not_fire() {
        let h = harness();
        let snapshot = registry(RuleKind::HighFailureRate);
        stage_failures(&h.staging, 1..=9).await;
        h.staging.stage(&tx("ok1", true)).await.unwrap();

        let report = h.engine.drain(&snapshot).await;

        assert_eq!(report.evaluated, 10);
        assert_eq!(report.findings, 0);
        assert_eq!(h.engine.failure_count(ACCOUNT), 9);
        assert!(h.storage.findings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenth_failure_emits_one_finding_and_resets() {
        let h = harness();
        let snapshot = registry(RuleKind::HighFailureRate);
        stage_failures(&h.staging, 1..=9).await;
        h.staging.stage(&tx("ok1", true)).await.unwrap();
        h.engine.drain(&snapshot).await;

        h.staging.stage(&tx("f10", false)).await.unwrap();
        let report = h.engine.drain(&snapshot).await;

        assert_eq!(report.findings, 1);
        assert_eq!(h.engine.failure_count(ACCOUNT), 0);
        let findings = h.storage.findings.lock().unwrap().clone();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].account, ACCOUNT);
        assert_eq!(findings[0].kind.to_string(), "highFailureRate");
        assert_eq!(findings[0].failure_count, 10);
        assert_eq!(findings[0].transaction_hashes.first().map(String::as_str), Some("f1"));
        assert_eq!(findings[0].transaction_hashes.last().map(String::as_str), Some("f10"));

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert_eq!(sent[0].1.finding.transaction_hashes.len(), 10);
    }

    #[tokio::test]
    async fn one_finding_per_threshold_crossing() {
        let h = harness();
        let snapshot = registry(RuleKind::HighFailureRate);
        stage_failures(&h.staging, 1..=25).await;

        let report = h.engine.drain(&snapshot).await;

        assert_eq!(report.findings, 2);
        assert_eq!(h.engine.failure_count(ACCOUNT), 5);
        assert_eq!(h.storage.findings.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn processed_hash_is_never_counted_twice() {
        let h = harness();
        let snapshot = registry(RuleKind::HighFailureRate);
        let h1 = tx("h1", false);

        assert!(matches!(
            h.engine.evaluate(&h1, &snapshot).await,
            Evaluation::FailureRecorded { failures: 1 }
        ));
        assert_eq!(
            h.engine.evaluate(&h1, &snapshot).await,
            Evaluation::AlreadyProcessed
        );

        // restaging is refused, and a redelivered entry is skipped at drain time
        h.staging.stage(&h1).await.unwrap();
        h.staging.requeue("h1".to_string()).await;
        h.engine.drain(&snapshot).await;

        assert_eq!(h.engine.failed_hashes(ACCOUNT), vec!["h1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_evaluations_have_a_single_effect() {
        let Harness { engine, .. } = harness();
        let engine = Arc::new(engine);
        let snapshot = Arc::new(registry(RuleKind::HighFailureRate));
        let h1 = tx("h1", false);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (engine, snapshot, h1) = (engine.clone(), snapshot.clone(), h1.clone());
                tokio::spawn(async move { engine.evaluate(&h1, &snapshot).await })
            })
            .collect();

        let mut effects = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), Evaluation::FailureRecorded { .. }) {
                effects += 1;
            }
        }
        assert_eq!(effects, 1);
        assert_eq!(engine.failure_count(ACCOUNT), 1);
    }

    /// Store whose processed-marker writes fail while `down` is set.
    struct ClaimOutage {
        inner: InMemoryTtlStore,
        down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TtlStore for ClaimOutage {
        async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool> {
            if key.starts_with(PROCESSED_PREFIX) && self.down.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable("connection refused".into()));
            }
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn exists(&self, key: &str) -> CacheResult<bool> {
            self.inner.exists(key).await
        }

        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.inner.delete(key).await
        }

        async fn scan_keys(&self, prefix: &str) -> CacheResult<Vec<String>> {
            self.inner.scan_keys(prefix).await
        }
    }

    #[tokio::test]
    async fn failed_claim_defers_and_requeues_the_hash() {
        let down = Arc::new(AtomicBool::new(true));
        let staging = Arc::new(StagingArea::new(
            ClaimOutage {
                inner: InMemoryTtlStore::default(),
                down: down.clone(),
            },
            Duration::from_secs(1800),
            16,
        ));
        let engine = DetectionEngine::new(
            staging.clone(),
            MockStorage::default(),
            MockNotifier::default(),
            DetectionSettings::default(),
        );
        let snapshot = registry(RuleKind::HighFailureRate);
        staging.stage(&tx("f1", false)).await.unwrap();

        let report = engine.drain(&snapshot).await;
        assert_eq!(report.deferred, 1);
        assert_eq!(staging.pending_len().await, 1);
        assert_eq!(engine.failure_count(ACCOUNT), 0);

        assert_eq!(
            engine.evaluate(&tx("f1", false), &snapshot).await,
            Evaluation::Deferred
        );
        assert_eq!(staging.pending_len().await, 1);

        down.store(false, Ordering::SeqCst);
        let report = engine.drain(&snapshot).await;
        assert_eq!(report.evaluated, 1);
        engine.drain(&snapshot).await;
        assert_eq!(engine.failure_count(ACCOUNT), 1);
        assert_eq!(staging.pending_len().await, 0);
    }

    #[tokio::test]
    async fn unwatched_backlog_does_not_starve_watched_wallets() {
        let staging = Arc::new(StagingArea::new(
            InMemoryTtlStore::default(),
            Duration::from_secs(1800),
            2,
        ));
        let storage = MockStorage::default();
        let engine = DetectionEngine::new(
            staging.clone(),
            storage.clone(),
            MockNotifier::default(),
            DetectionSettings {
                failure_threshold: 1,
                persist_backoff: Duration::from_millis(1),
                ..DetectionSettings::default()
            },
        );
        for n in 0..50 {
            let unwatched = StagedTransaction {
                account: "GX".to_string(),
                ..tx(&format!("x{n}"), false)
            };
            staging.stage(&unwatched).await.unwrap();
        }
        staging.stage(&tx("r1", false)).await.unwrap();

        let snapshot = registry(RuleKind::HighFailureRate);
        for _ in 0..3 {
            engine.drain(&snapshot).await;
        }

        assert_eq!(storage.findings.lock().unwrap().len(), 1);
        assert!(staging.is_processed("r1").await.unwrap());
        assert!(!staging.is_processed("x0").await.unwrap());
    }

    #[tokio::test]
    async fn unregistered_wallets_never_fire() {
        let h = harness();
        stage_failures(&h.staging, 1..=12).await;

        let report = h.engine.drain(&RegistrySnapshot::default()).await;

        assert_eq!(report.skipped, 12);
        assert_eq!(h.engine.failure_count(ACCOUNT), 0);
        assert!(h.storage.findings.lock().unwrap().is_empty());
        assert!(!h.staging.is_processed("f1").await.unwrap());
    }

    #[tokio::test]
    async fn double_spend_rule_only_acknowledges() {
        let h = harness();
        let snapshot = registry(RuleKind::DoubleSpend);

        let evaluation = h.engine.evaluate(&tx("h1", false), &snapshot).await;

        assert_eq!(evaluation, Evaluation::DoubleSpendObserved);
        assert_eq!(h.engine.failure_count(ACCOUNT), 0);
        assert!(h.staging.is_processed("h1").await.unwrap());
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_finding_and_reset() {
        let h = harness_with(
            MockStorage::default(),
            MockNotifier {
                fail: true,
                ..MockNotifier::default()
            },
        );
        let snapshot = registry(RuleKind::HighFailureRate);
        stage_failures(&h.staging, 1..=10).await;

        let report = h.engine.drain(&snapshot).await;

        assert_eq!(report.findings, 1);
        assert_eq!(h.storage.findings.lock().unwrap().len(), 1);
        assert_eq!(h.engine.failure_count(ACCOUNT), 0);
    }

    #[tokio::test]
    async fn unsaved_findings_are_retried_on_next_pass() {
        let storage = MockStorage::default();
        storage.failing_writes.store(3, Ordering::SeqCst);
        let h = harness_with(storage, MockNotifier::default());
        let snapshot = registry(RuleKind::HighFailureRate);
        stage_failures(&h.staging, 1..=10).await;

        h.engine.drain(&snapshot).await;
        assert_eq!(h.engine.unsaved_findings().await, 1);
        assert!(h.storage.findings.lock().unwrap().is_empty());
        assert_eq!(h.engine.failure_count(ACCOUNT), 0);

        h.engine.drain(&snapshot).await;
        assert_eq!(h.engine.unsaved_findings().await, 0);
        assert_eq!(h.storage.findings.lock().unwrap().len(), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }
}
