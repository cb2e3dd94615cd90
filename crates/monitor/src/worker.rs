use std::{sync::Arc, time::Duration};

use metrics::{counter, gauge, histogram};
use strum_macros::Display;
use thiserror::Error;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fraud_watch_domain::{
    config::{ConfigError, MonitorConfig},
    services::{
        cache::{InMemoryTtlStore, TtlStore},
        notify::{Notifier, TracingNotifier},
        telemetry::TelemetryError,
    },
    storage::{AlertRuleStore, FindingStore, StorageError},
};

use crate::{
    detection::{DetectionEngine, DetectionSettings},
    feed::{FeedError, TransactionFeed},
    registry::{RegistrySnapshot, WalletRegistry},
    staging::StagingArea,
    subscriber::SubscriberPool,
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Steps of one monitoring cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CyclePhase {
    RefreshingRegistry,
    SpawningSubscribers,
    AwaitingInterval,
    DrainingDetections,
}

/// Periodic orchestrator: refresh the wallet registry, reconcile
/// subscriptions, wait one interval, then drain staged transactions through
/// the detection engine.
pub struct Monitor<S, F, C, N> {
    registry: WalletRegistry<S>,
    feed: Arc<F>,
    staging: Arc<StagingArea<C>>,
    engine: DetectionEngine<C, S, N>,
    interval: Duration,
    ready: watch::Sender<bool>,
}

impl<S, F, C, N> Monitor<S, F, C, N>
where
    S: AlertRuleStore + FindingStore + Clone,
    F: TransactionFeed,
    C: TtlStore + 'static,
    N: Notifier,
{
    pub fn new(
        storage: S,
        feed: Arc<F>,
        staging: Arc<StagingArea<C>>,
        notifier: N,
        settings: DetectionSettings,
        interval: Duration,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            registry: WalletRegistry::new(storage.clone()),
            engine: DetectionEngine::new(staging.clone(), storage, notifier, settings),
            feed,
            staging,
            interval,
            ready,
        }
    }

    /// Flips to `true` after the first successful registry refresh and back
    /// to `false` once the loop has stopped.
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Follows the watched wallet set as each cycle refreshes it.
    pub fn registry_updates(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.registry.subscribe()
    }

    /// Runs cycles until `cancel` fires, then stops every subscription.
    pub async fn run(self, cancel: CancellationToken) {
        let mut pool = SubscriberPool::new(
            self.feed.clone(),
            self.staging.clone(),
            cancel.child_token(),
        );
        info!(
            interval_ms = self.interval.as_millis() as u64,
            retention_secs = self.staging.retention().as_secs(),
            "fraud monitor started"
        );

        while !cancel.is_cancelled() {
            let started = Instant::now();

            enter(CyclePhase::RefreshingRegistry);
            let snapshot = match self.registry.refresh().await {
                Ok(snapshot) => {
                    self.ready.send_replace(true);
                    snapshot
                }
                Err(err) => {
                    warn!(%err, "error fetching alerts; keeping previous registry");
                    self.registry.snapshot()
                }
            };
            gauge!("monitor_registered_wallets").set(snapshot.len() as f64);

            enter(CyclePhase::SpawningSubscribers);
            let changes = pool.reconcile(&snapshot);
            if !changes.started.is_empty() || !changes.stopped.is_empty() {
                info!(
                    started = changes.started.len(),
                    stopped = changes.stopped.len(),
                    restarted = changes.restarted.len(),
                    watching = pool.len(),
                    "subscriptions reconciled"
                );
            }

            enter(CyclePhase::AwaitingInterval);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            enter(CyclePhase::DrainingDetections);
            let latest = self.registry.snapshot();
            self.engine.drain(&latest).await;

            counter!("monitor_cycles_total").increment(1);
            histogram!("monitor_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        }

        pool.shutdown().await;
        self.ready.send_replace(false);
        info!("fraud monitor stopped");
    }
}

fn enter(phase: CyclePhase) {
    debug!(%phase, "monitor cycle phase");
}

/// Wires the production collaborators (in-process TTL store, log-only
/// notifier) and runs the monitor until `cancel` fires.
pub async fn run_monitor<S, F>(
    config: &MonitorConfig,
    storage: S,
    feed: F,
    cancel: CancellationToken,
) where
    S: AlertRuleStore + FindingStore + Clone,
    F: TransactionFeed,
{
    let staging = Arc::new(StagingArea::new(
        InMemoryTtlStore::with_capacity(config.cache_capacity()),
        config.retention(),
        config.staging_capacity(),
    ));
    let monitor = Monitor::new(
        storage,
        Arc::new(feed),
        staging,
        TracingNotifier,
        DetectionSettings::from(config),
        config.poll_interval(),
    );
    monitor.run(cancel).await;
}
