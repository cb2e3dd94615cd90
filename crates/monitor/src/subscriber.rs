//! Per-wallet feed subscriptions and the pool that supervises them.
//!
//! The pool is reconciled against every registry snapshot: wallets that
//! appeared get a worker, wallets that disappeared have theirs cancelled, and
//! workers whose feed ended are started again. A worker never outlives its
//! wallet's presence in the registry.

use std::{collections::HashMap, sync::Arc};

use fraud_watch_domain::{model::MonitoredWallet, model::RuleKind, services::cache::TtlStore};
use futures::{future::join_all, FutureExt, StreamExt};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::feed::{FeedError, TransactionFeed};
use crate::pipeline::ingest_event;
use crate::registry::RegistrySnapshot;
use crate::staging::StagingArea;

/// How a subscription ended, with the paging token to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEnd {
    /// Cursor of the last event received, or the cursor the subscription
    /// started from when nothing arrived.
    pub cursor: Option<String>,
    pub result: Result<(), FeedError>,
}

/// Runs one wallet's subscription from `cursor` (newest when `None`) until
/// `cancel` fires (`Ok`) or the feed fails or closes (the `FeedError`).
pub async fn run_subscriber<F, C>(
    feed: Arc<F>,
    staging: Arc<StagingArea<C>>,
    wallet: MonitoredWallet,
    mut cursor: Option<String>,
    cancel: CancellationToken,
) -> SubscriptionEnd
where
    F: TransactionFeed,
    C: TtlStore,
{
    let opened = tokio::select! {
        _ = cancel.cancelled() => None,
        opened = feed.subscribe(&wallet.address, cursor.as_deref()) => Some(opened),
    };
    let mut events = match opened {
        None => return SubscriptionEnd { cursor, result: Ok(()) },
        Some(Ok(events)) => events,
        Some(Err(err)) => return SubscriptionEnd { cursor, result: Err(err) },
    };
    info!(
        wallet = wallet.address,
        rule = %wallet.rule_kind,
        cursor = cursor.as_deref().unwrap_or("now"),
        "now monitoring transactions"
    );

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(wallet = wallet.address, "subscription cancelled");
                break Ok(());
            }
            next = events.next() => match next {
                Some(Ok(event)) => {
                    debug!(wallet = wallet.address, hash = event.hash, "new transaction");
                    if event.cursor.is_some() {
                        cursor.clone_from(&event.cursor);
                    }
                    // staging failures are logged by the pipeline; keep listening
                    let _ = ingest_event(&staging, event).await;
                }
                Some(Err(err)) => break Err(err),
                None => break Err(FeedError::Closed),
            },
        }
    };
    SubscriptionEnd { cursor, result }
}

struct Worker {
    rule_kind: RuleKind,
    cancel: CancellationToken,
    /// Cursor this worker was started from.
    cursor: Option<String>,
    handle: JoinHandle<SubscriptionEnd>,
    restarts: u32,
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
}

pub struct SubscriberPool<F, C> {
    feed: Arc<F>,
    staging: Arc<StagingArea<C>>,
    shutdown: CancellationToken,
    workers: HashMap<String, Worker>,
}

impl<F, C> SubscriberPool<F, C>
where
    F: TransactionFeed,
    C: TtlStore + 'static,
{
    /// Workers get child tokens of `shutdown`, so cancelling it stops them all.
    pub fn new(feed: Arc<F>, staging: Arc<StagingArea<C>>, shutdown: CancellationToken) -> Self {
        Self {
            feed,
            staging,
            shutdown,
            workers: HashMap::new(),
        }
    }

    pub fn reconcile(&mut self, snapshot: &RegistrySnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let removed: Vec<String> = self
            .workers
            .keys()
            .filter(|address| !snapshot.contains(address))
            .cloned()
            .collect();
        for address in removed {
            if let Some(worker) = self.workers.remove(&address) {
                worker.cancel.cancel();
                info!(wallet = address, "wallet left the registry; subscription cancelled");
                report.stopped.push(address);
            }
        }

        for wallet in snapshot.wallets() {
            match self.workers.get_mut(&wallet.address) {
                Some(worker) if worker.handle.is_finished() => {
                    let resume = match (&mut worker.handle).now_or_never() {
                        Some(Ok(end)) => {
                            warn!(
                                wallet = wallet.address,
                                restarts = worker.restarts,
                                result = ?end.result,
                                "subscription ended; resubscribing"
                            );
                            end.cursor
                        }
                        other => {
                            warn!(
                                wallet = wallet.address,
                                exit = ?other,
                                "subscription task failed; resubscribing"
                            );
                            worker.cursor.take()
                        }
                    };
                    counter!("monitor_subscriber_restarts_total").increment(1);
                    let restarts = worker.restarts + 1;
                    let mut replacement = self.spawn(wallet.clone(), resume);
                    replacement.restarts = restarts;
                    self.workers.insert(wallet.address.clone(), replacement);
                    report.restarted.push(wallet.address);
                }
                Some(worker) => {
                    if worker.rule_kind != wallet.rule_kind {
                        debug!(
                            wallet = wallet.address,
                            rule = %wallet.rule_kind,
                            "wallet rule changed"
                        );
                        worker.rule_kind = wallet.rule_kind;
                    }
                }
                None => {
                    let worker = self.spawn(wallet.clone(), None);
                    self.workers.insert(wallet.address.clone(), worker);
                    report.started.push(wallet.address);
                }
            }
        }

        gauge!("monitor_active_subscribers").set(self.workers.len() as f64);
        report
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_watching(&self, address: &str) -> bool {
        self.workers.contains_key(address)
    }

    /// Cancels every worker and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self
            .workers
            .drain()
            .map(|(_, worker)| worker.handle)
            .collect();
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!(%err, "subscriber task panicked");
            }
        }
        gauge!("monitor_active_subscribers").set(0.0);
    }

    fn spawn(&self, wallet: MonitoredWallet, cursor: Option<String>) -> Worker {
        let cancel = self.shutdown.child_token();
        let rule_kind = wallet.rule_kind;
        let handle = tokio::spawn(run_subscriber(
            self.feed.clone(),
            self.staging.clone(),
            wallet,
            cursor.clone(),
            cancel.clone(),
        ));
        Worker {
            rule_kind,
            cancel,
            cursor,
            handle,
            restarts: 0,
        }
    }
}
