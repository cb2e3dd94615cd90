use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use fraud_watch_domain::{
    model::{MonitoredWallet, RuleKind},
    storage::{AlertRuleStore, StorageError},
};
use metrics::counter;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("failed to fetch alert rules: {0}")]
    ConfigFetch(#[from] StorageError),
}

/// Immutable view of which rule applies to which wallet. Replaced wholesale on
/// every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    wallets: HashMap<String, RuleKind>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn from_wallets(wallets: impl IntoIterator<Item = MonitoredWallet>) -> Self {
        Self {
            wallets: wallets
                .into_iter()
                .map(|wallet| (wallet.address, wallet.rule_kind))
                .collect(),
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn rule_for(&self, address: &str) -> Option<RuleKind> {
        self.wallets.get(address).copied()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.wallets.contains_key(address)
    }

    pub fn wallets(&self) -> impl Iterator<Item = MonitoredWallet> + '_ {
        self.wallets.iter().map(|(address, rule_kind)| MonitoredWallet {
            address: address.clone(),
            rule_kind: *rule_kind,
        })
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// `None` until the first successful refresh.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

/// Owns the latest wallet → rule mapping and republishes it from persisted
/// alert rules on demand.
pub struct WalletRegistry<S> {
    store: S,
    current: watch::Sender<Arc<RegistrySnapshot>>,
}

impl<S> WalletRegistry<S>
where
    S: AlertRuleStore,
{
    pub fn new(store: S) -> Self {
        let (current, _) = watch::channel(Arc::new(RegistrySnapshot::default()));
        Self { store, current }
    }

    /// Rebuilds the mapping from every active alert rule. The result is
    /// authoritative: wallets without an active rule disappear. On error the
    /// previous snapshot stays published.
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let rules = match self.store.list_active_alert_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                counter!("monitor_registry_refresh_total", "result" => "error").increment(1);
                return Err(err.into());
            }
        };

        let mut wallets = Vec::with_capacity(rules.len());
        for rule in rules {
            let Some(rule_kind) = rule.rule_kind() else {
                warn!(
                    rule_id = rule.id,
                    rule_type = rule.rule_type,
                    wallet = rule.wallet_id,
                    "ignoring alert rule with unknown rule type"
                );
                continue;
            };
            wallets.push(MonitoredWallet {
                address: rule.wallet_id,
                rule_kind,
            });
        }

        // rules arrive oldest first, so later entries overwrite earlier ones
        let snapshot = Arc::new(RegistrySnapshot::from_wallets(wallets));
        self.current.send_replace(snapshot.clone());
        counter!("monitor_registry_refresh_total", "result" => "ok").increment(1);
        debug!(wallets = snapshot.len(), "wallet registry refreshed");
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.borrow().clone()
    }

    /// Receives every published snapshot, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.current.subscribe()
    }
}
