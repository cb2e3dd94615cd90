use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::model::FraudNotification;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("notification dispatch failed: {0}")]
    Failed(String),
}

/// Delivery side of a finding. Fire-and-forget from the monitor's point of
/// view: retries, formatting and transports belong to the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: i64,
        notification: &FraudNotification,
    ) -> Result<(), DispatchError>;
}

/// Dispatcher that only records notifications in the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: i64,
        notification: &FraudNotification,
    ) -> Result<(), DispatchError> {
        let finding = &notification.finding;
        info!(
            user_id,
            alert = notification.alert_name,
            rule = %finding.kind,
            wallet = finding.account,
            failure_count = finding.failure_count,
            hashes = ?finding.transaction_hashes,
            triggered_at = %finding.created_at,
            "fraud alert triggered"
        );
        Ok(())
    }
}
