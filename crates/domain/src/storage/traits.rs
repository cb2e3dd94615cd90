use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AlertRule, FraudFinding, FraudFindingRecord, NewAlertRule};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    /// Returns every alert rule that has not been deactivated, oldest first.
    async fn list_active_alert_rules(&self) -> StorageResult<Vec<AlertRule>>;
    /// Owner of the oldest active rule watching `address`.
    async fn lookup_owner_user_id(&self, address: &str) -> StorageResult<Option<i64>>;
    async fn insert_alert_rule(&self, rule: NewAlertRule) -> StorageResult<AlertRule>;
    /// Soft-deletes a rule. Returns `false` when it was missing or already inactive.
    async fn deactivate_alert_rule(&self, id: i64) -> StorageResult<bool>;
}

#[async_trait]
pub trait FindingStore: Send + Sync {
    async fn create_fraud_finding(&self, finding: &FraudFinding)
        -> StorageResult<FraudFindingRecord>;
    async fn list_fraud_findings(&self, account: &str) -> StorageResult<Vec<FraudFindingRecord>>;
}
