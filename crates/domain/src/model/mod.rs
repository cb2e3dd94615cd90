//! Data structures shared across the storage adapter and the monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Alert name attached to notifications raised by the high-failure-rate rule.
pub const HIGH_FAILURE_ALERT_NAME: &str = "High Failure Rate Alert";

/// Fraud-detection strategy applied to a wallet. The persisted form is the
/// camelCase string (`doubleSpend`, `highFailureRate`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RuleKind {
    DoubleSpend,
    HighFailureRate,
}

/// A wallet address together with the rule that currently applies to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredWallet {
    pub address: String,
    pub rule_kind: RuleKind,
}

/// Persisted alert configuration as seen by the monitor. `rule_type` is kept
/// as the raw string so unknown rule kinds can be reported instead of failing
/// the whole listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRule {
    pub id: i64,
    pub user_id: i64,
    pub alert_name: String,
    pub wallet_id: String,
    pub rule_type: String,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn rule_kind(&self) -> Option<RuleKind> {
        self.rule_type.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlertRule {
    pub user_id: i64,
    pub alert_name: String,
    pub wallet_id: String,
    pub rule_type: String,
    /// JSON document describing where notifications should go.
    pub notification_preferences: Option<String>,
}

/// Transaction parked in the TTL store between ingestion and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTransaction {
    pub hash: String,
    pub account: String,
    pub successful: bool,
    pub raw_payload: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}

/// Record asserting that a fraud condition was detected for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FraudFinding {
    pub account: String,
    pub kind: RuleKind,
    pub failure_count: u32,
    /// Hashes that contributed to the crossing, oldest first.
    pub transaction_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FraudFindingRecord {
    pub id: i64,
    pub account: String,
    pub kind: String,
    pub failure_count: u32,
    pub transaction_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload handed to the notification dispatcher after a finding is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FraudNotification {
    pub alert_name: String,
    pub finding: FraudFinding,
}

impl FraudNotification {
    pub fn for_finding(finding: FraudFinding) -> Self {
        let alert_name = match finding.kind {
            RuleKind::HighFailureRate => HIGH_FAILURE_ALERT_NAME.to_string(),
            RuleKind::DoubleSpend => "Double Spend Alert".to_string(),
        };
        Self {
            alert_name,
            finding,
        }
    }
}
