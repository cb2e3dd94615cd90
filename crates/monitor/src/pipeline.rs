use chrono::Utc;
use fraud_watch_domain::model::StagedTransaction;
use fraud_watch_domain::services::cache::{CacheError, TtlStore};
use metrics::counter;
use tracing::{debug, warn};

use crate::feed::FeedEvent;
use crate::staging::{StageOutcome, StagingArea};

/// Stages one feed event. Cache failures are returned to the caller, which
/// keeps the subscription alive: staging is best-effort.
pub async fn ingest_event<C>(
    staging: &StagingArea<C>,
    event: FeedEvent,
) -> Result<StageOutcome, CacheError>
where
    C: TtlStore,
{
    let tx = StagedTransaction {
        hash: event.hash,
        account: event.account,
        successful: event.successful,
        raw_payload: event.payload,
        inserted_at: Utc::now(),
    };

    let outcome = match staging.stage(&tx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            counter!("monitor_transactions_ingested_total", "result" => "error").increment(1);
            warn!(%err, hash = tx.hash, "failed to stage transaction");
            return Err(err);
        }
    };

    let result = match outcome {
        StageOutcome::Staged => "staged",
        StageOutcome::AlreadyStaged => "duplicate",
        StageOutcome::AlreadyProcessed => "processed",
    };
    counter!("monitor_transactions_ingested_total", "result" => result).increment(1);
    debug!(
        hash = tx.hash,
        account = tx.account,
        successful = tx.successful,
        result,
        "transaction ingested"
    );

    Ok(outcome)
}
