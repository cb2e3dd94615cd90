//! Live transaction feed abstraction plus the Horizon adapter.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

mod horizon;

pub use horizon::{HorizonFeed, SseDecoder, SseFrame};

/// One transaction observed on a wallet's live feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub hash: String,
    pub account: String,
    pub successful: bool,
    pub payload: serde_json::Value,
    /// Paging token of this event; subscribing with it resumes right after.
    pub cursor: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("malformed feed event: {0}")]
    Malformed(String),
    #[error("feed stream closed")]
    Closed,
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Unbounded stream of events for one address. An `Err` item is fatal for the
/// subscription.
pub type FeedStream = BoxStream<'static, Result<FeedEvent, FeedError>>;

#[async_trait]
pub trait TransactionFeed: Send + Sync + 'static {
    /// Opens a live subscription including failed transactions. Without a
    /// cursor the stream starts at the newest transaction; with one it
    /// replays everything after that paging token first.
    async fn subscribe(&self, address: &str, cursor: Option<&str>)
        -> Result<FeedStream, FeedError>;
}
