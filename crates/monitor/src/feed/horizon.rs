use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, warn};

use super::{FeedError, FeedEvent, FeedStream, TransactionFeed};

/// Streams account transactions from a Horizon server over server-sent events.
#[derive(Clone)]
pub struct HorizonFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HorizonFeed {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn transactions_url(&self, address: &str) -> String {
        format!(
            "{}/accounts/{}/transactions",
            self.base_url.trim_end_matches('/'),
            address
        )
    }
}

#[async_trait]
impl TransactionFeed for HorizonFeed {
    async fn subscribe(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<FeedStream, FeedError> {
        let response = self
            .client
            .get(self.transactions_url(address))
            .query(&[
                ("cursor", cursor.unwrap_or("now")),
                ("order", "asc"),
                ("include_failed", "true"),
            ])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        debug!(address, cursor, "horizon stream opened");

        let events = stream::unfold(
            (Box::pin(response.bytes_stream()), SseDecoder::default()),
            |(mut chunks, mut decoder)| async move {
                loop {
                    while let Some(frame) = decoder.next_frame() {
                        match parse_transaction(&frame) {
                            Ok(Some(event)) => return Some((Ok(event), (chunks, decoder))),
                            Ok(None) => {}
                            Err(err) => warn!(%err, "skipping malformed horizon frame"),
                        }
                    }
                    match chunks.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(err)) => {
                            return Some((Err(FeedError::from(err)), (chunks, decoder)))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(events.boxed())
    }
}

/// One server-sent event: the joined `data:` lines and the last `id:` seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub data: String,
}

/// Incremental decoder for `text/event-stream` bodies. Frames without data
/// (comments, `retry:` hints) are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
    }

    pub fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            let end = self.buffer.windows(2).position(|pair| pair == b"\n\n")?;
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let raw = String::from_utf8_lossy(&raw);

            let mut id = None;
            let mut data = Vec::new();
            for line in raw.lines() {
                let Some((field, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "data" => data.push(value),
                    "id" => id = Some(value.to_string()),
                    _ => {}
                }
            }
            if !data.is_empty() {
                return Some(SseFrame {
                    id,
                    data: data.join("\n"),
                });
            }
        }
    }
}

/// Maps a Horizon transaction record onto a feed event. Non-object payloads
/// (the `"hello"` greeting, `"byebye"`) are not transactions. The record's
/// `paging_token` is the resume cursor, falling back to the frame id.
fn parse_transaction(frame: &SseFrame) -> Result<Option<FeedEvent>, FeedError> {
    let payload: Value =
        serde_json::from_str(&frame.data).map_err(|err| FeedError::Malformed(err.to_string()))?;
    if !payload.is_object() {
        return Ok(None);
    }

    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| FeedError::Malformed(format!("missing `{name}`")))
    };
    let hash = field("hash")?;
    let account = field("source_account")?;
    let successful = payload
        .get("successful")
        .and_then(Value::as_bool)
        .ok_or_else(|| FeedError::Malformed("missing `successful`".to_string()))?;
    let cursor = payload
        .get("paging_token")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| frame.id.clone());

    Ok(Some(FeedEvent {
        hash,
        account,
        successful,
        payload,
        cursor,
    }))
}
