//! Server-sent-events plumbing shared by every streaming adapter.
//!
//! [`SseDecoder`] turns raw body chunks into `data:` payloads, and
//! [`spawn_event_pump`] runs the background task that feeds those payloads
//! through a protocol-specific [`StreamParser`] into the event channel.

use std::fmt::Display;

use codeloop_core::error::ProviderError;
use codeloop_core::provider::{EVENT_CHANNEL_CAPACITY, EventStream, ProviderEvent};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Incremental line decoder for an SSE body.
///
/// Buffers raw bytes so that a line (or a multi-byte UTF-8 character) split
/// across two network chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and return every complete `data:` payload in it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(data) = Self::parse_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::parse_line(&line)
    }

    fn parse_line(raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\n', '\r']);

        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        // Event names are repeated inside each JSON payload's "type" field
        if line.starts_with("event:") {
            return None;
        }

        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim().is_empty() {
            None
        } else {
            Some(data.to_string())
        }
    }
}

/// A vendor protocol's state machine over `data:` payloads.
///
/// Implementations are pure: they never touch the network, which keeps
/// them testable by feeding recorded payloads.
pub trait StreamParser: Send + 'static {
    /// Handle one payload, returning the events it produced in order.
    fn on_data(&mut self, data: &str) -> Vec<ProviderEvent>;

    /// The body ended. Flush whatever is pending and emit `Done` if the
    /// protocol never did.
    fn finish(&mut self) -> Vec<ProviderEvent>;
}

/// Spawn the background task that pumps `body` through `parser`.
///
/// The returned channel always closes: after `Done`, after an `Error`,
/// when the body ends, when the receiver is dropped, or when `cancel`
/// fires (in which case `Error(Cancelled)` is the last event).
pub fn spawn_event_pump<S, B, E, P>(body: S, mut parser: P, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    P: StreamParser,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Provider stream cancelled");
                    let _ = tx.send(ProviderEvent::Error(ProviderError::Cancelled)).await;
                    return;
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    for data in decoder.push(bytes.as_ref()) {
                        if !forward(&tx, parser.on_data(&data)).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx
                        .send(ProviderEvent::Error(ProviderError::StreamInterrupted(
                            e.to_string(),
                        )))
                        .await;
                    return;
                }
                None => break,
            }
        }

        if let Some(data) = decoder.finish()
            && !forward(&tx, parser.on_data(&data)).await
        {
            return;
        }

        trace!("Provider body ended");
        let _ = forward(&tx, parser.finish()).await;
    });

    rx
}

/// Send events in order. Returns `false` once the stream is over, either
/// because a terminal event went out or because nobody is listening.
async fn forward(tx: &mpsc::Sender<ProviderEvent>, events: Vec<ProviderEvent>) -> bool {
    for event in events {
        let terminal = matches!(event, ProviderEvent::Done(_) | ProviderEvent::Error(_));
        if tx.send(event).await.is_err() {
            return false;
        }
        if terminal {
            return false;
        }
    }
    true
}

/// Map a non-success HTTP response to a [`ProviderError`].
pub async fn error_for_status(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(5);

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status, body = %body, "Provider API error");

    Err(match status {
        429 => ProviderError::RateLimited { retry_after_secs },
        401 | 403 => ProviderError::AuthenticationFailed(format!("Invalid {provider} API key")),
        404 => ProviderError::ModelNotFound(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    })
}

/// Map a transport failure from `reqwest`.
pub fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}
