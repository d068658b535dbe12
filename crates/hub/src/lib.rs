//! Mirador hub: server-push event streams with automatic reconnect.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod sse;

pub use sse::{SseDecoder, SseError, SseEvent};

/// Transport-level notifications delivered to the stream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A (re)connect attempt started.
    Connecting,
    /// Response headers received; frames will follow.
    Open,
    Message(SseEvent),
    /// The connection failed or ended; a reconnect follows after the retry delay.
    Error(String),
}

/// Why a pump returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEnd {
    Cancelled,
    /// Consumer dropped its receiver.
    Closed,
    Eof,
    Failed(String),
}

/// Decode a byte stream into [`StreamEvent::Message`]s until it ends, fails,
/// the consumer goes away or `cancel_rx` fires.
pub async fn pump_events<S, E>(
    stream: S,
    decoder: &mut SseDecoder,
    tx: &mpsc::Sender<StreamEvent>,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> PumpEnd
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = &mut *cancel_rx => return PumpEnd::Cancelled,
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    let events = match decoder.push(&chunk) {
                        Ok(evs) => evs,
                        Err(e) => return PumpEnd::Failed(e.to_string()),
                    };
                    for ev in events {
                        metrics::counter!("stream_frames_total", 1u64);
                        if tx.send(StreamEvent::Message(ev)).await.is_err() {
                            return PumpEnd::Closed;
                        }
                    }
                }
                Some(Err(e)) => return PumpEnd::Failed(e.to_string()),
                None => return PumpEnd::Eof,
            }
        }
    }
}

async fn connect(client: &reqwest::Client, url: &reqwest::Url) -> Result<reqwest::Response> {
    let resp = client
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("event stream rejected: HTTP {}", status.as_u16()));
    }
    Ok(resp)
}

/// Keep an event stream open until cancelled. Every attempt is announced with
/// `Connecting`, success with `Open`, and every failure or EOF with `Error`,
/// after which the loop waits for the server-provided retry delay (or
/// `default_retry`) and reconnects.
pub async fn run_event_stream(
    client: reqwest::Client,
    url: reqwest::Url,
    default_retry: Duration,
    tx: mpsc::Sender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut decoder = SseDecoder::new();
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        if tx.send(StreamEvent::Connecting).await.is_err() {
            break;
        }
        let t0 = Instant::now();
        let opened = tokio::select! {
            _ = &mut cancel_rx => break,
            r = connect(&client, &url) => r,
        };
        let reason = match opened {
            Ok(resp) => {
                info!(url = %url, attempt, took_ms = %t0.elapsed().as_millis(), "stream: connected");
                if tx.send(StreamEvent::Open).await.is_err() {
                    break;
                }
                match pump_events(resp.bytes_stream(), &mut decoder, &tx, &mut cancel_rx).await {
                    PumpEnd::Cancelled | PumpEnd::Closed => break,
                    PumpEnd::Eof => "stream closed by server".to_string(),
                    PumpEnd::Failed(e) => e,
                }
            }
            Err(e) => format!("{e:#}"),
        };
        decoder.reset();
        let delay = decoder.retry().unwrap_or(default_retry);
        warn!(url = %url, error = %reason, retry_ms = %delay.as_millis(), "stream: error; retrying");
        if tx.send(StreamEvent::Error(reason)).await.is_err() {
            break;
        }
        tokio::select! {
            _ = &mut cancel_rx => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(url = %url, "stream: loop ended");
}

/// Running event stream: receiver plus the means to stop it.
pub struct EventStream {
    pub rx: mpsc::Receiver<StreamEvent>,
    pub cancel_tx: oneshot::Sender<()>,
    pub task: JoinHandle<()>,
}

/// Spawn [`run_event_stream`] on the current runtime.
pub fn spawn_event_stream(client: reqwest::Client, url: reqwest::Url, default_retry: Duration, cap: usize) -> EventStream {
    let (tx, rx) = mpsc::channel(cap.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(run_event_stream(client, url, default_retry, tx, cancel_rx));
    EventStream { rx, cancel_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk(s: &'static str) -> Result<bytes::Bytes, std::io::Error> {
        Ok(bytes::Bytes::from_static(s.as_bytes()))
    }

    #[tokio::test]
    async fn pump_decodes_frames_across_chunks() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let mut dec = SseDecoder::new();
        let s = stream::iter(vec![
            chunk(": keep-alive\n\nevent: state\ndata: {\"queues\""),
            chunk(":[]}\n\n"),
            chunk("event: state\ndata: {}\n\n"),
        ]);
        let end = pump_events(s, &mut dec, &tx, &mut cancel_rx).await;
        assert_eq!(end, PumpEnd::Eof);
        drop(tx);
        let mut out = Vec::new();
        while let Some(StreamEvent::Message(ev)) = rx.recv().await {
            out.push(ev.data);
        }
        assert_eq!(out, vec!["{\"queues\":[]}".to_string(), "{}".to_string()]);
    }

    #[tokio::test]
    async fn pump_reports_transport_failure() {
        let (tx, _rx) = mpsc::channel(4);
        let (_cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let mut dec = SseDecoder::new();
        let s = stream::iter(vec![
            chunk("data: x\n\n"),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        assert_eq!(pump_events(s, &mut dec, &tx, &mut cancel_rx).await, PumpEnd::Failed("reset".into()));
    }

    #[tokio::test]
    async fn cancel_stops_pump_quickly() {
        let (tx, mut rx) = mpsc::channel(16);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let s = async_stream::stream! {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                yield chunk("event: state\ndata: {}\n\n");
            }
        };
        let handle = tokio::spawn(async move {
            let mut dec = SseDecoder::new();
            pump_events(s, &mut dec, &tx, &mut cancel_rx).await
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = cancel_tx.send(());
        let end = tokio::time::timeout(Duration::from_secs(1), handle).await.expect("pump did not stop").unwrap();
        assert_eq!(end, PumpEnd::Cancelled);
        assert!(matches!(rx.recv().await, Some(StreamEvent::Message(_))));
    }

    #[tokio::test]
    async fn oversized_line_fails_the_pump() {
        let (tx, _rx) = mpsc::channel(4);
        let (_cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let mut dec = SseDecoder::with_limit(8);
        let s = stream::iter(vec![chunk("data: 0123"), chunk("456789"), chunk("\n\n")]);
        let end = pump_events(s, &mut dec, &tx, &mut cancel_rx).await;
        assert_eq!(end, PumpEnd::Failed("event stream line exceeds 8 bytes without a terminator".into()));
    }

    #[tokio::test]
    async fn closed_consumer_ends_pump() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let mut dec = SseDecoder::new();
        let s = stream::iter(vec![chunk("data: a\n\n")]);
        assert_eq!(pump_events(s, &mut dec, &tx, &mut cancel_rx).await, PumpEnd::Closed);
    }
}
