#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use mirador_api::{ConsoleApi, StreamEvent};
use mirador_core::ViewId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{StreamStatus, Token, UiUpdate};

/// Owns the one live server-push subscription. Opening always closes the
/// previous subscription first, so two are never alive at once.
#[derive(Default)]
pub struct SubscriptionController {
    token: Option<Token>,
    status: StreamStatus,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionController {
    pub fn new() -> Self { Self::default() }

    pub fn view(&self) -> Option<ViewId> { self.token.map(|t| t.view) }
    pub fn token(&self) -> Option<Token> { self.token }
    pub fn status(&self) -> StreamStatus { self.status }
    pub fn is_open(&self) -> bool { self.task.is_some() }

    /// Track a transport notification. Returns the new status when it changed.
    pub(crate) fn observe(&mut self, ev: &StreamEvent) -> Option<StreamStatus> {
        let next = match ev {
            StreamEvent::Connecting => StreamStatus::Connecting,
            StreamEvent::Open => StreamStatus::Connected,
            StreamEvent::Error(_) => StreamStatus::Retrying,
            StreamEvent::Message(_) => return None,
        };
        if next == self.status {
            return None;
        }
        self.status = next;
        Some(next)
    }

    /// Subscribe to `token.view`, forwarding every transport event into `tx`
    /// tagged with `token`. A failed subscribe is retried every `retry` until
    /// it succeeds or the subscription is closed.
    pub fn open(&mut self, api: Arc<dyn ConsoleApi>, token: Token, tx: mpsc::UnboundedSender<UiUpdate>, retry: Duration) {
        self.close();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        info!(view = %token.view, generation = token.generation, "stream: subscribe");
        metrics::counter!("stream_subscriptions_total", 1u64);
        let task = tokio::spawn(async move {
            let t0 = Instant::now();
            let mut attempt: u32 = 0;
            let mut handle = loop {
                attempt += 1;
                let opened = tokio::select! {
                    _ = &mut stop_rx => return,
                    r = api.events(token.view) => r,
                };
                match opened {
                    Ok(h) => break h,
                    Err(e) => {
                        warn!(view = %token.view, attempt, error = %e, "stream: subscribe failed");
                        metrics::counter!("stream_subscribe_failures_total", 1u64);
                        if tx.send(UiUpdate::Stream { token, event: StreamEvent::Error(e.to_string()) }).is_err() {
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = tokio::time::sleep(retry) => {}
                }
                if tx.send(UiUpdate::Stream { token, event: StreamEvent::Connecting }).is_err() {
                    return;
                }
            };
            debug!(view = %token.view, attempt, took_ms = %t0.elapsed().as_millis(), "stream: handle ready");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    ev = handle.rx.recv() => match ev {
                        Some(event) => {
                            if tx.send(UiUpdate::Stream { token, event }).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            // dropping the handle stops the transport
            drop(handle);
            info!(view = %token.view, took_ms = %t0.elapsed().as_millis(), "stream: forwarder ended");
        });
        self.token = Some(token);
        self.status = StreamStatus::Connecting;
        self.stop = Some(stop_tx);
        self.task = Some(task);
    }

    pub fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            if let Some(t) = self.token {
                info!(view = %t.view, "stream: closed");
            }
        }
        self.token = None;
        self.status = StreamStatus::Disconnected;
    }
}

impl Drop for SubscriptionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirador_api::MockApi;

    const RETRY: Duration = Duration::from_millis(3_000);

    #[tokio::test]
    async fn reopen_leaves_one_stream() {
        let mock = Arc::new(MockApi::new());
        let api: Arc<dyn ConsoleApi> = mock.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = SubscriptionController::new();
        sub.open(api.clone(), Token { view: ViewId::Queues, generation: 1 }, tx.clone(), RETRY);
        assert!(matches!(rx.recv().await, Some(UiUpdate::Stream { event: StreamEvent::Connecting, .. })));
        sub.open(api, Token { view: ViewId::Dashboard, generation: 2 }, tx, RETRY);
        assert_eq!(sub.view(), Some(ViewId::Dashboard));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.active_streams(), vec![ViewId::Dashboard]);
        sub.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mock.active_streams().is_empty());
        assert_eq!(sub.status(), StreamStatus::Disconnected);
    }

    #[test]
    fn observe_reports_transitions_only() {
        let mut sub = SubscriptionController::new();
        assert_eq!(sub.observe(&StreamEvent::Connecting), Some(StreamStatus::Connecting));
        assert_eq!(sub.observe(&StreamEvent::Connecting), None);
        assert_eq!(sub.observe(&StreamEvent::Open), Some(StreamStatus::Connected));
        assert_eq!(sub.observe(&StreamEvent::Error("reset".into())), Some(StreamStatus::Retrying));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_retried_until_it_opens() {
        let mock = Arc::new(MockApi::new());
        mock.fail("events?view=ess-queue-ess", 503, "down");
        let api: Arc<dyn ConsoleApi> = mock.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = SubscriptionController::new();
        sub.open(api, Token { view: ViewId::Queues, generation: 1 }, tx, RETRY);

        assert!(matches!(rx.recv().await, Some(UiUpdate::Stream { event: StreamEvent::Error(m), .. }) if m == "down"));
        mock.clear_failures();
        let mut seen = Vec::new();
        while let Some(UiUpdate::Stream { event, .. }) = rx.recv().await {
            let open = event == StreamEvent::Open;
            seen.push(event);
            if open {
                break;
            }
        }
        assert_eq!(seen, vec![StreamEvent::Connecting, StreamEvent::Connecting, StreamEvent::Open]);
        assert_eq!(mock.active_streams(), vec![ViewId::Queues]);
        assert_eq!(mock.calls_to("events?view=ess-queue-ess").len(), 2);
        sub.close();
    }
}
