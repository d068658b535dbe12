//! Per-key status banners with auto-hide timers.
//!
//! Each `(key, slot)` pair has at most one visible banner and at most one
//! pending hide. Setting a new state always aborts the previous hide first;
//! expiry notifications carry a sequence number so a hide that raced with a
//! newer banner is recognised and ignored.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use mirador_core::ListId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerState {
    Idle,
    Loading,
    Success,
    Error,
}

impl BannerState {
    pub fn auto_hides(&self) -> bool {
        matches!(self, BannerState::Success | BannerState::Error)
    }
}

/// Independent banner surfaces inside one entity's detail panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerSlot {
    Attributes,
    Peek,
}

impl BannerSlot {
    fn default_message(&self, state: BannerState) -> &'static str {
        match (self, state) {
            (_, BannerState::Idle) => "",
            (BannerSlot::Attributes, BannerState::Loading) => "Loading queue attributes...",
            (BannerSlot::Attributes, BannerState::Success) => "Attributes updated.",
            (BannerSlot::Attributes, BannerState::Error) => "Failed to load attributes.",
            (BannerSlot::Peek, BannerState::Loading) => "Loading latest peek messages...",
            (BannerSlot::Peek, BannerState::Success) => "Peek messages updated.",
            (BannerSlot::Peek, BannerState::Error) => "Failed to load peek messages.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub state: BannerState,
    pub message: String,
    #[serde(skip)]
    pub seq: u64,
}

/// Delivered on the expiry channel when a hide timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerExpired {
    pub list: ListId,
    pub key: String,
    pub slot: BannerSlot,
    pub seq: u64,
}

struct PendingHide {
    seq: u64,
    task: JoinHandle<()>,
}

/// Timer manager for one keyed list.
pub struct BannerTimers {
    list: ListId,
    delay: Duration,
    next_seq: u64,
    banners: HashMap<(String, BannerSlot), Banner>,
    pending: HashMap<(String, BannerSlot), PendingHide>,
    expired_tx: mpsc::UnboundedSender<BannerExpired>,
}

impl BannerTimers {
    pub fn new(list: ListId, delay: Duration, expired_tx: mpsc::UnboundedSender<BannerExpired>) -> Self {
        Self { list, delay, next_seq: 0, banners: HashMap::new(), pending: HashMap::new(), expired_tx }
    }

    pub fn get(&self, key: &str, slot: BannerSlot) -> Option<&Banner> {
        self.banners.get(&(key.to_string(), slot))
    }

    pub fn pending_count(&self) -> usize { self.pending.len() }
    pub fn visible_count(&self) -> usize { self.banners.len() }

    /// Show `state` for `(key, slot)`. An empty message falls back to the
    /// slot's stock text. Must be called from within a tokio runtime when the
    /// state auto-hides.
    pub fn set_status(&mut self, key: &str, slot: BannerSlot, state: BannerState, message: impl Into<String>) {
        let id = (key.to_string(), slot);
        if let Some(prev) = self.pending.remove(&id) {
            prev.task.abort();
        }
        if state == BannerState::Idle {
            self.banners.remove(&id);
            return;
        }
        let mut message = message.into();
        if message.is_empty() {
            message = slot.default_message(state).to_string();
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        self.banners.insert(id.clone(), Banner { state, message, seq });

        if state.auto_hides() {
            let tx = self.expired_tx.clone();
            let delay = self.delay;
            let ev = BannerExpired { list: self.list, key: key.to_string(), slot, seq };
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(ev);
            });
            self.pending.insert(id, PendingHide { seq, task });
        }
    }

    /// Apply a fired hide. Returns false when it was superseded.
    pub fn on_expired(&mut self, ev: &BannerExpired) -> bool {
        let id = (ev.key.clone(), ev.slot);
        match self.pending.get(&id) {
            Some(p) if p.seq == ev.seq => {
                self.pending.remove(&id);
                self.banners.remove(&id);
                true
            }
            _ => {
                debug!(key = %ev.key, seq = ev.seq, "banner: stale expiry ignored");
                false
            }
        }
    }

    /// Drop banners and pending hides for one key.
    pub fn cancel_key(&mut self, key: &str) {
        for slot in [BannerSlot::Attributes, BannerSlot::Peek] {
            let id = (key.to_string(), slot);
            if let Some(p) = self.pending.remove(&id) {
                p.task.abort();
            }
            self.banners.remove(&id);
        }
    }

    /// Drop every banner of this list without firing any hide.
    pub fn cancel_all(&mut self) {
        for (_, p) in self.pending.drain() {
            p.task.abort();
        }
        self.banners.clear();
    }

    /// Keys that currently own a banner.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.banners.keys().map(|(k, _)| k.as_str())
    }
}

impl Drop for BannerTimers {
    fn drop(&mut self) {
        for (_, p) in self.pending.drain() {
            p.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers() -> (BannerTimers, mpsc::UnboundedReceiver<BannerExpired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BannerTimers::new(ListId::Queues, Duration::from_millis(3000), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn error_then_success_leaves_one_hide() {
        let (mut t, mut rx) = timers();
        t.set_status("k", BannerSlot::Attributes, BannerState::Error, "m1");
        t.set_status("k", BannerSlot::Attributes, BannerState::Success, "m2");
        assert_eq!(t.pending_count(), 1);
        let b = t.get("k", BannerSlot::Attributes).unwrap();
        assert_eq!((b.state, b.message.as_str()), (BannerState::Success, "m2"));

        tokio::time::sleep(Duration::from_millis(3001)).await;
        let ev = rx.recv().await.unwrap();
        assert!(t.on_expired(&ev));
        assert!(t.get("k", BannerSlot::Attributes).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn loading_is_persistent_and_idle_clears() {
        let (mut t, _rx) = timers();
        t.set_status("k", BannerSlot::Peek, BannerState::Loading, "");
        assert_eq!(t.pending_count(), 0);
        assert_eq!(t.get("k", BannerSlot::Peek).unwrap().message, "Loading latest peek messages...");
        t.set_status("k", BannerSlot::Peek, BannerState::Idle, "");
        assert!(t.get("k", BannerSlot::Peek).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_expiry_is_ignored() {
        let (mut t, _rx) = timers();
        t.set_status("k", BannerSlot::Attributes, BannerState::Success, "old");
        let stale = BannerExpired { list: ListId::Queues, key: "k".into(), slot: BannerSlot::Attributes, seq: 1 };
        t.set_status("k", BannerSlot::Attributes, BannerState::Error, "new");
        assert!(!t.on_expired(&stale));
        assert_eq!(t.get("k", BannerSlot::Attributes).unwrap().message, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn slots_are_independent() {
        let (mut t, _rx) = timers();
        t.set_status("k", BannerSlot::Attributes, BannerState::Success, "");
        t.set_status("k", BannerSlot::Peek, BannerState::Success, "");
        assert_eq!(t.pending_count(), 2);
        t.cancel_key("k");
        assert_eq!(t.pending_count(), 0);
        assert_eq!(t.visible_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_fires_nothing() {
        let (mut t, mut rx) = timers();
        t.set_status("a", BannerSlot::Attributes, BannerState::Success, "");
        t.set_status("b", BannerSlot::Peek, BannerState::Error, "");
        t.cancel_all();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(rx.try_recv().is_err());
    }
}
