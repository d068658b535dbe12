//! Mirador session: the view controller that owns the active view, its single
//! server-push subscription, every keyed list with its overlay, and the drain
//! loop that applies background results.
//!
//! All mutation happens on the task that owns [`Session`]. Background work
//! (fetches, actions, the stream forwarder) only sends [`UiUpdate`]s, each
//! tagged with the [`Token`] current when it was issued; results whose token
//! no longer matches are dropped.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mirador_api::{ConsoleApi, ConsoleResult};
use mirador_core::{ConsoleConfig, ListId, Snapshot, ViewId};
use mirador_store::{Banner, BannerExpired, BannerSlot, ListState, OverlayStore, RenderedList};
use tokio::sync::mpsc;
use tracing::info;

pub mod forms;
pub mod model;
pub mod subscription;
mod tasks;
mod updates;

pub use forms::{CreateQueueForm, PublishForm, SendMessageForm, SubscriptionForm};
pub use model::{Alert, AlertTone, Followup, NullPresenter, Presenter, ResultTarget, StreamStatus, Surface, Token, UiUpdate};
pub use subscription::SubscriptionController;

pub struct Session {
    api: Arc<dyn ConsoleApi>,
    cfg: ConsoleConfig,
    active: ViewId,
    generation: u64,
    lists: HashMap<ListId, ListState>,
    latest: HashMap<ViewId, Snapshot>,
    subscription: SubscriptionController,
    alert: Option<Alert>,
    presenter: Box<dyn Presenter>,
    updates_tx: mpsc::UnboundedSender<UiUpdate>,
    updates_rx: mpsc::UnboundedReceiver<UiUpdate>,
    banner_rx: mpsc::UnboundedReceiver<BannerExpired>,
}

impl Session {
    /// A session with nothing mounted. Call [`Session::switch_view`] to start.
    pub fn new(api: Arc<dyn ConsoleApi>, cfg: ConsoleConfig, presenter: Box<dyn Presenter>) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (banner_tx, banner_rx) = mpsc::unbounded_channel();
        let lists = ListId::ALL
            .iter()
            .map(|&l| (l, ListState::new(OverlayStore::new(l, cfg.banner_delay(), banner_tx.clone()))))
            .collect();
        Self {
            api,
            cfg,
            active: ViewId::Dashboard,
            generation: 0,
            lists,
            latest: HashMap::new(),
            subscription: SubscriptionController::new(),
            alert: None,
            presenter,
            updates_tx,
            updates_rx,
            banner_rx,
        }
    }

    pub fn active_view(&self) -> ViewId { self.active }
    pub fn token(&self) -> Token { Token { view: self.active, generation: self.generation } }
    pub fn config(&self) -> &ConsoleConfig { &self.cfg }
    pub fn alert(&self) -> Option<&Alert> { self.alert.as_ref() }
    pub fn stream_status(&self) -> StreamStatus { self.subscription.status() }
    pub fn subscription(&self) -> &SubscriptionController { &self.subscription }
    pub fn latest(&self, view: ViewId) -> Option<&Snapshot> { self.latest.get(&view) }

    pub fn rendered(&self, list: ListId) -> Option<&RenderedList> {
        self.lists.get(&list).map(|l| &l.rendered)
    }

    pub fn overlay(&self, list: ListId) -> Option<&OverlayStore> {
        self.lists.get(&list).map(|l| &l.overlay)
    }

    pub fn banner(&self, list: ListId, key: &str, slot: BannerSlot) -> Option<&Banner> {
        self.lists.get(&list).and_then(|l| l.overlay.banner(key, slot))
    }

    pub fn export_url(&self, service: &str) -> String {
        self.api.export_url(service)
    }

    pub(crate) fn is_current(&self, token: Token) -> bool {
        token == self.token()
    }

    pub(crate) fn spawn_task<F>(&self, fut: F)
    where
        F: Future<Output = UiUpdate> + Send + 'static,
    {
        let tx = self.updates_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    pub(crate) fn set_alert(&mut self, alert: Option<Alert>) {
        self.alert = alert;
        self.presenter.present(Surface::Alert(self.alert.as_ref()));
    }

    pub(crate) fn present_banner(&mut self, list: ListId, key: &str, slot: BannerSlot) {
        let banner = self.lists.get(&list).and_then(|l| l.overlay.banner(key, slot));
        self.presenter.present(Surface::Banner { list, key, slot, banner });
    }

    /// Make `view` the active view: unmount the previous view's lists and
    /// their banners, clear the alert, fetch `view` in full and subscribe to
    /// its stream. Overlay state of every view is kept for the session.
    pub fn switch_view(&mut self, view: ViewId) {
        let prev = self.active;
        for list in prev.lists() {
            if let Some(st) = self.lists.get_mut(list) {
                st.overlay.cancel_banners();
                st.overlay.abandon_in_flight();
                st.rendered.clear();
            }
        }
        self.set_alert(None);
        self.generation += 1;
        self.active = view;
        info!(from = %prev, to = %view, generation = self.generation, "session: view switched");
        self.presenter.present(Surface::View(view));

        self.subscription.close();
        self.start_full_fetch();
        self.subscription.open(self.api.clone(), self.token(), self.updates_tx.clone(), self.cfg.stream_retry());
        self.presenter.present(Surface::Stream { view, status: self.subscription.status() });
    }

    /// Full fetch of the active view, applied like any stream frame.
    pub fn refresh(&mut self) {
        self.start_full_fetch();
    }

    /// Apply everything already queued without waiting. Returns how many
    /// messages were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut n = 0;
        while let Ok(ev) = self.banner_rx.try_recv() {
            self.on_banner_expired(ev);
            n += 1;
        }
        while let Ok(u) = self.updates_rx.try_recv() {
            self.handle(u);
            n += 1;
        }
        n
    }

    /// Wait for the next message from a background task or banner timer and
    /// apply it.
    pub async fn step(&mut self) -> bool {
        let next = tokio::select! {
            ev = self.banner_rx.recv() => ev.map(Next::Banner),
            u = self.updates_rx.recv() => u.map(Next::Update),
        };
        match next {
            Some(Next::Banner(ev)) => self.on_banner_expired(ev),
            Some(Next::Update(u)) => self.handle(u),
            None => return false,
        }
        true
    }

    /// Keep applying messages until none arrives for `quiet`.
    pub async fn settle(&mut self, quiet: Duration) -> usize {
        let mut n = 0;
        while let Ok(true) = tokio::time::timeout(quiet, self.step()).await {
            n += 1;
        }
        n
    }

    /// Stop the subscription and every banner timer.
    pub fn shutdown(&mut self) {
        self.subscription.close();
        for st in self.lists.values_mut() {
            st.overlay.cancel_banners();
        }
    }

    pub(crate) fn validation_failed<T>(&mut self, message: String) -> ConsoleResult<T> {
        self.set_alert(Some(Alert::error(message.clone())));
        Err(mirador_api::ConsoleError::Validation(message))
    }
}

enum Next {
    Banner(BannerExpired),
    Update(UiUpdate),
}
