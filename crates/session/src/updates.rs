#![forbid(unsafe_code)]

use mirador_api::StreamEvent;
use mirador_core::{Entity, ListId, PeekMessage, QueueAttributeValues, QueueAttributes, Snapshot};
use mirador_store::{BannerExpired, BannerSlot, BannerState, StoreOutcome};
use tracing::{debug, info, warn};

use crate::{Alert, Followup, ResultTarget, Session, Surface, UiUpdate};

/// Frame name carrying a full snapshot.
pub const STATE_EVENT: &str = "state";

impl Session {
    /// Apply one background result. Anything issued under a different token
    /// (an earlier view or an earlier mount of this view) is dropped.
    pub fn handle(&mut self, update: UiUpdate) {
        let token = update.token();
        if !self.is_current(token) {
            if matches!(update, UiUpdate::Stream { .. }) {
                metrics::counter!("stream_frames_stale_total", 1u64);
            } else {
                metrics::counter!("session_results_stale_total", 1u64);
            }
            debug!(view = %token.view, generation = token.generation, active = %self.active, "session: stale update dropped");
            return;
        }
        match update {
            UiUpdate::Snapshot { snapshot, .. } => self.apply_snapshot(snapshot),
            UiUpdate::SnapshotFailed { message, .. } => self.set_alert(Some(Alert::error(message))),
            UiUpdate::Stream { event, .. } => self.on_stream_event(event),
            UiUpdate::Attributes { key, seq, result, announce, .. } => self.on_attributes(key, seq, result, announce),
            UiUpdate::Peek { key, result, .. } => self.on_peek(key, result),
            UiUpdate::ActionDone { target, result, followup, .. } => self.on_action_done(target, result, followup),
            UiUpdate::AttributesSaved { key, values, result, .. } => self.on_attributes_saved(key, values, result),
        }
    }

    fn sync_list<E: Entity>(&mut self, list: ListId, items: &[E]) {
        let Some(st) = self.lists.get_mut(&list) else { return };
        let plan = st.sync(items);
        if !plan.is_empty() {
            self.presenter.present(Surface::Plan { list, plan: &plan });
        }
    }

    /// One reconciliation pass per list of the snapshot's view. Passes run to
    /// completion before the next update is looked at.
    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let view = snapshot.view();
        if view != self.active {
            debug!(view = %view, active = %self.active, "session: snapshot for inactive view ignored");
            return;
        }
        match &snapshot {
            Snapshot::Dashboard(d) => self.sync_list(ListId::Services, &d.services),
            Snapshot::Queues(q) => self.sync_list(ListId::Queues, &q.queues),
            Snapshot::PubSub(p) => {
                self.sync_list(ListId::Topics, &p.topics);
                self.sync_list(ListId::Subscriptions, &p.subscriptions);
            }
        }
        self.latest.insert(view, snapshot);
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Message(ev) if ev.event == STATE_EVENT => match Snapshot::decode(self.active, &ev.data) {
                Ok(snapshot) => self.apply_snapshot(snapshot),
                Err(e) => {
                    warn!(view = %self.active, error = %e, "stream: bad frame");
                    self.set_alert(Some(Alert::error(format!("Failed to parse stream data: {e}"))));
                }
            },
            StreamEvent::Message(ev) => debug!(event = %ev.event, "stream: unhandled event"),
            other => {
                if let StreamEvent::Error(reason) = &other {
                    warn!(view = %self.active, error = %reason, "stream: transport error");
                }
                if let Some(status) = self.subscription.observe(&other) {
                    self.presenter.present(Surface::Stream { view: self.active, status });
                }
            }
        }
    }

    fn shown(&self, list: ListId, key: &str) -> bool {
        self.lists.get(&list).map(|l| l.rendered.contains(key)).unwrap_or(false)
    }

    fn on_attributes(&mut self, key: String, seq: u64, result: Result<QueueAttributes, String>, announce: bool) {
        if !self.shown(ListId::Queues, &key) {
            debug!(key = %key, "detail: attributes for unmounted row dropped");
            return;
        }
        let Some(st) = self.lists.get_mut(&ListId::Queues) else { return };
        match result {
            Ok(attrs) => {
                let outcome = st.overlay.store_attributes(&key, seq, attrs.attributes);
                if matches!(outcome, StoreOutcome::Superseded | StoreOutcome::Vanished) {
                    return;
                }
                if announce {
                    st.overlay.set_status(&key, BannerSlot::Attributes, BannerState::Success, "");
                    self.present_banner(ListId::Queues, &key, BannerSlot::Attributes);
                }
                self.present_mode(ListId::Queues, &key);
                self.present_attributes(&key);
            }
            Err(message) => {
                if st.overlay.attributes_failed(&key, seq) {
                    st.overlay.set_status(&key, BannerSlot::Attributes, BannerState::Error, message);
                    self.present_banner(ListId::Queues, &key, BannerSlot::Attributes);
                }
            }
        }
    }

    fn on_peek(&mut self, key: String, result: Result<Vec<PeekMessage>, String>) {
        if !self.shown(ListId::Queues, &key) {
            debug!(key = %key, "detail: peek for unmounted row dropped");
            return;
        }
        let Some(st) = self.lists.get_mut(&ListId::Queues) else { return };
        match result {
            Ok(messages) => {
                if !st.overlay.store_peek(&key, messages) {
                    return;
                }
                st.overlay.set_status(&key, BannerSlot::Peek, BannerState::Success, "");
                let messages = st.overlay.get(&key).and_then(|e| e.peek.as_deref()).unwrap_or_default();
                self.presenter.present(Surface::Peek { key: &key, messages });
            }
            Err(message) => st.overlay.set_status(&key, BannerSlot::Peek, BannerState::Error, message),
        }
        self.present_banner(ListId::Queues, &key, BannerSlot::Peek);
    }

    fn on_action_done(&mut self, target: ResultTarget, result: Result<String, String>, followup: Followup) {
        let ok = result.is_ok();
        match target {
            ResultTarget::Banner { list, key, slot } if self.shown(list, &key) => {
                let (state, message) = match result {
                    Ok(m) => (BannerState::Success, m),
                    Err(m) => (BannerState::Error, m),
                };
                if let Some(st) = self.lists.get_mut(&list) {
                    st.overlay.set_status(&key, slot, state, message);
                }
                self.present_banner(list, &key, slot);
            }
            _ => {
                let alert = match result {
                    Ok(m) => Alert::info(m),
                    Err(m) => Alert::error(m),
                };
                self.set_alert(Some(alert));
            }
        }
        if !ok {
            return;
        }
        match followup {
            Followup::None => {}
            Followup::Reload => self.start_full_fetch(),
            Followup::RefreshDetail(key) => {
                if !self.shown(ListId::Queues, &key) {
                    return;
                }
                if let Err(e) = self.fetch_attributes(&key, false).and_then(|_| self.refresh_peek(&key)) {
                    warn!(key = %key, error = %e, "detail: refresh after action failed");
                }
            }
        }
    }

    /// The backend accepted or refused an attribute update. On success the
    /// submitted values go into the cache before the confirming re-fetch is
    /// issued, so the re-fetch result lands last and wins.
    fn on_attributes_saved(&mut self, key: String, values: QueueAttributeValues, result: Result<(), String>) {
        let Some(st) = self.lists.get_mut(&ListId::Queues) else { return };
        if st.overlay.edit_session(&key).is_none() {
            debug!(key = %key, "edit: save result without a session dropped");
            return;
        }
        match result {
            Ok(()) => {
                st.overlay.commit_edit(&key, &values);
                st.overlay.set_status(&key, BannerSlot::Attributes, BannerState::Success, "Queue attributes saved.");
                info!(key = %key, "edit: saved");
                self.present_banner(ListId::Queues, &key, BannerSlot::Attributes);
                self.present_mode(ListId::Queues, &key);
                self.present_attributes(&key);
                if let Err(e) = self.fetch_attributes(&key, false) {
                    warn!(key = %key, error = %e, "edit: confirming fetch not issued");
                }
            }
            Err(message) => {
                st.overlay.reject_edit(&key);
                st.overlay.set_status(&key, BannerSlot::Attributes, BannerState::Error, message);
                self.present_banner(ListId::Queues, &key, BannerSlot::Attributes);
                self.present_attributes(&key);
            }
        }
    }

    pub(crate) fn on_banner_expired(&mut self, ev: BannerExpired) {
        let fired = match self.lists.get_mut(&ev.list) {
            Some(st) => st.overlay.on_banner_expired(&ev),
            None => false,
        };
        if fired {
            self.present_banner(ev.list, &ev.key, ev.slot);
        }
    }
}
