#![forbid(unsafe_code)]

use std::time::Instant;

use mirador_api::{ConsoleError, ConsoleResult};
use mirador_core::{ListId, QueueSummary, Snapshot, ViewId};
use mirador_store::{BannerSlot, BannerState, RenderPlan};
use tracing::{debug, info};

use crate::{Session, Surface, UiUpdate};

impl Session {
    /// Queue summary for `key` from the latest queues snapshot.
    pub(crate) fn queue(&self, key: &str) -> Option<&QueueSummary> {
        match self.latest.get(&ViewId::Queues) {
            Some(Snapshot::Queues(q)) => q.queues.iter().rev().find(|q| q.queue_url == key),
            _ => None,
        }
    }

    /// `key` must be a row currently shown in `list` of the active view.
    pub(crate) fn require_row(&self, list: ListId, key: &str) -> ConsoleResult<()> {
        let shown = list.view() == self.active && self.lists.get(&list).map(|l| l.rendered.contains(key)).unwrap_or(false);
        if shown {
            Ok(())
        } else {
            Err(ConsoleError::Validation(format!("{key} is not shown in {list}")))
        }
    }

    /// Push the overlay's mode for `key` to the presenter if it changed.
    pub(crate) fn present_mode(&mut self, list: ListId, key: &str) {
        let Some(st) = self.lists.get_mut(&list) else { return };
        if let Some(op) = st.refresh_mode(key) {
            let plan = RenderPlan { ops: vec![op] };
            self.presenter.present(Surface::Plan { list, plan: &plan });
        }
    }

    pub(crate) fn present_attributes(&mut self, key: &str) {
        let ov = self.lists.get(&ListId::Queues).map(|l| &l.overlay);
        let attributes = ov.and_then(|o| o.attributes(key));
        let edit = ov.and_then(|o| o.edit_session(key));
        self.presenter.present(Surface::Attributes { key, attributes, edit });
    }

    /// Expand or collapse a row. Expanding a queue refreshes its attributes and
    /// peek in the background. Returns the new expansion state.
    pub fn toggle(&mut self, list: ListId, key: &str) -> ConsoleResult<bool> {
        self.require_row(list, key)?;
        let expanded = match self.lists.get_mut(&list) {
            Some(st) => st.overlay.toggle(key),
            None => return Ok(false),
        };
        debug!(list = %list, key, expanded, "session: toggled");
        self.present_mode(list, key);
        if expanded && list == ListId::Queues {
            self.fetch_attributes(key, true)?;
            self.refresh_peek(key)?;
        }
        Ok(expanded)
    }

    /// Re-fetch one queue's attributes, showing the loading banner.
    pub fn refresh_attributes(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_row(ListId::Queues, key)?;
        self.fetch_attributes(key, true)
    }

    /// Issue an attribute fetch. With `announce` the attribute banner goes
    /// through loading and success; without, only a failure is shown.
    pub(crate) fn fetch_attributes(&mut self, key: &str, announce: bool) -> ConsoleResult<()> {
        let queue_id = match self.queue(key) {
            Some(q) => q.queue_id.clone(),
            None => return Err(ConsoleError::Validation(format!("unknown queue {key}"))),
        };
        let token = self.token();
        let Some(st) = self.lists.get_mut(&ListId::Queues) else { return Ok(()) };
        let seq = st.overlay.issue_attributes_fetch(key);
        if announce {
            st.overlay.set_status(key, BannerSlot::Attributes, BannerState::Loading, "");
            self.present_banner(ListId::Queues, key, BannerSlot::Attributes);
        }
        let api = self.api.clone();
        let key = key.to_string();
        self.spawn_task(async move {
            let t0 = Instant::now();
            let result = api.queue_attributes(&queue_id).await.map_err(|e| e.to_string());
            info!(queue_id = %queue_id, seq, ok = result.is_ok(), took_ms = %t0.elapsed().as_millis(), "detail: attributes fetched");
            UiUpdate::Attributes { token, key, seq, result, announce }
        });
        Ok(())
    }

    /// Peek the first messages of one queue without consuming them.
    pub fn refresh_peek(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_row(ListId::Queues, key)?;
        let queue_id = match self.queue(key) {
            Some(q) => q.queue_id.clone(),
            None => return Err(ConsoleError::Validation(format!("unknown queue {key}"))),
        };
        if let Some(st) = self.lists.get_mut(&ListId::Queues) {
            st.overlay.set_status(key, BannerSlot::Peek, BannerState::Loading, "");
        }
        self.present_banner(ListId::Queues, key, BannerSlot::Peek);
        let token = self.token();
        let api = self.api.clone();
        let limit = self.cfg.peek_limit;
        let key = key.to_string();
        self.spawn_task(async move {
            let t0 = Instant::now();
            let result = api.peek_messages(&queue_id, limit).await.map(|r| r.messages).map_err(|e| e.to_string());
            info!(queue_id = %queue_id, ok = result.is_ok(), took_ms = %t0.elapsed().as_millis(), "detail: peek fetched");
            UiUpdate::Peek { token, key, result }
        });
        Ok(())
    }
}
