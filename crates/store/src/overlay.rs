//! Overlay store: UI-only state per entity key for one keyed list.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use mirador_core::{AttributeMap, ListId, PeekMessage, QueueAttributeValues};
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tracing::debug;

use crate::banner::{Banner, BannerExpired, BannerSlot, BannerState, BannerTimers};
use crate::edit::{EditError, EditSession};
use crate::reconcile::RowMode;

#[derive(Debug, Clone, Default)]
pub struct OverlayEntry {
    pub expanded: bool,
    /// Present while the attribute form is editable (including while a submit
    /// is in flight).
    pub edit: Option<EditSession>,
    /// Last successfully fetched attributes.
    pub attributes: Option<AttributeMap>,
    /// A refresh that landed while editing; applied when the edit ends
    /// without a commit.
    pub deferred_attributes: Option<AttributeMap>,
    pub peek: Option<Vec<PeekMessage>>,
    /// An attribute fetch for this key is outstanding.
    pub attributes_pending: bool,
    /// Sequence of the most recently issued attribute fetch.
    pub attributes_seq: u64,
    /// Enter editing as soon as the outstanding fetch lands.
    pub edit_requested: bool,
}

impl OverlayEntry {
    pub fn edit_mode(&self) -> bool { self.edit.is_some() }

    pub fn mode(&self) -> RowMode {
        RowMode { expanded: self.expanded, editing: self.edit_mode() }
    }
}

/// What happened to a fetched attribute map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The cache now holds the result.
    Replaced,
    /// Editing; parked until the edit ends.
    Deferred,
    /// A newer fetch was issued since; the result was dropped.
    Superseded,
    /// The key was reaped while the fetch was out; the result was dropped.
    Vanished,
}

/// What [`OverlayStore::begin_edit`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginEdit {
    /// Editing now, draft seeded from the cache.
    Started,
    /// Already editing; nothing changed.
    AlreadyEditing,
    /// No usable cache yet; the caller must fetch attributes. Editing starts
    /// when they land.
    NeedsFetch,
    /// A fetch is already outstanding; editing starts when it lands.
    Waiting,
}

pub struct OverlayStore {
    list: ListId,
    entries: HashMap<String, OverlayEntry>,
    banners: BannerTimers,
}

impl OverlayStore {
    pub fn new(list: ListId, banner_delay: Duration, expired_tx: mpsc::UnboundedSender<BannerExpired>) -> Self {
        Self { list, entries: HashMap::new(), banners: BannerTimers::new(list, banner_delay, expired_tx) }
    }

    /// A store whose banner expiries go nowhere. Useful for pure reconciliation.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(ListId::Queues, Duration::from_millis(3000), tx)
    }

    pub fn list(&self) -> ListId { self.list }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, key: &str) -> Option<&OverlayEntry> {
        self.entries.get(key)
    }

    /// Entries are created lazily on first reference.
    pub fn entry_mut(&mut self, key: &str) -> &mut OverlayEntry {
        self.entries.entry(key.to_string()).or_default()
    }

    pub fn mode_of(&self, key: &str) -> RowMode {
        self.entries.get(key).map(OverlayEntry::mode).unwrap_or_default()
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.expanded).unwrap_or(false)
    }

    pub fn is_editing(&self, key: &str) -> bool {
        self.entries.get(key).map(OverlayEntry::edit_mode).unwrap_or(false)
    }

    /// Flip `expanded`. Returns true on the transition to expanded, which is
    /// the caller's cue to refresh the entity's attributes and peek.
    pub fn toggle(&mut self, key: &str) -> bool {
        let e = self.entry_mut(key);
        e.expanded = !e.expanded;
        e.expanded
    }

    /// Delete every entry whose key is not live, cancelling its banners first.
    pub fn reap_orphans<'a, I>(&mut self, live: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: FxHashSet<&str> = live.into_iter().collect();
        let mut dead: Vec<String> = self.entries.keys().filter(|k| !live.contains(k.as_str())).cloned().collect();
        for k in self.banners.keys() {
            if !live.contains(k) && !dead.iter().any(|d| d == k) {
                dead.push(k.to_string());
            }
        }
        for k in &dead {
            self.banners.cancel_key(k);
            self.entries.remove(k);
        }
        if !dead.is_empty() {
            debug!(list = %self.list, reaped = dead.len(), "overlay: reaped orphans");
        }
        dead.len()
    }

    // ---- banners ----

    pub fn set_status(&mut self, key: &str, slot: BannerSlot, state: BannerState, message: impl Into<String>) {
        self.banners.set_status(key, slot, state, message);
    }

    pub fn banner(&self, key: &str, slot: BannerSlot) -> Option<&Banner> {
        self.banners.get(key, slot)
    }

    pub fn on_banner_expired(&mut self, ev: &BannerExpired) -> bool {
        self.banners.on_expired(ev)
    }

    pub fn cancel_banners(&mut self) {
        self.banners.cancel_all();
    }

    pub fn pending_hides(&self) -> usize {
        self.banners.pending_count()
    }

    // ---- attributes / edit session ----

    pub fn attributes(&self, key: &str) -> Option<&AttributeMap> {
        self.entries.get(key).and_then(|e| e.attributes.as_ref())
    }

    /// Record that an attribute fetch was issued and return its sequence
    /// number. Only the result carrying the latest number is accepted.
    pub fn issue_attributes_fetch(&mut self, key: &str) -> u64 {
        let e = self.entry_mut(key);
        e.attributes_pending = true;
        e.attributes_seq += 1;
        e.attributes_seq
    }

    /// Store fetched attributes. While editing, the cache is left alone and the
    /// result is parked in `deferred_attributes`. `seq` 0 bypasses the
    /// sequence check.
    pub fn store_attributes(&mut self, key: &str, seq: u64, attrs: AttributeMap) -> StoreOutcome {
        let Some(e) = self.entries.get_mut(key) else {
            debug!(key, seq, "overlay: attributes for reaped key dropped");
            return StoreOutcome::Vanished;
        };
        if seq != 0 && seq != e.attributes_seq {
            debug!(key, seq, latest = e.attributes_seq, "overlay: superseded attributes dropped");
            return StoreOutcome::Superseded;
        }
        e.attributes_pending = false;
        if e.edit.is_some() {
            e.deferred_attributes = Some(attrs);
            return StoreOutcome::Deferred;
        }
        e.attributes = Some(attrs);
        if e.edit_requested {
            e.edit_requested = false;
            if let Some(cache) = e.attributes.as_ref() {
                e.edit = Some(EditSession::begin(cache));
            }
        }
        StoreOutcome::Replaced
    }

    /// An attribute fetch failed; clears any queued edit request. Returns
    /// false when the failure belongs to a superseded fetch or a reaped key.
    pub fn attributes_failed(&mut self, key: &str, seq: u64) -> bool {
        let Some(e) = self.entries.get_mut(key) else { return false };
        if seq != 0 && seq != e.attributes_seq {
            return false;
        }
        e.attributes_pending = false;
        e.edit_requested = false;
        true
    }

    /// The view went away with requests in flight: forget outstanding
    /// fetches and return in-flight submits to plain editing. Results that
    /// arrive later fail the sequence check.
    pub fn abandon_in_flight(&mut self) {
        for e in self.entries.values_mut() {
            if e.attributes_pending {
                e.attributes_pending = false;
                e.attributes_seq += 1;
            }
            e.edit_requested = false;
            if let Some(s) = e.edit.as_mut() {
                s.reject();
            }
        }
    }

    pub fn begin_edit(&mut self, key: &str) -> BeginEdit {
        let e = self.entry_mut(key);
        if e.edit.is_some() {
            return BeginEdit::AlreadyEditing;
        }
        if e.attributes_pending {
            e.edit_requested = true;
            return BeginEdit::Waiting;
        }
        match e.attributes.as_ref() {
            Some(cache) if !cache.is_empty() => {
                e.edit = Some(EditSession::begin(cache));
                BeginEdit::Started
            }
            _ => {
                e.edit_requested = true;
                BeginEdit::NeedsFetch
            }
        }
    }

    pub fn edit_session(&self, key: &str) -> Option<&EditSession> {
        self.entries.get(key).and_then(|e| e.edit.as_ref())
    }

    pub fn set_draft(&mut self, key: &str, name: &str, value: impl Into<String>) -> Result<(), EditError> {
        match self.entries.get_mut(key).and_then(|e| e.edit.as_mut()) {
            Some(s) => s.set_field(name, value),
            None => Err(EditError::NotEditing),
        }
    }

    pub fn submit_edit(&mut self, key: &str) -> Result<QueueAttributeValues, EditError> {
        match self.entries.get_mut(key).and_then(|e| e.edit.as_mut()) {
            Some(s) => s.submit(),
            None => Err(EditError::NotEditing),
        }
    }

    /// Backend accepted the update: write the submitted values into the cache
    /// and leave edit mode. Any refresh parked during the edit is discarded;
    /// the caller's confirming re-fetch supersedes it.
    pub fn commit_edit(&mut self, key: &str, values: &QueueAttributeValues) {
        let e = self.entry_mut(key);
        e.edit = None;
        e.deferred_attributes = None;
        e.attributes.get_or_insert_with(AttributeMap::new).apply_values(values);
    }

    /// Backend refused the update; the draft stays.
    pub fn reject_edit(&mut self, key: &str) {
        if let Some(s) = self.entries.get_mut(key).and_then(|e| e.edit.as_mut()) {
            s.reject();
        }
    }

    /// Leave edit mode without submitting. A refresh parked during the edit
    /// becomes the cache. Refused while a submit is in flight.
    pub fn cancel_edit(&mut self, key: &str) -> Result<(), EditError> {
        let Some(e) = self.entries.get_mut(key) else { return Ok(()) };
        match e.edit.as_ref() {
            Some(s) if s.in_flight() => return Err(EditError::InFlight),
            Some(_) => {}
            None => {
                e.edit_requested = false;
                return Ok(());
            }
        }
        e.edit = None;
        if let Some(d) = e.deferred_attributes.take() {
            e.attributes = Some(d);
        }
        Ok(())
    }

    /// Returns false when the key was reaped and nothing was stored.
    pub fn store_peek(&mut self, key: &str, messages: Vec<PeekMessage>) -> bool {
        match self.entries.get_mut(key) {
            Some(e) => {
                e.peek = Some(messages);
                true
            }
            None => false,
        }
    }
}
