#![forbid(unsafe_code)]

use std::fmt;

use mirador_api::StreamEvent;
use mirador_core::{AttributeMap, ListId, PeekMessage, QueueAttributeValues, QueueAttributes, Snapshot, ViewId};
use mirador_store::{Banner, BannerSlot, EditSession, RenderPlan};
use serde::Serialize;

/// Staleness token captured when an asynchronous operation is issued. A
/// result is applied only if the session still holds the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Token {
    pub view: ViewId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTone {
    Info,
    Error,
}

/// The single global alert line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub tone: AlertTone,
    pub message: String,
}

impl Alert {
    pub fn info(message: impl Into<String>) -> Self { Self { tone: AlertTone::Info, message: message.into() } }
    pub fn error(message: impl Into<String>) -> Self { Self { tone: AlertTone::Error, message: message.into() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Retrying,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Disconnected => "disconnected",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Connected => "connected",
            StreamStatus::Retrying => "retrying",
        }
    }

    /// Status line text, e.g. `connected (ess-queue-ess)`.
    pub fn label(&self, view: ViewId) -> String {
        format!("{} ({})", self.as_str(), view)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an action's outcome is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultTarget {
    Alert,
    Banner { list: ListId, key: String, slot: BannerSlot },
}

/// What to do after an action succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Full fetch of the active view.
    Reload,
    /// Re-fetch one queue's attributes and peek.
    RefreshDetail(String),
}

/// Messages from background tasks to the session loop.
#[derive(Debug)]
pub enum UiUpdate {
    Snapshot { token: Token, snapshot: Snapshot },
    SnapshotFailed { token: Token, message: String },
    Stream { token: Token, event: StreamEvent },
    Attributes { token: Token, key: String, seq: u64, result: Result<QueueAttributes, String>, announce: bool },
    Peek { token: Token, key: String, result: Result<Vec<PeekMessage>, String> },
    ActionDone { token: Token, target: ResultTarget, result: Result<String, String>, followup: Followup },
    AttributesSaved { token: Token, key: String, values: QueueAttributeValues, result: Result<(), String> },
}

impl UiUpdate {
    pub fn token(&self) -> Token {
        match self {
            UiUpdate::Snapshot { token, .. }
            | UiUpdate::SnapshotFailed { token, .. }
            | UiUpdate::Stream { token, .. }
            | UiUpdate::Attributes { token, .. }
            | UiUpdate::Peek { token, .. }
            | UiUpdate::ActionDone { token, .. }
            | UiUpdate::AttributesSaved { token, .. } => *token,
        }
    }
}

/// One presentation change. Borrowed views into session state; a presenter
/// copies out what it needs.
#[derive(Debug)]
pub enum Surface<'a> {
    /// A view was mounted; its lists start empty.
    View(ViewId),
    Plan { list: ListId, plan: &'a RenderPlan },
    Alert(Option<&'a Alert>),
    Stream { view: ViewId, status: StreamStatus },
    Banner { list: ListId, key: &'a str, slot: BannerSlot, banner: Option<&'a Banner> },
    Attributes { key: &'a str, attributes: Option<&'a AttributeMap>, edit: Option<&'a EditSession> },
    Peek { key: &'a str, messages: &'a [PeekMessage] },
}

/// Turns surface changes into something visible.
pub trait Presenter: Send {
    fn present(&mut self, surface: Surface<'_>);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _surface: Surface<'_>) {}
}
