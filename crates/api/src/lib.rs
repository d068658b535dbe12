//! Mirador API façade over the console backend.
//!
//! Frontends depend on the [`ConsoleApi`] trait only. [`HttpApi`] talks to a
//! running backend; [`MockApi`] is an in-memory stand-in for tests and demos.

#![forbid(unsafe_code)]

use mirador_core::{
    DashboardSummary, PeekResponse, PubSubState, QueueAttributeValues, QueueAttributes, QueueListResponse, Snapshot,
    ViewId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

pub mod http;
pub mod mock;

pub use http::HttpApi;
pub use mirador_hub::{SseEvent, StreamEvent};
pub use mock::{MockApi, RecordedCall};

/// Errors surfaced by the console API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ConsoleError {
    /// Rejected locally before any request was made.
    #[error("{0}")]
    Validation(String),
    /// The backend answered with an error payload; `message` is verbatim.
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Parse(String),
    /// The result belongs to a view that is no longer active.
    #[error("stale response")]
    Stale,
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

impl From<serde_json::Error> for ConsoleError {
    fn from(e: serde_json::Error) -> Self { ConsoleError::Parse(e.to_string()) }
}

/// Stops a background stream. Dropping the handle has the same effect.
#[derive(Default)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn new(tx: Option<oneshot::Sender<()>>, task: Option<tokio::task::JoinHandle<()>>) -> Self {
        Self { tx, task }
    }

    pub fn cancel(mut self) { self.stop(); }

    fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) { self.stop(); }
}

/// Generic stream handle used by streaming endpoints.
pub struct StreamHandle<T> { pub rx: mpsc::Receiver<T>, pub cancel: CancelHandle }

// ----------------- Request / response shapes -----------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQueueRequest {
    pub queue_name: String,
    pub is_fifo: bool,
    pub content_based_deduplication: bool,
    pub create_dlq: bool,
    pub dlq_max_receive_count: u32,
    pub visibility_timeout: i64,
    pub message_retention_period: i64,
    pub maximum_message_size: i64,
    pub delay_seconds: i64,
    pub receive_message_wait_time_seconds: i64,
}

impl CreateQueueRequest {
    pub fn attribute_values(&self) -> QueueAttributeValues {
        QueueAttributeValues {
            visibility_timeout: self.visibility_timeout,
            message_retention_period: self.message_retention_period,
            maximum_message_size: self.maximum_message_size,
            delay_seconds: self.delay_seconds,
            receive_message_wait_time_seconds: self.receive_message_wait_time_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub message_body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_group_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_deduplication_id: String,
    #[serde(default)]
    pub delay_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueActionRequest {
    pub queue_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAttributesRequest {
    pub queue_url: String,
    pub visibility_timeout: i64,
    pub message_retention_period: i64,
    pub maximum_message_size: i64,
    pub delay_seconds: i64,
    pub receive_message_wait_time_seconds: i64,
}

impl UpdateAttributesRequest {
    pub fn new(queue_url: impl Into<String>, v: &QueueAttributeValues) -> Self {
        Self {
            queue_url: queue_url.into(),
            visibility_timeout: v.visibility_timeout,
            message_retention_period: v.message_retention_period,
            maximum_message_size: v.maximum_message_size,
            delay_seconds: v.delay_seconds,
            receive_message_wait_time_seconds: v.receive_message_wait_time_seconds,
        }
    }

    pub fn values(&self) -> QueueAttributeValues {
        QueueAttributeValues {
            visibility_timeout: self.visibility_timeout,
            message_retention_period: self.message_retention_period,
            maximum_message_size: self.maximum_message_size,
            delay_seconds: self.delay_seconds,
            receive_message_wait_time_seconds: self.receive_message_wait_time_seconds,
        }
    }
}

pub const REDRIVE_MAX_MESSAGES_PER_SECOND: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRedriveRequest {
    pub queue_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination_queue_url: String,
    pub max_messages_per_second: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTopicRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTopicRequest {
    pub topic_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub auto_confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubscriptionRequest {
    pub subscription_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic_arn: String,
    #[serde(default)]
    pub subject: String,
    pub message: String,
}

/// Success payload of an action endpoint. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActionAck {
    pub fn ok() -> Self { Self { ok: true, ..Default::default() } }
}

/// REST paths relative to the backend base URL.
pub mod paths {
    pub const DASHBOARD: [&str; 3] = ["api", "dashboard", "summary"];
    pub const QUEUES: [&str; 4] = ["api", "services", "ess-queue-ess", "queues"];
    pub const PUBSUB: [&str; 4] = ["api", "services", "ess-enn-ess", "state"];
    pub const EVENTS: [&str; 2] = ["api", "events"];
    pub const QUEUE_ACTIONS: [&str; 4] = ["api", "services", "ess-queue-ess", "actions"];
    pub const PUBSUB_ACTIONS: [&str; 4] = ["api", "services", "ess-enn-ess", "actions"];

    /// Slash-joined display form, e.g. `/api/dashboard/summary`.
    pub fn display(segments: &[&str]) -> String {
        let mut out = String::new();
        for s in segments {
            out.push('/');
            out.push_str(s);
        }
        out
    }
}

/// Console backend surface.
#[async_trait::async_trait]
pub trait ConsoleApi: Send + Sync {
    async fn dashboard(&self) -> ConsoleResult<DashboardSummary>;

    async fn queues(&self) -> ConsoleResult<QueueListResponse>;

    async fn pubsub(&self) -> ConsoleResult<PubSubState>;

    /// Full snapshot for a view.
    async fn snapshot(&self, view: ViewId) -> ConsoleResult<Snapshot> {
        Ok(match view {
            ViewId::Dashboard => Snapshot::Dashboard(self.dashboard().await?),
            ViewId::Queues => Snapshot::Queues(self.queues().await?),
            ViewId::PubSub => Snapshot::PubSub(self.pubsub().await?),
        })
    }

    async fn queue_attributes(&self, queue_id: &str) -> ConsoleResult<QueueAttributes>;

    /// Non-mutating peek of up to `limit` messages (clamped to [1, 100]).
    async fn peek_messages(&self, queue_id: &str, limit: usize) -> ConsoleResult<PeekResponse>;

    async fn create_queue(&self, req: &CreateQueueRequest) -> ConsoleResult<ActionAck>;

    async fn send_message(&self, req: &SendMessageRequest) -> ConsoleResult<ActionAck>;

    async fn update_attributes(&self, req: &UpdateAttributesRequest) -> ConsoleResult<ActionAck>;

    async fn purge_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck>;

    async fn delete_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck>;

    async fn start_redrive(&self, req: &StartRedriveRequest) -> ConsoleResult<ActionAck>;

    async fn create_topic(&self, req: &CreateTopicRequest) -> ConsoleResult<ActionAck>;

    async fn delete_topic(&self, req: &DeleteTopicRequest) -> ConsoleResult<ActionAck>;

    async fn create_subscription(&self, req: &CreateSubscriptionRequest) -> ConsoleResult<ActionAck>;

    async fn delete_subscription(&self, req: &DeleteSubscriptionRequest) -> ConsoleResult<ActionAck>;

    async fn publish(&self, req: &PublishRequest) -> ConsoleResult<ActionAck>;

    /// Open the server-push stream for `view`. The stream reconnects on its
    /// own until cancelled.
    async fn events(&self, view: ViewId) -> ConsoleResult<StreamHandle<StreamEvent>>;

    /// Download URL for a service's exported configuration.
    fn export_url(&self, service: &str) -> String;
}
