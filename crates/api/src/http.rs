#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use mirador_core::config::clamp_peek_limit;
use mirador_core::{ConsoleConfig, DashboardSummary, PeekResponse, PubSubState, QueueAttributes, QueueListResponse, ViewId};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    paths, ActionAck, CancelHandle, ConsoleApi, ConsoleError, ConsoleResult, CreateQueueRequest,
    CreateSubscriptionRequest, CreateTopicRequest, DeleteSubscriptionRequest, DeleteTopicRequest, PublishRequest,
    QueueActionRequest, SendMessageRequest, StartRedriveRequest, StreamEvent, StreamHandle, UpdateAttributesRequest,
};

/// Talks to the console backend over HTTP.
pub struct HttpApi {
    client: reqwest::Client,
    /// No overall timeout: event streams stay open indefinitely.
    stream_client: reqwest::Client,
    base: Url,
    cfg: ConsoleConfig,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

fn transport(e: reqwest::Error) -> ConsoleError {
    ConsoleError::Transport(e.to_string())
}

impl HttpApi {
    pub fn new(cfg: ConsoleConfig) -> ConsoleResult<Self> {
        let base = Url::parse(&cfg.base_url).map_err(|e| ConsoleError::Validation(format!("invalid base url {}: {e}", cfg.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ConsoleError::Validation(format!("invalid base url {}", cfg.base_url)));
        }
        let client = reqwest::Client::builder().timeout(cfg.request_timeout()).build().map_err(transport)?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(cfg.request_timeout())
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(transport)?;
        Ok(Self { client, stream_client, base, cfg })
    }

    pub fn config(&self) -> &ConsoleConfig { &self.cfg }

    /// Base URL with `segments` appended, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> ConsoleResult<Url> {
        let mut u = self.base.clone();
        u.path_segments_mut()
            .map_err(|_| ConsoleError::Validation(format!("invalid base url {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(u)
    }

    fn queue_url(&self, queue_id: &str, tail: &[&str]) -> ConsoleResult<Url> {
        let mut segs: Vec<&str> = paths::QUEUES.to_vec();
        segs.push(queue_id);
        segs.extend_from_slice(tail);
        self.url(&segs)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> ConsoleResult<T> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport)?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .map(|b| b.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ConsoleError::Backend { status: status.as_u16(), message });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &'static str) -> ConsoleResult<T> {
        let t0 = Instant::now();
        let res = match self.client.get(url).send().await {
            Ok(resp) => Self::decode(resp).await,
            Err(e) => Err(transport(e)),
        };
        let ms = t0.elapsed().as_millis();
        metrics::histogram!("api_request_ms", ms as f64);
        match &res {
            Ok(_) => debug!(took_ms = %ms, "api: {} ok", what),
            Err(e) => warn!(error = %e, took_ms = %ms, "api: {} failed", what),
        }
        res
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(&self, url: Url, body: &B, what: &'static str) -> ConsoleResult<T> {
        let t0 = Instant::now();
        let res = match self.client.post(url).json(body).send().await {
            Ok(resp) => Self::decode(resp).await,
            Err(e) => Err(transport(e)),
        };
        let ms = t0.elapsed().as_millis();
        metrics::histogram!("api_request_ms", ms as f64);
        match &res {
            Ok(_) => info!(took_ms = %ms, "api: {} ok", what),
            Err(e) => warn!(error = %e, took_ms = %ms, "api: {} failed", what),
        }
        res
    }

    async fn queue_action<B: Serialize + Sync>(&self, action: &'static str, body: &B) -> ConsoleResult<ActionAck> {
        let mut segs = paths::QUEUE_ACTIONS.to_vec();
        segs.push(action);
        self.post_json(self.url(&segs)?, body, action).await
    }

    async fn pubsub_action<B: Serialize + Sync>(&self, action: &'static str, body: &B) -> ConsoleResult<ActionAck> {
        let mut segs = paths::PUBSUB_ACTIONS.to_vec();
        segs.push(action);
        self.post_json(self.url(&segs)?, body, action).await
    }
}

#[async_trait::async_trait]
impl ConsoleApi for HttpApi {
    async fn dashboard(&self) -> ConsoleResult<DashboardSummary> {
        self.get_json(self.url(&paths::DASHBOARD)?, "dashboard").await
    }

    async fn queues(&self) -> ConsoleResult<QueueListResponse> {
        self.get_json(self.url(&paths::QUEUES)?, "queues").await
    }

    async fn pubsub(&self) -> ConsoleResult<PubSubState> {
        self.get_json(self.url(&paths::PUBSUB)?, "pubsub state").await
    }

    async fn queue_attributes(&self, queue_id: &str) -> ConsoleResult<QueueAttributes> {
        self.get_json(self.queue_url(queue_id, &["attributes"])?, "queue attributes").await
    }

    async fn peek_messages(&self, queue_id: &str, limit: usize) -> ConsoleResult<PeekResponse> {
        let mut url = self.queue_url(queue_id, &["messages", "peek"])?;
        url.query_pairs_mut().append_pair("limit", &clamp_peek_limit(limit).to_string());
        self.get_json(url, "peek").await
    }

    async fn create_queue(&self, req: &CreateQueueRequest) -> ConsoleResult<ActionAck> {
        self.queue_action("create-queue", req).await
    }

    async fn send_message(&self, req: &SendMessageRequest) -> ConsoleResult<ActionAck> {
        self.queue_action("send-message", req).await
    }

    async fn update_attributes(&self, req: &UpdateAttributesRequest) -> ConsoleResult<ActionAck> {
        self.queue_action("update-attributes", req).await
    }

    async fn purge_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck> {
        self.queue_action("purge-queue", &QueueActionRequest { queue_url: queue_url.to_string() }).await
    }

    async fn delete_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck> {
        self.queue_action("delete-queue", &QueueActionRequest { queue_url: queue_url.to_string() }).await
    }

    async fn start_redrive(&self, req: &StartRedriveRequest) -> ConsoleResult<ActionAck> {
        self.queue_action("start-redrive", req).await
    }

    async fn create_topic(&self, req: &CreateTopicRequest) -> ConsoleResult<ActionAck> {
        self.pubsub_action("create-topic", req).await
    }

    async fn delete_topic(&self, req: &DeleteTopicRequest) -> ConsoleResult<ActionAck> {
        self.pubsub_action("delete-topic", req).await
    }

    async fn create_subscription(&self, req: &CreateSubscriptionRequest) -> ConsoleResult<ActionAck> {
        self.pubsub_action("create-subscription", req).await
    }

    async fn delete_subscription(&self, req: &DeleteSubscriptionRequest) -> ConsoleResult<ActionAck> {
        self.pubsub_action("delete-subscription", req).await
    }

    async fn publish(&self, req: &PublishRequest) -> ConsoleResult<ActionAck> {
        self.pubsub_action("publish", req).await
    }

    async fn events(&self, view: ViewId) -> ConsoleResult<StreamHandle<StreamEvent>> {
        let mut url = self.url(&paths::EVENTS)?;
        url.query_pairs_mut().append_pair("view", view.as_str());
        info!(view = %view, "api: events start");
        let s = mirador_hub::spawn_event_stream(self.stream_client.clone(), url, self.cfg.stream_retry(), self.cfg.queue_cap);
        Ok(StreamHandle { rx: s.rx, cancel: CancelHandle::new(Some(s.cancel_tx), Some(s.task)) })
    }

    fn export_url(&self, service: &str) -> String {
        self.url(&["api", "services", service, "config", "export"])
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}/api/services/{}/config/export", self.cfg.base_url, service))
    }
}
