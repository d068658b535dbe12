//! In-memory backend for tests and demos.
//!
//! Behaves like a small console backend: actions mutate the held state, so a
//! later snapshot or pushed frame reflects them. Every request is recorded.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use mirador_core::config::clamp_peek_limit;
use mirador_core::{
    AttributeMap, DashboardSummary, PeekMessage, PeekResponse, PubSubState, QueueAttributes, QueueListResponse,
    QueueSummary, Snapshot, SubscriptionSummary, TopicSummary, ViewId,
};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    paths, ActionAck, CancelHandle, ConsoleApi, ConsoleError, ConsoleResult, CreateQueueRequest,
    CreateSubscriptionRequest, CreateTopicRequest, DeleteSubscriptionRequest, DeleteTopicRequest, PublishRequest,
    QueueActionRequest, SendMessageRequest, SseEvent, StartRedriveRequest, StreamEvent, StreamHandle,
    UpdateAttributesRequest,
};

/// One request as the mock received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

type Adjuster = Box<dyn Fn(&mut AttributeMap) + Send>;

#[derive(Default)]
struct MockState {
    dashboard: DashboardSummary,
    queues: QueueListResponse,
    pubsub: PubSubState,
    attributes: HashMap<String, AttributeMap>,
    peek: HashMap<String, Vec<PeekMessage>>,
    failures: HashMap<String, (u16, String)>,
    latency: HashMap<String, Duration>,
    adjust: Option<Adjuster>,
    calls: Vec<RecordedCall>,
    streams: Vec<(ViewId, mpsc::Sender<StreamEvent>)>,
}

pub struct MockApi {
    state: Mutex<MockState>,
    host: String,
}

impl Default for MockApi {
    fn default() -> Self {
        Self { state: Mutex::new(MockState::default()), host: "http://localhost:9324/000000000000".to_string() }
    }
}

fn attrs_for(v: &mirador_core::QueueAttributeValues, fifo: bool) -> AttributeMap {
    let mut m = AttributeMap::new();
    m.apply_values(v);
    m.insert("FifoQueue", if fifo { "true" } else { "false" });
    m.insert("ApproximateNumberOfMessages", "0");
    m
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- seeding ----

    pub fn with_dashboard(self, d: DashboardSummary) -> Self {
        self.lock().dashboard = d;
        self
    }

    pub fn with_pubsub(self, p: PubSubState) -> Self {
        self.lock().pubsub = p;
        self
    }

    /// Add a queue with default attributes. Returns its natural key.
    pub fn add_queue(&self, name: &str, is_fifo: bool) -> String {
        let url = format!("{}/{}", self.host, name);
        let mut st = self.lock();
        st.queues.service = "ess-queue-ess".to_string();
        st.queues.queues.push(QueueSummary {
            queue_name: name.to_string(),
            queue_url: url.clone(),
            is_fifo,
            queue_id: name.to_string(),
            ..Default::default()
        });
        st.attributes.insert(name.to_string(), attrs_for(&Default::default(), is_fifo));
        url
    }

    pub fn set_counts(&self, queue_url: &str, visible: u64, in_flight: u64, delayed: u64) {
        let mut st = self.lock();
        if let Some(q) = st.queues.queues.iter_mut().find(|q| q.queue_url == queue_url) {
            q.visible_count = visible;
            q.not_visible_count = in_flight;
            q.delayed_count = delayed;
        }
    }

    pub fn set_attribute(&self, queue_id: &str, key: &str, value: &str) {
        self.lock().attributes.entry(queue_id.to_string()).or_default().insert(key, value);
    }

    pub fn set_peek(&self, queue_id: &str, messages: Vec<PeekMessage>) {
        self.lock().peek.insert(queue_id.to_string(), messages);
    }

    /// Server-side adjustment applied to attributes after every update (e.g.
    /// rounding), so a confirming re-fetch can disagree with what was sent.
    pub fn set_attribute_adjuster(&self, f: impl Fn(&mut AttributeMap) + Send + 'static) {
        self.lock().adjust = Some(Box::new(f));
    }

    /// Make requests whose path ends with `path_suffix` fail with `message`.
    pub fn fail(&self, path_suffix: &str, status: u16, message: &str) {
        self.lock().failures.insert(path_suffix.to_string(), (status, message.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Delay responses for requests whose path ends with `path_suffix`.
    pub fn set_latency(&self, path_suffix: &str, d: Duration) {
        self.lock().latency.insert(path_suffix.to_string(), d);
    }

    // ---- inspection ----

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, path_suffix: &str) -> Vec<RecordedCall> {
        self.lock().calls.iter().filter(|c| c.path.ends_with(path_suffix)).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Streams whose consumer is still attached.
    pub fn active_streams(&self) -> Vec<ViewId> {
        let mut st = self.lock();
        st.streams.retain(|(_, tx)| !tx.is_closed());
        st.streams.iter().map(|(v, _)| *v).collect()
    }

    pub fn queue_snapshot(&self) -> QueueListResponse {
        self.lock().queues.clone()
    }

    // ---- server push ----

    fn push(&self, view: ViewId, ev: StreamEvent) -> usize {
        let st = self.lock();
        st.streams
            .iter()
            .filter(|(v, tx)| *v == view && tx.try_send(ev.clone()).is_ok())
            .count()
    }

    /// Push a raw `state` frame to open streams of `view`. Returns how many
    /// streams accepted it.
    pub fn push_raw(&self, view: ViewId, data: &str) -> usize {
        self.push(view, StreamEvent::Message(SseEvent { event: "state".into(), data: data.to_string(), id: None }))
    }

    /// Push the mock's current state for `view` as a frame.
    pub fn push_state(&self, view: ViewId) -> usize {
        let snap = {
            let st = self.lock();
            match view {
                ViewId::Dashboard => Snapshot::Dashboard(st.dashboard.clone()),
                ViewId::Queues => Snapshot::Queues(st.queues.clone()),
                ViewId::PubSub => Snapshot::PubSub(st.pubsub.clone()),
            }
        };
        let data = serde_json::to_string(&snap).unwrap_or_default();
        self.push_raw(view, &data)
    }

    pub fn push_stream_error(&self, view: ViewId, message: &str) -> usize {
        self.push(view, StreamEvent::Error(message.to_string()))
    }

    pub fn push_stream_event(&self, view: ViewId, ev: StreamEvent) -> usize {
        self.push(view, ev)
    }

    // ---- request plumbing ----

    async fn enter<B: Serialize>(&self, method: &'static str, path: String, body: Option<&B>) -> ConsoleResult<()> {
        let (latency, failure) = {
            let mut st = self.lock();
            st.calls.push(RecordedCall { method, path: path.clone(), body: body.and_then(|b| serde_json::to_value(b).ok()) });
            let latency = st.latency.iter().find(|(k, _)| path.ends_with(k.as_str())).map(|(_, d)| *d);
            let failure = st.failures.iter().find(|(k, _)| path.ends_with(k.as_str())).map(|(_, f)| f.clone());
            (latency, failure)
        };
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        match failure {
            Some((status, message)) => Err(ConsoleError::Backend { status, message }),
            None => Ok(()),
        }
    }

    async fn get(&self, path: String) -> ConsoleResult<()> {
        self.enter::<()>("GET", path, None).await
    }

    async fn post<B: Serialize + Sync>(&self, segs: &[&str], action: &str, body: &B) -> ConsoleResult<()> {
        let path = format!("{}/{}", paths::display(segs), action);
        self.enter("POST", path, Some(body)).await
    }

    fn queue_by_url<'a>(st: &'a mut MockState, url: &str) -> ConsoleResult<&'a mut QueueSummary> {
        st.queues
            .queues
            .iter_mut()
            .find(|q| q.queue_url == url)
            .ok_or_else(|| ConsoleError::Backend { status: 404, message: format!("queue not found: {url}") })
    }
}

#[async_trait::async_trait]
impl ConsoleApi for MockApi {
    async fn dashboard(&self) -> ConsoleResult<DashboardSummary> {
        self.get(paths::display(&paths::DASHBOARD)).await?;
        Ok(self.lock().dashboard.clone())
    }

    async fn queues(&self) -> ConsoleResult<QueueListResponse> {
        self.get(paths::display(&paths::QUEUES)).await?;
        Ok(self.lock().queues.clone())
    }

    async fn pubsub(&self) -> ConsoleResult<PubSubState> {
        self.get(paths::display(&paths::PUBSUB)).await?;
        Ok(self.lock().pubsub.clone())
    }

    async fn queue_attributes(&self, queue_id: &str) -> ConsoleResult<QueueAttributes> {
        self.get(format!("{}/{}/attributes", paths::display(&paths::QUEUES), queue_id)).await?;
        let st = self.lock();
        let q = st
            .queues
            .queues
            .iter()
            .find(|q| q.queue_id == queue_id)
            .ok_or_else(|| ConsoleError::Backend { status: 404, message: format!("queue not found: {queue_id}") })?;
        Ok(QueueAttributes {
            queue_id: q.queue_id.clone(),
            queue_name: q.queue_name.clone(),
            queue_url: q.queue_url.clone(),
            attributes: st.attributes.get(queue_id).cloned().unwrap_or_default(),
            fetched_at: None,
            is_fifo: q.is_fifo,
            has_dlq: q.has_dlq,
            is_dlq: q.is_dlq,
            redrive_from: String::new(),
        })
    }

    async fn peek_messages(&self, queue_id: &str, limit: usize) -> ConsoleResult<PeekResponse> {
        let limit = clamp_peek_limit(limit);
        self.get(format!("{}/{}/messages/peek?limit={}", paths::display(&paths::QUEUES), queue_id, limit)).await?;
        let st = self.lock();
        let mut messages = st.peek.get(queue_id).cloned().unwrap_or_default();
        messages.truncate(limit);
        Ok(PeekResponse { queue_id: queue_id.to_string(), messages, ..Default::default() })
    }

    async fn create_queue(&self, req: &CreateQueueRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "create-queue", req).await?;
        if self.lock().queues.queues.iter().any(|q| q.queue_name == req.queue_name) {
            return Err(ConsoleError::Backend { status: 502, message: format!("queue already exists: {}", req.queue_name) });
        }
        self.add_queue(&req.queue_name, req.is_fifo);
        let values = req.attribute_values();
        let mut ack = ActionAck { queue_name: Some(req.queue_name.clone()), ..ActionAck::ok() };
        let mut st = self.lock();
        st.attributes.insert(req.queue_name.clone(), attrs_for(&values, req.is_fifo));
        if req.create_dlq {
            let dlq = match req.queue_name.strip_suffix(".fifo") {
                Some(stem) => format!("{stem}-dlq.fifo"),
                None => format!("{}-dlq", req.queue_name),
            };
            drop(st);
            let dlq_url = self.add_queue(&dlq, req.is_fifo);
            let mut st = self.lock();
            if let Ok(q) = Self::queue_by_url(&mut st, &dlq_url) {
                q.is_dlq = true;
            }
            if let Some(q) = st.queues.queues.iter_mut().find(|q| q.queue_name == req.queue_name) {
                q.has_dlq = true;
            }
            ack.dlq_name = Some(dlq);
        }
        Ok(ack)
    }

    async fn send_message(&self, req: &SendMessageRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "send-message", req).await?;
        let mut st = self.lock();
        let q = Self::queue_by_url(&mut st, &req.queue_url)?;
        if q.is_fifo && req.message_group_id.is_empty() {
            return Err(ConsoleError::Backend { status: 400, message: "MessageGroupId is required".into() });
        }
        q.visible_count += 1;
        Ok(ActionAck::ok())
    }

    async fn update_attributes(&self, req: &UpdateAttributesRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "update-attributes", req).await?;
        let mut st = self.lock();
        let id = Self::queue_by_url(&mut st, &req.queue_url)?.queue_id.clone();
        let mut attrs = st.attributes.remove(&id).unwrap_or_default();
        attrs.apply_values(&req.values());
        if let Some(adjust) = st.adjust.as_ref() {
            adjust(&mut attrs);
        }
        st.attributes.insert(id, attrs);
        Ok(ActionAck::ok())
    }

    async fn purge_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "purge-queue", &QueueActionRequest { queue_url: queue_url.to_string() }).await?;
        let mut st = self.lock();
        let q = Self::queue_by_url(&mut st, queue_url)?;
        q.visible_count = 0;
        q.not_visible_count = 0;
        q.delayed_count = 0;
        let id = q.queue_id.clone();
        st.peek.remove(&id);
        Ok(ActionAck::ok())
    }

    async fn delete_queue(&self, queue_url: &str) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "delete-queue", &QueueActionRequest { queue_url: queue_url.to_string() }).await?;
        let mut st = self.lock();
        let id = Self::queue_by_url(&mut st, queue_url)?.queue_id.clone();
        st.queues.queues.retain(|q| q.queue_url != queue_url);
        st.attributes.remove(&id);
        st.peek.remove(&id);
        Ok(ActionAck::ok())
    }

    async fn start_redrive(&self, req: &StartRedriveRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::QUEUE_ACTIONS, "start-redrive", req).await?;
        let mut st = self.lock();
        let q = Self::queue_by_url(&mut st, &req.queue_url)?;
        if !q.is_dlq {
            return Err(ConsoleError::Backend { status: 400, message: "source queue is not a dead-letter queue".into() });
        }
        Ok(ActionAck { task_handle: Some(format!("task-{}", q.queue_id)), ..ActionAck::ok() })
    }

    async fn create_topic(&self, req: &CreateTopicRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::PUBSUB_ACTIONS, "create-topic", req).await?;
        let mut st = self.lock();
        st.pubsub.service = "ess-enn-ess".to_string();
        st.pubsub.topics.push(TopicSummary {
            topic_arn: format!("arn:aws:sns:us-east-1:000000000000:{}", req.name),
            display_name: req.name.clone(),
            fifo_topic: req.name.ends_with(".fifo"),
            ..Default::default()
        });
        st.pubsub.stats.topics = st.pubsub.topics.len() as u64;
        Ok(ActionAck::ok())
    }

    async fn delete_topic(&self, req: &DeleteTopicRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::PUBSUB_ACTIONS, "delete-topic", req).await?;
        let mut st = self.lock();
        st.pubsub.topics.retain(|t| t.topic_arn != req.topic_arn);
        st.pubsub.subscriptions.retain(|s| s.topic_arn != req.topic_arn);
        st.pubsub.stats.topics = st.pubsub.topics.len() as u64;
        st.pubsub.stats.subscriptions = st.pubsub.subscriptions.len() as u64;
        Ok(ActionAck::ok())
    }

    async fn create_subscription(&self, req: &CreateSubscriptionRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::PUBSUB_ACTIONS, "create-subscription", req).await?;
        let mut st = self.lock();
        let Some(topic) = st.pubsub.topics.iter_mut().find(|t| t.topic_arn == req.topic_arn) else {
            return Err(ConsoleError::Backend { status: 404, message: format!("topic not found: {}", req.topic_arn) });
        };
        topic.subscription_count += 1;
        let n = st.pubsub.subscriptions.len() + 1;
        st.pubsub.subscriptions.push(SubscriptionSummary {
            subscription_arn: format!("{}:sub-{n}", req.topic_arn),
            topic_arn: req.topic_arn.clone(),
            protocol: req.protocol.clone(),
            endpoint: req.endpoint.clone(),
            status: if req.auto_confirm { "confirmed" } else { "pending" }.to_string(),
            created_at: None,
        });
        st.pubsub.stats.subscriptions = st.pubsub.subscriptions.len() as u64;
        Ok(ActionAck::ok())
    }

    async fn delete_subscription(&self, req: &DeleteSubscriptionRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::PUBSUB_ACTIONS, "delete-subscription", req).await?;
        let mut st = self.lock();
        let topic = st
            .pubsub
            .subscriptions
            .iter()
            .find(|s| s.subscription_arn == req.subscription_arn)
            .map(|s| s.topic_arn.clone());
        st.pubsub.subscriptions.retain(|s| s.subscription_arn != req.subscription_arn);
        if let Some(arn) = topic {
            if let Some(t) = st.pubsub.topics.iter_mut().find(|t| t.topic_arn == arn) {
                t.subscription_count = t.subscription_count.saturating_sub(1);
            }
        }
        st.pubsub.stats.subscriptions = st.pubsub.subscriptions.len() as u64;
        Ok(ActionAck::ok())
    }

    async fn publish(&self, req: &PublishRequest) -> ConsoleResult<ActionAck> {
        self.post(&paths::PUBSUB_ACTIONS, "publish", req).await?;
        Ok(ActionAck::ok())
    }

    async fn events(&self, view: ViewId) -> ConsoleResult<StreamHandle<StreamEvent>> {
        self.get(format!("{}?view={}", paths::display(&paths::EVENTS), view.as_str())).await?;
        let (tx, rx) = mpsc::channel(64);
        let _ = tx.try_send(StreamEvent::Connecting);
        let _ = tx.try_send(StreamEvent::Open);
        self.lock().streams.push((view, tx));
        Ok(StreamHandle { rx, cancel: CancelHandle::default() })
    }

    fn export_url(&self, service: &str) -> String {
        format!("/api/services/{service}/config/export")
    }
}
