//! Snapshot entities as pushed by the backend. Plain data, no behaviour beyond
//! exposing a natural key and render fields.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use crate::attributes::AttributeMap;
use crate::{Entity, FieldSet};

fn field(name: &str, value: impl ToString) -> (String, String) {
    (name.to_string(), value.to_string())
}

// ---------------- Queues ----------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSummary {
    pub queue_name: String,
    pub queue_url: String,
    pub visible_count: u64,
    pub not_visible_count: u64,
    pub delayed_count: u64,
    pub is_fifo: bool,
    pub has_dlq: bool,
    pub is_dlq: bool,
    pub queue_id: String,
    pub messages: Vec<serde_json::Value>,
}

impl Entity for QueueSummary {
    fn key(&self) -> &str {
        &self.queue_url
    }

    fn fields(&self) -> FieldSet {
        smallvec![
            field("visible", self.visible_count),
            field("in_flight", self.not_visible_count),
            field("delayed", self.delayed_count),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueListResponse {
    pub service: String,
    pub queues: Vec<QueueSummary>,
}

/// One peeked message. Only the displayed keys are typed; everything else the
/// backend sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeekMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub receive_count: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeekResponse {
    pub queue_id: String,
    pub queue_name: String,
    pub queue_url: String,
    pub messages: Vec<PeekMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueAttributes {
    pub queue_id: String,
    pub queue_name: String,
    pub queue_url: String,
    pub attributes: AttributeMap,
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_fifo: bool,
    pub has_dlq: bool,
    pub is_dlq: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub redrive_from: String,
}

// ---------------- Topics / subscriptions ----------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSummary {
    pub topic_arn: String,
    pub display_name: String,
    pub fifo_topic: bool,
    pub subscription_count: u64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for TopicSummary {
    fn key(&self) -> &str {
        &self.topic_arn
    }

    fn fields(&self) -> FieldSet {
        smallvec![
            field("display_name", &self.display_name),
            field("subscriptions", self.subscription_count),
            field("fifo", if self.fifo_topic { "yes" } else { "no" }),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSummary {
    pub subscription_arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for SubscriptionSummary {
    fn key(&self) -> &str {
        &self.subscription_arn
    }

    fn fields(&self) -> FieldSet {
        smallvec![
            field("topic", &self.topic_arn),
            field("protocol", &self.protocol),
            field("endpoint", &self.endpoint),
            field("status", &self.status),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubStats {
    pub topics: u64,
    pub subscriptions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubState {
    pub service: String,
    pub topics: Vec<TopicSummary>,
    pub subscriptions: Vec<SubscriptionSummary>,
    pub stats: PubSubStats,
}

// ---------------- Dashboard ----------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStat {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSummary {
    pub name: String,
    pub status: String,
    pub stats: Vec<ServiceStat>,
}

impl Entity for ServiceSummary {
    fn key(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> FieldSet {
        let mut out: FieldSet = smallvec![field("status", &self.status)];
        for s in &self.stats {
            out.push(field(&s.label, s.value));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSummary {
    pub services: Vec<ServiceSummary>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------- Storage / edge ----------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSummary {
    pub name: String,
    pub object_count: u64,
    pub size_bytes: u64,
    pub versioning: bool,
}

impl Entity for BucketSummary {
    fn key(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> FieldSet {
        smallvec![
            field("objects", self.object_count),
            field("size", self.size_bytes),
            field("versioning", if self.versioning { "enabled" } else { "off" }),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginSummary {
    pub origin_id: String,
    pub domain_name: String,
    pub status: String,
    pub enabled: bool,
}

impl Entity for OriginSummary {
    fn key(&self) -> &str {
        &self.origin_id
    }

    fn fields(&self) -> FieldSet {
        smallvec![
            field("domain", &self.domain_name),
            field("status", &self.status),
            field("enabled", self.enabled),
        ]
    }
}
