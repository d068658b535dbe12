//! Mirador core types: views, natural keys, render fields and snapshots.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod attributes;
pub mod config;
pub mod models;

pub use attributes::{AttributeMap, AttributeRange, QueueAttributeValues, ATTRIBUTE_RANGES};
pub use config::ConsoleConfig;
pub use models::*;

/// Stable natural key of an entity (queue URL, topic ARN, service name, ...).
pub type EntityKey = String;

/// Entry representing one rendered field: `(FieldName, RenderedValue)`.
pub type FieldEntry = (String, String);

/// Rendered fields of one entity, in display order.
pub type FieldSet = SmallVec<[FieldEntry; 8]>;

/// A snapshot entity that can be placed in a keyed list.
///
/// `key` correlates the same logical entity across snapshots; `fields` are the
/// cheap, individually updatable values shown for it.
pub trait Entity: Clone + Send + Sync {
    fn key(&self) -> &str;
    fn fields(&self) -> FieldSet;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown view: {0}")]
pub struct UnknownView(pub String);

/// Top-level console views. The string form is what the backend accepts on
/// `/api/events?view=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewId {
    #[serde(rename = "dashboard")]
    Dashboard,
    #[serde(rename = "ess-queue-ess")]
    Queues,
    #[serde(rename = "ess-enn-ess")]
    PubSub,
}

impl ViewId {
    pub const ALL: [ViewId; 3] = [ViewId::Dashboard, ViewId::Queues, ViewId::PubSub];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewId::Dashboard => "dashboard",
            ViewId::Queues => "ess-queue-ess",
            ViewId::PubSub => "ess-enn-ess",
        }
    }

    /// Keyed lists rendered while this view is active.
    pub fn lists(&self) -> &'static [ListId] {
        match self {
            ViewId::Dashboard => &[ListId::Services],
            ViewId::Queues => &[ListId::Queues],
            ViewId::PubSub => &[ListId::Topics, ListId::Subscriptions],
        }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewId {
    type Err = UnknownView;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "dashboard" => Ok(ViewId::Dashboard),
            "ess-queue-ess" | "queues" => Ok(ViewId::Queues),
            "ess-enn-ess" | "pubsub" | "topics" => Ok(ViewId::PubSub),
            other => Err(UnknownView(other.to_string())),
        }
    }
}

/// Identifies one keyed list inside a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListId {
    Services,
    Queues,
    Topics,
    Subscriptions,
}

impl ListId {
    pub const ALL: [ListId; 4] = [ListId::Services, ListId::Queues, ListId::Topics, ListId::Subscriptions];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListId::Services => "services",
            ListId::Queues => "queues",
            ListId::Topics => "topics",
            ListId::Subscriptions => "subscriptions",
        }
    }

    pub fn view(&self) -> ViewId {
        match self {
            ListId::Services => ViewId::Dashboard,
            ListId::Queues => ViewId::Queues,
            ListId::Topics | ListId::Subscriptions => ViewId::PubSub,
        }
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full-state payload for one view, as returned by its snapshot endpoint and
/// carried by its `state` stream frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Dashboard(DashboardSummary),
    Queues(QueueListResponse),
    PubSub(PubSubState),
}

impl Snapshot {
    pub fn view(&self) -> ViewId {
        match self {
            Snapshot::Dashboard(_) => ViewId::Dashboard,
            Snapshot::Queues(_) => ViewId::Queues,
            Snapshot::PubSub(_) => ViewId::PubSub,
        }
    }

    /// Decode a frame payload for `view`. The view decides the shape; the
    /// payload itself carries no discriminator.
    pub fn decode(view: ViewId, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match view {
            ViewId::Dashboard => Snapshot::Dashboard(serde_json::from_str(data)?),
            ViewId::Queues => Snapshot::Queues(serde_json::from_str(data)?),
            ViewId::PubSub => Snapshot::PubSub(serde_json::from_str(data)?),
        })
    }
}

pub mod prelude {
    pub use super::{
        AttributeMap, ConsoleConfig, Entity, EntityKey, FieldEntry, FieldSet, ListId, Snapshot,
        ViewId,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_ids_round_trip_through_wire_names() {
        for v in ViewId::ALL {
            assert_eq!(v.as_str().parse::<ViewId>().unwrap(), v);
            let json = serde_json::to_string(&v).unwrap();
            assert_eq!(json, format!("\"{}\"", v.as_str()));
        }
        assert!("s3".parse::<ViewId>().is_err());
    }

    #[test]
    fn every_list_belongs_to_its_view() {
        for l in ListId::ALL {
            assert!(l.view().lists().contains(&l));
        }
    }

    #[test]
    fn decode_uses_the_view_shape() {
        let snap = Snapshot::decode(ViewId::Queues, r#"{"service":"ess-queue-ess","queues":[]}"#).unwrap();
        assert_eq!(snap.view(), ViewId::Queues);
        assert!(Snapshot::decode(ViewId::Queues, "{not json").is_err());
        let dash = Snapshot::decode(ViewId::Dashboard, r#"{"services":[]}"#).unwrap();
        assert_eq!(dash.view(), ViewId::Dashboard);
    }
}
