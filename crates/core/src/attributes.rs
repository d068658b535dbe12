//! Queue attribute map and the closed range table for editable attributes.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Inclusive numeric bounds for one editable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeRange {
    pub name: &'static str,
    pub min: i64,
    pub max: i64,
    /// Value used when creating a queue without an explicit setting.
    pub default: i64,
}

pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
pub const MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
pub const MAXIMUM_MESSAGE_SIZE: &str = "MaximumMessageSize";
pub const DELAY_SECONDS: &str = "DelaySeconds";
pub const RECEIVE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";

/// Editable attributes in form order.
pub const ATTRIBUTE_RANGES: [AttributeRange; 5] = [
    AttributeRange { name: VISIBILITY_TIMEOUT, min: 0, max: 43_200, default: 30 },
    AttributeRange { name: MESSAGE_RETENTION_PERIOD, min: 60, max: 1_209_600, default: 345_600 },
    AttributeRange { name: MAXIMUM_MESSAGE_SIZE, min: 1_024, max: 262_144, default: 262_144 },
    AttributeRange { name: DELAY_SECONDS, min: 0, max: 900, default: 0 },
    AttributeRange { name: RECEIVE_WAIT_TIME_SECONDS, min: 0, max: 20, default: 0 },
];

/// Keys shown in the attribute panel, in display order.
pub const DISPLAY_KEYS: [&str; 12] = [
    VISIBILITY_TIMEOUT,
    MESSAGE_RETENTION_PERIOD,
    MAXIMUM_MESSAGE_SIZE,
    DELAY_SECONDS,
    RECEIVE_WAIT_TIME_SECONDS,
    "FifoQueue",
    "ContentBasedDeduplication",
    "RedrivePolicy",
    "RedriveAllowPolicy",
    "ApproximateNumberOfMessages",
    "ApproximateNumberOfMessagesNotVisible",
    "ApproximateNumberOfMessagesDelayed",
];

pub const DEFAULT_DLQ_MAX_RECEIVE_COUNT: u32 = 3;

pub fn range_for(name: &str) -> Option<&'static AttributeRange> {
    ATTRIBUTE_RANGES.iter().find(|r| r.name == name)
}

pub fn is_editable(name: &str) -> bool {
    range_for(name).is_some()
}

impl AttributeRange {
    /// Parse and bounds-check a raw form value.
    pub fn check(&self, raw: &str) -> Result<i64, String> {
        let v: i64 = raw
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a number", self.name))?;
        if v < self.min || v > self.max {
            return Err(format!("{} must be between {} and {}", self.name, self.min, self.max));
        }
        Ok(v)
    }
}

/// String-keyed attribute map. Known keys get typed accessors; anything else
/// passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, String>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Known display keys present in the map, in panel order.
    pub fn display_rows(&self) -> Vec<(&'static str, &str)> {
        DISPLAY_KEYS
            .iter()
            .filter_map(|k| self.get(k).map(|v| (*k, v)))
            .collect()
    }

    /// Keys the console does not know about.
    pub fn unknown(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !DISPLAY_KEYS.contains(k))
    }

    /// Overwrite the five editable keys with `values`, leaving all others as-is.
    pub fn apply_values(&mut self, values: &QueueAttributeValues) {
        for (k, v) in values.pairs() {
            self.0.insert(k.to_string(), v.to_string());
        }
    }
}

impl FromIterator<(String, String)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The five editable attributes after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributeValues {
    pub visibility_timeout: i64,
    pub message_retention_period: i64,
    pub maximum_message_size: i64,
    pub delay_seconds: i64,
    pub receive_message_wait_time_seconds: i64,
}

impl Default for QueueAttributeValues {
    fn default() -> Self {
        Self {
            visibility_timeout: ATTRIBUTE_RANGES[0].default,
            message_retention_period: ATTRIBUTE_RANGES[1].default,
            maximum_message_size: ATTRIBUTE_RANGES[2].default,
            delay_seconds: ATTRIBUTE_RANGES[3].default,
            receive_message_wait_time_seconds: ATTRIBUTE_RANGES[4].default,
        }
    }
}

impl QueueAttributeValues {
    /// Validate raw form values in table order, stopping at the first failure.
    /// A missing key is treated as an empty (non-numeric) value.
    pub fn from_draft<S: AsRef<str>>(draft: &BTreeMap<String, S>) -> Result<Self, String> {
        let mut out = [0i64; 5];
        for (slot, range) in out.iter_mut().zip(ATTRIBUTE_RANGES.iter()) {
            let raw = draft.get(range.name).map(|s| s.as_ref()).unwrap_or("");
            *slot = range.check(raw)?;
        }
        Ok(Self {
            visibility_timeout: out[0],
            message_retention_period: out[1],
            maximum_message_size: out[2],
            delay_seconds: out[3],
            receive_message_wait_time_seconds: out[4],
        })
    }

    pub fn pairs(&self) -> [(&'static str, i64); 5] {
        [
            (VISIBILITY_TIMEOUT, self.visibility_timeout),
            (MESSAGE_RETENTION_PERIOD, self.message_retention_period),
            (MAXIMUM_MESSAGE_SIZE, self.maximum_message_size),
            (DELAY_SECONDS, self.delay_seconds),
            (RECEIVE_WAIT_TIME_SECONDS, self.receive_message_wait_time_seconds),
        ]
    }

    /// Range-check already-typed values (used by create-queue forms).
    pub fn validate(&self) -> Result<(), String> {
        for ((_, v), range) in self.pairs().iter().zip(ATTRIBUTE_RANGES.iter()) {
            if *v < range.min || *v > range.max {
                return Err(format!("{} must be between {} and {}", range.name, range.min, range.max));
            }
        }
        Ok(())
    }
}
