//! Operator input forms and their local validation. Nothing here talks to the
//! backend; a form either yields a request or the message to show.

#![forbid(unsafe_code)]

use mirador_api::{CreateQueueRequest, CreateSubscriptionRequest, PublishRequest, SendMessageRequest};
use mirador_core::attributes::{
    DEFAULT_DLQ_MAX_RECEIVE_COUNT, DELAY_SECONDS, MAXIMUM_MESSAGE_SIZE, MESSAGE_RETENTION_PERIOD,
    RECEIVE_WAIT_TIME_SECONDS, VISIBILITY_TIMEOUT,
};
use mirador_core::{QueueAttributeValues, ATTRIBUTE_RANGES};

pub const SUBSCRIPTION_PROTOCOLS: [&str; 2] = ["http", "ess-queue-ess"];

/// Raw create-queue input. Empty numeric fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateQueueForm {
    pub name: String,
    pub fifo: bool,
    pub with_dlq: bool,
    pub dlq_max_receive_count: String,
    pub visibility_timeout: String,
    pub message_retention_period: String,
    pub maximum_message_size: String,
    pub delay_seconds: String,
    pub receive_message_wait_time_seconds: String,
}

impl Default for CreateQueueForm {
    fn default() -> Self {
        let d = QueueAttributeValues::default();
        Self {
            name: String::new(),
            fifo: false,
            with_dlq: false,
            dlq_max_receive_count: DEFAULT_DLQ_MAX_RECEIVE_COUNT.to_string(),
            visibility_timeout: d.visibility_timeout.to_string(),
            message_retention_period: d.message_retention_period.to_string(),
            maximum_message_size: d.maximum_message_size.to_string(),
            delay_seconds: d.delay_seconds.to_string(),
            receive_message_wait_time_seconds: d.receive_message_wait_time_seconds.to_string(),
        }
    }
}

fn number_or(raw: &str, default: i64) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(default);
    }
    raw.parse().ok()
}

fn default_of(name: &str) -> i64 {
    ATTRIBUTE_RANGES.iter().find(|r| r.name == name).map(|r| r.default).unwrap_or_default()
}

impl CreateQueueForm {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn to_request(&self) -> Result<CreateQueueRequest, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Queue name is required".into());
        }
        let raw = [
            (VISIBILITY_TIMEOUT, &self.visibility_timeout),
            (MESSAGE_RETENTION_PERIOD, &self.message_retention_period),
            (MAXIMUM_MESSAGE_SIZE, &self.maximum_message_size),
            (DELAY_SECONDS, &self.delay_seconds),
            (RECEIVE_WAIT_TIME_SECONDS, &self.receive_message_wait_time_seconds),
        ];
        let mut nums = [0i64; 5];
        for (slot, (attr, value)) in nums.iter_mut().zip(raw) {
            *slot = number_or(value, default_of(attr)).ok_or("Advanced attributes must be numeric values")?;
        }
        let dlq_count = number_or(&self.dlq_max_receive_count, DEFAULT_DLQ_MAX_RECEIVE_COUNT as i64);
        let dlq_max_receive_count = match dlq_count.filter(|n| *n >= 1).and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            None if self.with_dlq => return Err("DLQ max receive count must be 1 or greater".into()),
            None => DEFAULT_DLQ_MAX_RECEIVE_COUNT,
        };
        let values = QueueAttributeValues {
            visibility_timeout: nums[0],
            message_retention_period: nums[1],
            maximum_message_size: nums[2],
            delay_seconds: nums[3],
            receive_message_wait_time_seconds: nums[4],
        };
        values.validate()?;
        Ok(CreateQueueRequest {
            queue_name: name.to_string(),
            is_fifo: self.fifo,
            content_based_deduplication: self.fifo,
            create_dlq: self.with_dlq,
            dlq_max_receive_count,
            visibility_timeout: values.visibility_timeout,
            message_retention_period: values.message_retention_period,
            maximum_message_size: values.maximum_message_size,
            delay_seconds: values.delay_seconds,
            receive_message_wait_time_seconds: values.receive_message_wait_time_seconds,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageForm {
    pub body: String,
    pub group_id: String,
    pub dedup_id: String,
}

impl SendMessageForm {
    pub fn body(body: impl Into<String>) -> Self {
        Self { body: body.into(), ..Default::default() }
    }

    pub fn to_request(&self, queue_url: &str, is_fifo: bool) -> Result<SendMessageRequest, String> {
        let body = self.body.trim();
        let group = self.group_id.trim();
        if body.is_empty() {
            return Err("Message body is required".into());
        }
        if is_fifo && group.is_empty() {
            return Err("Message Group ID is required for FIFO queues".into());
        }
        Ok(SendMessageRequest {
            queue_url: queue_url.to_string(),
            message_body: body.to_string(),
            message_group_id: group.to_string(),
            message_deduplication_id: self.dedup_id.trim().to_string(),
            delay_seconds: 0,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionForm {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub auto_confirm: bool,
}

impl SubscriptionForm {
    pub fn to_request(&self) -> Result<CreateSubscriptionRequest, String> {
        let topic_arn = self.topic_arn.trim();
        let protocol = self.protocol.trim();
        let endpoint = self.endpoint.trim();
        if topic_arn.is_empty() {
            return Err("Topic is required".into());
        }
        if !SUBSCRIPTION_PROTOCOLS.contains(&protocol) {
            return Err("Protocol must be http or ess-queue-ess".into());
        }
        if endpoint.is_empty() {
            return Err("Endpoint is required".into());
        }
        Ok(CreateSubscriptionRequest {
            topic_arn: topic_arn.to_string(),
            protocol: protocol.to_string(),
            endpoint: endpoint.to_string(),
            auto_confirm: self.auto_confirm,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishForm {
    pub topic_arn: String,
    pub subject: String,
    pub message: String,
}

impl PublishForm {
    pub fn to_request(&self) -> Result<PublishRequest, String> {
        if self.topic_arn.trim().is_empty() {
            return Err("Topic is required".into());
        }
        if self.message.trim().is_empty() {
            return Err("Message is required".into());
        }
        Ok(PublishRequest {
            topic_arn: self.topic_arn.trim().to_string(),
            subject: self.subject.trim().to_string(),
            message: self.message.clone(),
        })
    }
}

pub fn topic_name(raw: &str) -> Result<String, String> {
    match raw.trim() {
        "" => Err("Topic name is required".into()),
        name => Ok(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_defaults_match_console() {
        let r = CreateQueueForm::named("orders.fifo").to_request().unwrap();
        assert_eq!(r.visibility_timeout, 30);
        assert_eq!(r.message_retention_period, 345_600);
        assert_eq!(r.dlq_max_receive_count, 3);
        assert!(!r.is_fifo && !r.content_based_deduplication);
    }

    #[test]
    fn create_checks_name_then_numbers_then_dlq_then_ranges() {
        assert_eq!(CreateQueueForm::default().to_request().unwrap_err(), "Queue name is required");

        let mut f = CreateQueueForm::named("q");
        f.delay_seconds = "soon".into();
        assert_eq!(f.to_request().unwrap_err(), "Advanced attributes must be numeric values");

        let mut f = CreateQueueForm::named("q");
        f.with_dlq = true;
        f.dlq_max_receive_count = "0".into();
        assert_eq!(f.to_request().unwrap_err(), "DLQ max receive count must be 1 or greater");

        let mut f = CreateQueueForm::named("q");
        f.visibility_timeout = "50000".into();
        assert_eq!(f.to_request().unwrap_err(), "VisibilityTimeout must be between 0 and 43200");
    }

    #[test]
    fn dlq_count_beyond_u32_is_rejected_not_wrapped() {
        let mut f = CreateQueueForm::named("q");
        f.with_dlq = true;
        f.dlq_max_receive_count = "4294967297".into();
        assert_eq!(f.to_request().unwrap_err(), "DLQ max receive count must be 1 or greater");

        f.dlq_max_receive_count = u32::MAX.to_string();
        assert_eq!(f.to_request().unwrap().dlq_max_receive_count, u32::MAX);
    }

    #[test]
    fn blank_fields_fall_back_to_defaults() {
        let mut f = CreateQueueForm::named("q");
        f.fifo = true;
        f.maximum_message_size = "  ".into();
        let r = f.to_request().unwrap();
        assert_eq!(r.maximum_message_size, 262_144);
        assert!(r.content_based_deduplication);
    }

    #[test]
    fn fifo_send_requires_group() {
        let f = SendMessageForm::body("hello");
        assert_eq!(f.to_request("u", true).unwrap_err(), "Message Group ID is required for FIFO queues");
        assert!(f.to_request("u", false).is_ok());
        assert_eq!(SendMessageForm::body("  ").to_request("u", false).unwrap_err(), "Message body is required");
    }

    #[test]
    fn subscription_protocol_is_closed() {
        let f = SubscriptionForm {
            topic_arn: "arn:t".into(),
            protocol: "smtp".into(),
            endpoint: "x".into(),
            auto_confirm: true,
        };
        assert_eq!(f.to_request().unwrap_err(), "Protocol must be http or ess-queue-ess");
    }
}
