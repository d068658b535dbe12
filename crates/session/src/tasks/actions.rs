#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Instant;

use mirador_api::{
    ActionAck, ConsoleResult, CreateTopicRequest, DeleteSubscriptionRequest, DeleteTopicRequest, StartRedriveRequest,
    REDRIVE_MAX_MESSAGES_PER_SECOND,
};
use mirador_core::ListId;
use mirador_store::BannerSlot;
use tracing::{info, warn};

use crate::forms::{topic_name, CreateQueueForm, PublishForm, SendMessageForm, SubscriptionForm};
use crate::{Followup, ResultTarget, Session, UiUpdate};

impl Session {
    /// Run one backend action in the background and report its outcome to
    /// `target`. Failures carry the backend message verbatim.
    fn start_action<F>(&self, what: &'static str, target: ResultTarget, followup: Followup, success: String, fut: F)
    where
        F: Future<Output = ConsoleResult<ActionAck>> + Send + 'static,
    {
        let token = self.token();
        info!(action = what, "action: start");
        self.spawn_task(async move {
            let t0 = Instant::now();
            let result = match fut.await {
                Ok(_) => {
                    info!(action = what, took_ms = %t0.elapsed().as_millis(), "action: ok");
                    Ok(success)
                }
                Err(e) => {
                    warn!(action = what, error = %e, took_ms = %t0.elapsed().as_millis(), "action: failed");
                    Err(e.to_string())
                }
            };
            UiUpdate::ActionDone { token, target, result, followup }
        });
    }

    /// Queue actions target a row the operator can see in the queues view.
    fn require_queue_row(&mut self, key: &str) -> ConsoleResult<()> {
        match self.require_row(ListId::Queues, key) {
            Ok(()) => Ok(()),
            Err(e) => self.validation_failed(e.to_string()),
        }
    }

    pub fn create_queue(&mut self, form: &CreateQueueForm) -> ConsoleResult<()> {
        let req = match form.to_request() {
            Ok(r) => r,
            Err(m) => return self.validation_failed(m),
        };
        let success = format!("Queue created: {}{}", req.queue_name, if req.create_dlq { " (with DLQ)" } else { "" });
        let api = self.api.clone();
        self.start_action("create-queue", ResultTarget::Alert, Followup::Reload, success, async move {
            api.create_queue(&req).await
        });
        Ok(())
    }

    /// Send to the queue keyed `key`. FIFO-ness comes from the latest
    /// snapshot, so a FIFO queue without a group ID never reaches the backend.
    pub fn send_message(&mut self, key: &str, form: &SendMessageForm) -> ConsoleResult<()> {
        self.require_queue_row(key)?;
        let Some(is_fifo) = self.queue(key).map(|q| q.is_fifo) else {
            return self.validation_failed(format!("Queue not found: {key}"));
        };
        let req = match form.to_request(key, is_fifo) {
            Ok(r) => r,
            Err(m) => return self.validation_failed(m),
        };
        let api = self.api.clone();
        self.start_action("send-message", ResultTarget::Alert, Followup::Reload, "Message sent".into(), async move {
            api.send_message(&req).await
        });
        Ok(())
    }

    pub fn purge_queue(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_queue_row(key)?;
        let api = self.api.clone();
        let url = key.to_string();
        self.start_action("purge-queue", ResultTarget::Alert, Followup::Reload, format!("Queue purged: {key}"), async move {
            api.purge_queue(&url).await
        });
        Ok(())
    }

    pub fn delete_queue(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_queue_row(key)?;
        let api = self.api.clone();
        let url = key.to_string();
        self.start_action("delete-queue", ResultTarget::Alert, Followup::Reload, format!("Queue deleted: {key}"), async move {
            api.delete_queue(&url).await
        });
        Ok(())
    }

    /// Move messages from a dead-letter queue back to its source. Reported on
    /// the queue's attribute banner, followed by a detail refresh.
    pub fn start_redrive(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_queue_row(key)?;
        match self.queue(key).map(|q| q.is_dlq) {
            Some(true) => {}
            Some(false) => return self.validation_failed(format!("Redrive is only available for dead-letter queues: {key}")),
            None => return self.validation_failed(format!("Queue not found: {key}")),
        }
        let req = StartRedriveRequest {
            queue_url: key.to_string(),
            destination_queue_url: String::new(),
            max_messages_per_second: REDRIVE_MAX_MESSAGES_PER_SECOND,
        };
        let target = ResultTarget::Banner { list: ListId::Queues, key: key.to_string(), slot: BannerSlot::Attributes };
        let api = self.api.clone();
        self.start_action(
            "start-redrive",
            target,
            Followup::RefreshDetail(key.to_string()),
            "Redrive task started.".into(),
            async move { api.start_redrive(&req).await },
        );
        Ok(())
    }

    pub fn create_topic(&mut self, name: &str) -> ConsoleResult<()> {
        let name = match topic_name(name) {
            Ok(n) => n,
            Err(m) => return self.validation_failed(m),
        };
        let success = format!("Topic created: {name}");
        let api = self.api.clone();
        self.start_action("create-topic", ResultTarget::Alert, Followup::Reload, success, async move {
            api.create_topic(&CreateTopicRequest { name }).await
        });
        Ok(())
    }

    pub fn delete_topic(&mut self, topic_arn: &str) -> ConsoleResult<()> {
        if topic_arn.trim().is_empty() {
            return self.validation_failed("Topic is required".into());
        }
        let api = self.api.clone();
        let req = DeleteTopicRequest { topic_arn: topic_arn.trim().to_string() };
        let success = format!("Topic deleted: {}", req.topic_arn);
        self.start_action("delete-topic", ResultTarget::Alert, Followup::Reload, success, async move {
            api.delete_topic(&req).await
        });
        Ok(())
    }

    pub fn create_subscription(&mut self, form: &SubscriptionForm) -> ConsoleResult<()> {
        let req = match form.to_request() {
            Ok(r) => r,
            Err(m) => return self.validation_failed(m),
        };
        let success = format!("Subscription created: {} -> {}", req.protocol, req.endpoint);
        let api = self.api.clone();
        self.start_action("create-subscription", ResultTarget::Alert, Followup::Reload, success, async move {
            api.create_subscription(&req).await
        });
        Ok(())
    }

    pub fn delete_subscription(&mut self, subscription_arn: &str) -> ConsoleResult<()> {
        if subscription_arn.trim().is_empty() {
            return self.validation_failed("Subscription is required".into());
        }
        let api = self.api.clone();
        let req = DeleteSubscriptionRequest { subscription_arn: subscription_arn.trim().to_string() };
        let success = format!("Subscription deleted: {}", req.subscription_arn);
        self.start_action("delete-subscription", ResultTarget::Alert, Followup::Reload, success, async move {
            api.delete_subscription(&req).await
        });
        Ok(())
    }

    pub fn publish(&mut self, form: &PublishForm) -> ConsoleResult<()> {
        let req = match form.to_request() {
            Ok(r) => r,
            Err(m) => return self.validation_failed(m),
        };
        let api = self.api.clone();
        self.start_action("publish", ResultTarget::Alert, Followup::None, "Message published".into(), async move {
            api.publish(&req).await
        });
        Ok(())
    }
}
