// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.6 Webhook Dispatcher: HMAC-signed, retried, fire-and-forget delivery of
//! approval events to registered hooks.
//!
//! Grounded in the teacher's reqwest-based outbound-HTTP usage pattern plus
//! its exponential-backoff retry idiom (used elsewhere for provider calls),
//! generalized here to webhook fan-out with `hmac`+`sha2` signing.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::approval::ApprovalEvent;
use crate::domain::webhook::{Webhook, WebhookDelivery, WebhookEventKind};
use crate::infrastructure::metrics;
use crate::infrastructure::repositories::FileBackedStore;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookDispatcher {
    webhooks: Arc<FileBackedStore<uuid::Uuid, Webhook>>,
    client: reqwest::Client,
    max_retries: u32,
}

impl WebhookDispatcher {
    pub fn new(webhooks: Arc<FileBackedStore<uuid::Uuid, Webhook>>, max_retries: u32) -> Self {
        Self {
            webhooks,
            client: reqwest::Client::new(),
            max_retries,
        }
    }

    /// Fan out one approval event to every hook subscribed to its kind.
    /// Fire-and-forget from the caller's perspective: this spawns a task per
    /// matching hook and returns immediately once dispatch has started.
    pub fn dispatch(self: &Arc<Self>, event: &ApprovalEvent) {
        let Some(kind) = event_kind(event) else { return };
        let body = match serde_json::to_vec(event) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("failed to serialize webhook event: {e}");
                return;
            }
        };
        let dispatcher = Arc::clone(self);
        let event_name = wire_name(kind).to_string();
        tokio::spawn(async move {
            dispatcher.dispatch_to_subscribers(kind, event_name, body).await;
        });
    }

    async fn dispatch_to_subscribers(&self, kind: WebhookEventKind, event_name: String, body: Vec<u8>) {
        let hooks: Vec<Webhook> = self.webhooks.list().await.into_iter().filter(|h| h.subscribes_to(kind)).collect();
        for hook in hooks {
            self.deliver_with_retry(hook, &event_name, &body).await;
        }
    }

    async fn deliver_with_retry(&self, hook: Webhook, event_name: &str, body: &[u8]) {
        let mut backoff = Duration::from_secs(1);
        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=self.max_retries.max(1) {
            let mut request = self.client.post(&hook.url).header("Content-Type", "application/json").body(body.to_vec());
            if let Some(secret) = &hook.secret {
                request = request.header("X-Intelli-Signature-256", sign(secret, body));
            }
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        metrics::record_webhook_delivery(true);
                        self.record(&hook.id, event_name, last_status, None).await;
                        return;
                    }
                    last_error = Some(format!("http {status}"));
                }
                Err(e) => last_error = Some(e.to_string()),
            }
            tracing::warn!(hook = %hook.id, attempt, "webhook delivery attempt failed");
            if attempt < self.max_retries {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        metrics::record_webhook_delivery(false);
        self.record(&hook.id, event_name, last_status, last_error).await;
    }

    async fn record(&self, hook_id: &uuid::Uuid, event_name: &str, http_status: Option<u16>, error: Option<String>) {
        let delivery = WebhookDelivery {
            ts: chrono::Utc::now(),
            event: event_name.to_string(),
            http_status,
            error,
        };
        let _ = self
            .webhooks
            .mutate(hook_id, |existing| {
                if let Some(hook) = existing {
                    hook.record_delivery(delivery);
                }
            })
            .await;
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn event_kind(event: &ApprovalEvent) -> Option<WebhookEventKind> {
    match event {
        ApprovalEvent::Created { .. } => Some(WebhookEventKind::ApprovalCreated),
        ApprovalEvent::Approved { .. } => Some(WebhookEventKind::ApprovalApproved),
        ApprovalEvent::Rejected { .. } => Some(WebhookEventKind::ApprovalRejected),
        ApprovalEvent::TimedOut { .. } => Some(WebhookEventKind::ApprovalTimedOut),
        ApprovalEvent::SlowConsumer => None,
    }
}

fn wire_name(kind: WebhookEventKind) -> &'static str {
    match kind {
        WebhookEventKind::ApprovalCreated => "approval.created",
        WebhookEventKind::ApprovalApproved => "approval.approved",
        WebhookEventKind::ApprovalRejected => "approval.rejected",
        WebhookEventKind::ApprovalTimedOut => "approval.timed_out",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_body() {
        let body = b"{\"a\":1}";
        assert_eq!(sign("secret", body), sign("secret", body));
    }

    #[test]
    fn signature_differs_for_different_secrets() {
        let body = b"{\"a\":1}";
        assert_ne!(sign("secret-a", body), sign("secret-b", body));
    }

    #[tokio::test]
    async fn empty_events_list_hook_receives_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let webhooks = Arc::new(FileBackedStore::load(dir.path().join("webhooks.json")).unwrap());
        let hook = Webhook::new("http://127.0.0.1:0/hook".to_string(), Vec::new(), None);
        webhooks.insert(hook.id, hook).await.unwrap();
        let dispatcher = Arc::new(WebhookDispatcher::new(webhooks.clone(), 3));
        dispatcher.dispatch_to_subscribers(WebhookEventKind::ApprovalCreated, "approval.created".to_string(), b"{}".to_vec()).await;
        let stored = webhooks.list().await;
        assert!(stored[0].deliveries.is_empty());
    }
}
