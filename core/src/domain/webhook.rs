// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bound on the per-hook delivery log (§3 Webhook invariant).
pub const MAX_DELIVERY_LOG: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    #[serde(rename = "approval.created")]
    ApprovalCreated,
    #[serde(rename = "approval.approved")]
    ApprovalApproved,
    #[serde(rename = "approval.rejected")]
    ApprovalRejected,
    #[serde(rename = "approval.timed_out")]
    ApprovalTimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<WebhookEventKind>,
    pub secret: Option<String>,
    #[serde(default)]
    pub deliveries: VecDeque<WebhookDelivery>,
}

impl Webhook {
    pub fn new(url: String, events: Vec<WebhookEventKind>, secret: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            events,
            secret,
            deliveries: VecDeque::new(),
        }
    }

    pub fn subscribes_to(&self, kind: WebhookEventKind) -> bool {
        self.events.contains(&kind)
    }

    pub fn record_delivery(&mut self, delivery: WebhookDelivery) {
        self.deliveries.push_back(delivery);
        while self.deliveries.len() > MAX_DELIVERY_LOG {
            self.deliveries.pop_front();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub ts: DateTime<Utc>,
    pub event: String,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}
