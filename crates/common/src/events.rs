use crate::campaign::CampaignId;
use crate::queue::QueueItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery receipt statuses the upstream reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl ReceiptStatus {
    pub fn from_upstream(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(ReceiptStatus::Sent),
            "delivered" => Some(ReceiptStatus::Delivered),
            "read" => Some(ReceiptStatus::Read),
            "failed" => Some(ReceiptStatus::Failed),
            _ => None,
        }
    }
}

/// A delivery/read/failure receipt for an outbound message, demultiplexed
/// from a webhook batch onto the status queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub workspace_id: String,
    pub upstream_message_id: String,
    pub status: ReceiptStatus,
    pub recipient: Option<String>,
    /// Upstream error detail on failed receipts.
    pub error_detail: Option<String>,
    pub error_code: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

impl QueueItem for StatusEvent {
    const QUEUE: &'static str = "webhook.status_updates";

    fn ordering_key(&self) -> Option<String> {
        Some(self.upstream_message_id.clone())
    }
}

/// A user-initiated message received from upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub workspace_id: String,
    pub phone_number_id: String,
    pub upstream_message_id: String,
    /// Sender's WhatsApp id (E.164 digits).
    pub from: String,
    pub sender_name: Option<String>,
    /// Upstream type tag ("text", "image", "reaction", ...).
    pub message_type: String,
    /// The raw message object, preserved for downstream consumers.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl QueueItem for InboundEvent {
    const QUEUE: &'static str = "webhook.inbound_messages";

    fn ordering_key(&self) -> Option<String> {
        Some(self.from.clone())
    }
}

/// A template approval-state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEvent {
    pub workspace_id: String,
    pub template_name: String,
    pub template_language: String,
    /// Upstream event tag ("APPROVED", "REJECTED", ...).
    pub event: String,
    pub occurred_at: DateTime<Utc>,
}

impl QueueItem for TemplateEvent {
    const QUEUE: &'static str = "webhook.template_updates";

    fn ordering_key(&self) -> Option<String> {
        Some(self.template_name.clone())
    }
}

/// A phone-number quality or limit change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumberEvent {
    pub workspace_id: String,
    pub phone_number_id: String,
    /// Upstream quality tag when present ("GREEN", "RED", ...).
    pub quality_rating: Option<String>,
    /// New daily message cap when the event carries one.
    pub current_limit: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

impl QueueItem for PhoneNumberEvent {
    const QUEUE: &'static str = "webhook.phone_number_updates";

    fn ordering_key(&self) -> Option<String> {
        Some(self.phone_number_id.clone())
    }
}

/// Which campaign counter a message outcome increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    Sent,
    Delivered,
    Read,
    Failed,
}

/// A single counter increment for the campaign reducer.
///
/// Emitted by the dispatcher on terminal dispatch outcomes and by the status
/// handler on rank-advancing receipt application, so each message bumps each
/// counter at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterEvent {
    pub campaign_id: CampaignId,
    pub field: CounterField,
    pub occurred_at: DateTime<Utc>,
}

impl CounterEvent {
    pub fn new(campaign_id: CampaignId, field: CounterField) -> Self {
        Self {
            campaign_id,
            field,
            occurred_at: Utc::now(),
        }
    }
}

impl QueueItem for CounterEvent {
    const QUEUE: &'static str = "campaign.counters";

    fn ordering_key(&self) -> Option<String> {
        Some(self.campaign_id.to_string())
    }
}
