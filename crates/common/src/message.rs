use crate::errors::LastError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a message row. Doubles as the idempotency key for
/// the upstream send.
pub type MessageId = Uuid;

/// Message direction relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Content family of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Template,
    Media,
    Interactive,
    Location,
    Reaction,
}

/// Delivery state of a message.
///
/// Outbound rows move strictly forward through the ranked states; any state
/// may jump to `Failed`, which is terminal. A failed message is never
/// resurrected — a requeue creates a new row with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position in the forward progression. `Failed` has no rank; it is
    /// reachable from anywhere and terminal.
    pub fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Queued => Some(1),
            MessageStatus::Sending => Some(2),
            MessageStatus::Sent => Some(3),
            MessageStatus::Delivered => Some(4),
            MessageStatus::Read => Some(5),
            MessageStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }

    /// A message in this state no longer occupies the dispatcher.
    pub fn is_dispatch_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent
                | MessageStatus::Delivered
                | MessageStatus::Read
                | MessageStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` goes forward in rank.
    /// Transitions to `Failed` are always allowed, transitions out of it never.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        if *self == MessageStatus::Failed {
            return false;
        }
        if next == MessageStatus::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(cur), Some(nxt)) => nxt > cur,
            _ => false,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
            MessageStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A single outbound or inbound message row.
///
/// This is the single source of truth for delivery state. The dispatcher
/// mutates it towards SENT/FAILED, the webhook status handler towards
/// DELIVERED/READ/FAILED; both serialize their races through the store's
/// compare-and-swap operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub workspace_id: String,
    pub phone_number_id: String,
    pub direction: Direction,
    pub kind: MessageKind,
    /// Recipient for outbound, sender for inbound (E.164 digits).
    pub counterpart: String,
    /// Rendered upstream payload for outbound, raw event payload for inbound.
    pub payload: serde_json::Value,
    pub upstream_message_id: Option<String>,
    pub status: MessageStatus,
    pub attempt_count: u32,
    pub last_error: Option<LastError>,
    pub campaign_id: Option<Uuid>,
    /// Worker currently holding the row while SENDING.
    pub worker_id: Option<String>,
    /// Deadline after which a SENDING row may be reclaimed by another worker.
    pub sending_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a fresh outbound row in PENDING.
    pub fn new_outbound(
        workspace_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        kind: MessageKind,
        recipient: impl Into<String>,
        campaign_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            phone_number_id: phone_number_id.into(),
            direction: Direction::Outbound,
            kind,
            counterpart: recipient.into(),
            payload: serde_json::Value::Null,
            upstream_message_id: None,
            status: MessageStatus::Pending,
            attempt_count: 0,
            last_error: None,
            campaign_id,
            worker_id: None,
            sending_deadline: None,
            created_at: Utc::now(),
            queued_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
        }
    }

    /// Create an inbound row from a received event, already SENT-equivalent
    /// from our perspective (there is nothing to dispatch).
    pub fn new_inbound(
        workspace_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        kind: MessageKind,
        sender: impl Into<String>,
        upstream_message_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            phone_number_id: phone_number_id.into(),
            direction: Direction::Inbound,
            kind,
            counterpart: sender.into(),
            payload,
            upstream_message_id: Some(upstream_message_id.into()),
            status: MessageStatus::Delivered,
            attempt_count: 0,
            last_error: None,
            campaign_id: None,
            worker_id: None,
            sending_deadline: None,
            created_at: now,
            queued_at: None,
            sent_at: None,
            delivered_at: Some(now),
            read_at: None,
            failed_at: None,
        }
    }

    /// Stamp the timestamp slot matching a newly reached status.
    pub fn stamp(&mut self, status: MessageStatus, at: DateTime<Utc>) {
        match status {
            MessageStatus::Queued => self.queued_at = Some(at),
            MessageStatus::Sent => self.sent_at = Some(at),
            MessageStatus::Delivered => self.delivered_at = Some(at),
            MessageStatus::Read => self.read_at = Some(at),
            MessageStatus::Failed => self.failed_at = Some(at),
            MessageStatus::Pending | MessageStatus::Sending => {}
        }
    }
}
