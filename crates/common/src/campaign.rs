use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CampaignId = Uuid;

/// Lifecycle state of a bulk-send campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }

    /// Legal transitions of the campaign state machine.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Sending)
                | (Scheduled, Cancelled)
                | (Sending, Paused)
                | (Sending, Cancelled)
                | (Sending, Completed)
                | (Sending, Failed)
                | (Paused, Sending)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Scheduled => "SCHEDULED",
            CampaignStatus::Sending => "SENDING",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Cancelled => "CANCELLED",
            CampaignStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Per-campaign delivery counters, maintained by the counter reducer.
///
/// Counters are eventually consistent with message rows; `sent + failed`
/// never exceeds `total`, and equals it once the campaign completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
}

impl CampaignCounters {
    pub fn dispatched(&self) -> u64 {
        self.sent + self.failed
    }
}

/// A bulk send of one approved template to an ordered contact set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub workspace_id: String,
    pub phone_number_id: String,
    pub template_name: String,
    pub template_language: String,
    /// Contact ids in stable scan order.
    pub contact_ids: Vec<String>,
    pub status: CampaignStatus,
    pub counters: CampaignCounters,
    /// Index of the next contact to materialize; batching cursor.
    pub cursor: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(
        workspace_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        template_name: impl Into<String>,
        template_language: impl Into<String>,
        mut contact_ids: Vec<String>,
    ) -> Self {
        // Stable scan order is part of the contract: batches resume
        // deterministically across pause/resume.
        contact_ids.sort();
        let total = contact_ids.len() as u64;
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            phone_number_id: phone_number_id.into(),
            template_name: template_name.into(),
            template_language: template_language.into(),
            contact_ids,
            status: CampaignStatus::Draft,
            counters: CampaignCounters {
                total,
                ..CampaignCounters::default()
            },
            cursor: 0,
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            finished_at: None,
        }
    }
}
