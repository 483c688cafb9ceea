use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant boundary. Owns phone numbers, contacts, messages and campaigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    /// Secret used to verify webhook signatures for this tenant.
    pub webhook_secret: String,
    /// Per-workspace messages-per-second override; None uses the process
    /// default.
    pub rate_limit_override: Option<u32>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            webhook_secret: webhook_secret.into(),
            rate_limit_override: None,
        }
    }
}

/// Upstream-assigned reputation of a registered number. Gates the effective
/// daily send cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityRating {
    Green,
    Yellow,
    Red,
    Unknown,
}

impl QualityRating {
    pub fn from_upstream(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GREEN" => QualityRating::Green,
            "YELLOW" => QualityRating::Yellow,
            "RED" => QualityRating::Red,
            _ => QualityRating::Unknown,
        }
    }
}

/// A registered WhatsApp Business number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: String,
    pub workspace_id: String,
    /// Upstream phone-number-id used in resource paths.
    pub upstream_id: String,
    /// Opaque handle to the encrypted upstream access token.
    pub access_token: String,
    pub quality_rating: QualityRating,
    /// Effective daily message cap, refreshed from upstream events.
    pub daily_message_cap: u64,
    /// Raised when the upstream rejects the token; cleared out-of-band by
    /// the credential-refresh subsystem.
    pub token_refresh_required: bool,
    pub updated_at: DateTime<Utc>,
}

impl PhoneNumber {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        upstream_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            upstream_id: upstream_id.into(),
            access_token: access_token.into(),
            quality_rating: QualityRating::Unknown,
            daily_message_cap: 1000,
            token_refresh_required: false,
            updated_at: Utc::now(),
        }
    }
}

/// A WhatsApp user known to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub workspace_id: String,
    /// WhatsApp's normalized user id.
    pub wa_id: String,
    /// E.164 digits without the plus.
    pub phone: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(
        workspace_id: impl Into<String>,
        wa_id: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        let wa_id = wa_id.into();
        Self {
            id: format!("contact-{}", wa_id),
            workspace_id: workspace_id.into(),
            wa_id,
            phone: phone.into(),
            display_name: None,
            created_at: Utc::now(),
        }
    }
}

/// Approval state of a message template, fed by template webhook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Pending,
    Approved,
    Rejected,
    Disabled,
}

impl TemplateStatus {
    pub fn from_upstream(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "APPROVED" => TemplateStatus::Approved,
            "REJECTED" => TemplateStatus::Rejected,
            "DISABLED" | "PAUSED" => TemplateStatus::Disabled,
            _ => TemplateStatus::Pending,
        }
    }
}
