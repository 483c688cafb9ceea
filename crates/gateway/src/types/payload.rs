use serde::Deserialize;

/// Top-level webhook notification body:
/// `entry[].changes[].value.{messages|statuses|...}`.
#[derive(Deserialize, Debug)]
pub struct WebhookPayload {
    pub object: String,
    pub entry: Vec<Entry>,
}

#[derive(Deserialize, Debug)]
pub struct Entry {
    pub id: String,
    pub changes: Vec<Change>,
}

#[derive(Deserialize, Debug)]
pub struct Change {
    pub value: ChangeValue,
    pub field: String,
}

/// Union of the change payloads we consume. The upstream reuses one shape
/// for several `field` values, so everything is optional and the field tag
/// decides the route.
#[derive(Deserialize, Debug)]
pub struct ChangeValue {
    pub messaging_product: Option<String>,
    pub metadata: Option<Metadata>,
    pub contacts: Option<Vec<ContactInfo>>,
    /// Inbound messages, kept raw: the whole object travels to the inbound
    /// queue so downstream consumers see exactly what the upstream sent.
    pub messages: Option<Vec<serde_json::Value>>,
    pub statuses: Option<Vec<StatusReceipt>>,

    // message_template_status_update
    pub event: Option<String>,
    pub message_template_name: Option<String>,
    pub message_template_language: Option<String>,

    // phone_number_quality_update
    pub display_phone_number: Option<String>,
    pub current_limit: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Metadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Deserialize, Debug)]
pub struct ContactInfo {
    pub profile: ContactProfile,
    pub wa_id: String,
}

#[derive(Deserialize, Debug)]
pub struct ContactProfile {
    pub name: String,
}

/// One delivery receipt inside `statuses`.
#[derive(Deserialize, Debug)]
pub struct StatusReceipt {
    pub id: String,
    pub status: String,
    pub timestamp: Option<String>,
    pub recipient_id: Option<String>,
    pub errors: Option<Vec<ReceiptError>>,
}

#[derive(Deserialize, Debug)]
pub struct ReceiptError {
    pub code: u32,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Daily messaging-limit tiers announced on quality events.
pub fn parse_limit_tier(tier: &str) -> Option<u64> {
    match tier {
        "TIER_50" => Some(50),
        "TIER_250" => Some(250),
        "TIER_1K" => Some(1_000),
        "TIER_10K" => Some(10_000),
        "TIER_100K" => Some(100_000),
        "TIER_UNLIMITED" => Some(u64::MAX),
        _ => None,
    }
}
