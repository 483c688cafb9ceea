//! Wire payload structs for the Cloud API `/messages` resource.
//!
//! These serialize to exactly the JSON the upstream accepts; field order
//! and optionality are part of the contract and covered by exact-JSON tests
//! in the renderer.

use serde::Serialize;

pub const MESSAGING_PRODUCT: &str = "whatsapp";
pub const RECIPIENT_TYPE_INDIVIDUAL: &str = "individual";

/// A plain text message with optional link preview.
#[derive(Debug, Clone, Serialize)]
pub struct TextPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub text: TextContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<bool>,
}

/// A pre-approved template message with positional body parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TemplatePayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub template: TemplateContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateContent {
    pub name: String,
    pub language: TemplateLanguage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateLanguage {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub component_type: &'static str,
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateParameter {
    #[serde(rename = "type")]
    pub parameter_type: &'static str,
    pub text: String,
}

/// Either an uploaded media id or a hosted link, plus optional caption and
/// document filename.
#[derive(Debug, Clone, Serialize)]
pub struct MediaObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub image: MediaObject,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub video: MediaObject,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub audio: MediaObject,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub document: MediaObject,
}

#[derive(Debug, Clone, Serialize)]
pub struct StickerPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub sticker: MediaObject,
}

/// Buttons or list menus.
#[derive(Debug, Clone, Serialize)]
pub struct InteractivePayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub interactive: InteractiveContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveContent {
    #[serde(rename = "type")]
    pub interactive_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<InteractiveHeader>,
    pub body: InteractiveBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<InteractiveFooter>,
    pub action: InteractiveAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveHeader {
    #[serde(rename = "type")]
    pub header_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveBody {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveFooter {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InteractiveAction {
    Buttons {
        buttons: Vec<InteractiveButton>,
    },
    List {
        button: String,
        sections: Vec<ListSection>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractiveButton {
    #[serde(rename = "type")]
    pub button_type: &'static str,
    pub reply: ButtonReply,
}

#[derive(Debug, Clone, Serialize)]
pub struct ButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub location: LocationContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionPayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub reaction: ReactionContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionContent {
    pub message_id: String,
    pub emoji: String,
}

/// Read-receipt acknowledgement for an inbound message. Not addressed to a
/// recipient; references the message being marked.
#[derive(Debug, Clone, Serialize)]
pub struct MarkAsReadPayload {
    pub messaging_product: &'static str,
    pub status: &'static str,
    pub message_id: String,
}
