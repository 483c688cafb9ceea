use crate::message::{MessageId, MessageKind};
use crate::queue::QueueItem;
use crate::validate::{
    self, MAX_BUTTONS_PER_MESSAGE, MAX_LIST_ROWS_TOTAL, MAX_LIST_SECTIONS, ValidationError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery priority carried on a command.
///
/// Priority biases wake-up ordering when rate-limit buckets are contended.
/// It never grants extra capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    Urgent,
}

/// A validated, self-contained unit of outbound work.
///
/// Everything the dispatcher needs to render and send is carried on the
/// command itself — phone number id, token handle, recipient, and the
/// kind-specific content — so a worker only touches the row store to update
/// final state. The message id is the idempotency key for the upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub message_id: MessageId,
    pub workspace_id: String,
    pub phone_number_id: String,
    /// Opaque handle the upstream client exchanges for a bearer token.
    pub access_token: String,
    /// Recipient in E.164 digits without the leading plus.
    pub to: String,
    pub priority: Priority,
    pub campaign_id: Option<Uuid>,
    pub content: CommandContent,
}

impl QueueItem for OutboundCommand {
    const QUEUE: &'static str = "outbound.commands";

    /// Group by recipient so redeliveries for one conversation cluster.
    fn ordering_key(&self) -> Option<String> {
        Some(self.to.clone())
    }
}

impl OutboundCommand {
    /// Build a command, validating recipient and content up-front so that a
    /// malformed command never reaches the queue.
    pub fn new(
        message_id: MessageId,
        workspace_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
        to: impl Into<String>,
        content: CommandContent,
    ) -> Result<Self, ValidationError> {
        let to = to.into();
        validate::validate_recipient(&to)?;
        content.validate()?;

        Ok(Self {
            message_id,
            workspace_id: workspace_id.into(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
            to,
            priority: Priority::Normal,
            campaign_id: None,
            content,
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    /// The message kind this command materializes as.
    pub fn kind(&self) -> MessageKind {
        match &self.content {
            CommandContent::Text { .. } => MessageKind::Text,
            CommandContent::Template { .. } => MessageKind::Template,
            CommandContent::Media { .. } => MessageKind::Media,
            CommandContent::InteractiveButtons { .. } | CommandContent::InteractiveList { .. } => {
                MessageKind::Interactive
            }
            CommandContent::Location { .. } => MessageKind::Location,
            CommandContent::Reaction { .. } => MessageKind::Reaction,
            // A read receipt does not create a user-visible message; the
            // text kind is a placeholder for bookkeeping rows.
            CommandContent::MarkAsRead { .. } => MessageKind::Text,
        }
    }
}

/// Media family accepted by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }

    /// Captions are not accepted on audio or sticker media.
    pub fn supports_caption(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video | MediaKind::Document)
    }
}

/// Reference to media content: either an uploaded media id or a hosted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    Id(String),
    Link(String),
}

/// Kind-specific command content. Each variant has a distinct schema and is
/// validated on construction and again by the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandContent {
    Text {
        body: String,
        preview_url: Option<bool>,
    },
    Template {
        name: String,
        language: String,
        /// Positional body parameters, substituted in order.
        body_parameters: Vec<String>,
    },
    Media {
        media: MediaKind,
        source: MediaSource,
        caption: Option<String>,
        /// Document display filename.
        filename: Option<String>,
    },
    InteractiveButtons {
        body: String,
        /// (id, title) pairs, at most three.
        buttons: Vec<(String, String)>,
        header: Option<String>,
        footer: Option<String>,
    },
    InteractiveList {
        body: String,
        button: String,
        /// (section title, rows) where rows are (id, title, description).
        sections: Vec<(String, Vec<(String, String, Option<String>)>)>,
        header: Option<String>,
        footer: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
    Reaction {
        message_id: String,
        emoji: String,
    },
    MarkAsRead {
        message_id: String,
    },
}

impl CommandContent {
    /// Check the kind-specific schema. Total over any hand-built value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            CommandContent::Text { body, .. } => validate::validate_text_body(body),

            CommandContent::Template { name, language, .. } => {
                validate::validate_template_name(name)?;
                if language.is_empty() {
                    return Err(ValidationError::Content(
                        "template language cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }

            CommandContent::Media {
                media,
                source,
                caption,
                ..
            } => {
                match source {
                    MediaSource::Id(id) => validate::validate_media_id(id)?,
                    MediaSource::Link(url) => validate::validate_url(url)?,
                }
                if let Some(caption_text) = caption {
                    if !media.supports_caption() {
                        return Err(ValidationError::Content(format!(
                            "{} media does not accept a caption",
                            media.as_str()
                        )));
                    }
                    validate::validate_caption(caption_text)?;
                }
                Ok(())
            }

            CommandContent::InteractiveButtons { body, buttons, .. } => {
                validate::validate_text_body(body)?;
                if buttons.is_empty() || buttons.len() > MAX_BUTTONS_PER_MESSAGE {
                    return Err(ValidationError::Content(format!(
                        "interactive messages must have 1-{} buttons",
                        MAX_BUTTONS_PER_MESSAGE
                    )));
                }
                for (id, title) in buttons {
                    validate::validate_button(id, title)?;
                }
                Ok(())
            }

            CommandContent::InteractiveList {
                body,
                button,
                sections,
                ..
            } => {
                validate::validate_text_body(body)?;
                validate::validate_button("list_button", button)?;
                if sections.is_empty() || sections.len() > MAX_LIST_SECTIONS {
                    return Err(ValidationError::Content(format!(
                        "list messages must have 1-{} sections",
                        MAX_LIST_SECTIONS
                    )));
                }
                let total_rows: usize = sections.iter().map(|(_, rows)| rows.len()).sum();
                if total_rows > MAX_LIST_ROWS_TOTAL {
                    return Err(ValidationError::Content(format!(
                        "list messages can have at most {} total rows, got {}",
                        MAX_LIST_ROWS_TOTAL, total_rows
                    )));
                }
                for (title, rows) in sections {
                    validate::validate_list_section(title, rows)?;
                }
                Ok(())
            }

            CommandContent::Location {
                latitude, longitude, ..
            } => validate::validate_coordinates(*latitude, *longitude),

            CommandContent::Reaction { message_id, emoji } => {
                validate::validate_upstream_message_id(message_id)?;
                if emoji.is_empty() {
                    return Err(ValidationError::Content(
                        "reaction emoji cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }

            CommandContent::MarkAsRead { message_id } => {
                validate::validate_upstream_message_id(message_id)
            }
        }
    }
}
