//! Command rendering: validated commands in, upstream wire requests out.
//!
//! This module is the single place wire-format knowledge lives. The
//! dispatcher treats the output as opaque; an API-version upgrade is a
//! change here and nowhere else.

pub mod payload;

use common::{CommandContent, MediaKind, MediaSource, OutboundCommand, validate::ValidationError};
use payload::*;
use serde_json::Value;
use thiserror::Error;

/// A rendered upstream request: resource path plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRequest {
    /// Resource path relative to `{base}/{api-version}/`.
    pub path: String,
    pub body: Value,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("command failed validation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Render a command into the upstream wire format.
///
/// Pure and total: performs no I/O and re-validates the command so that a
/// hand-built or replayed command can never produce a malformed request.
pub fn render(command: &OutboundCommand) -> Result<RenderedRequest, RenderError> {
    command.content.validate()?;
    common::validate::validate_recipient(&command.to)?;

    let body = match &command.content {
        CommandContent::Text { body, preview_url } => serde_json::to_value(TextPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: command.to.clone(),
            message_type: "text",
            text: TextContent {
                body: body.clone(),
                preview_url: *preview_url,
            },
        })?,

        CommandContent::Template {
            name,
            language,
            body_parameters,
        } => {
            let components = if body_parameters.is_empty() {
                Vec::new()
            } else {
                vec![TemplateComponent {
                    component_type: "body",
                    parameters: body_parameters
                        .iter()
                        .map(|text| TemplateParameter {
                            parameter_type: "text",
                            text: text.clone(),
                        })
                        .collect(),
                }]
            };
            serde_json::to_value(TemplatePayload {
                messaging_product: MESSAGING_PRODUCT,
                recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
                to: command.to.clone(),
                message_type: "template",
                template: TemplateContent {
                    name: name.clone(),
                    language: TemplateLanguage {
                        code: language.clone(),
                    },
                    components,
                },
            })?
        }

        CommandContent::Media {
            media,
            source,
            caption,
            filename,
        } => {
            let object = MediaObject {
                id: match source {
                    MediaSource::Id(id) => Some(id.clone()),
                    MediaSource::Link(_) => None,
                },
                link: match source {
                    MediaSource::Id(_) => None,
                    MediaSource::Link(url) => Some(url.clone()),
                },
                caption: caption.clone(),
                filename: filename.clone(),
            };
            render_media(&command.to, *media, object)?
        }

        CommandContent::InteractiveButtons {
            body,
            buttons,
            header,
            footer,
        } => serde_json::to_value(InteractivePayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: command.to.clone(),
            message_type: "interactive",
            interactive: InteractiveContent {
                interactive_type: "button",
                header: header.as_ref().map(|text| InteractiveHeader {
                    header_type: "text",
                    text: text.clone(),
                }),
                body: InteractiveBody { text: body.clone() },
                footer: footer
                    .as_ref()
                    .map(|text| InteractiveFooter { text: text.clone() }),
                action: InteractiveAction::Buttons {
                    buttons: buttons
                        .iter()
                        .map(|(id, title)| InteractiveButton {
                            button_type: "reply",
                            reply: ButtonReply {
                                id: id.clone(),
                                title: title.clone(),
                            },
                        })
                        .collect(),
                },
            },
        })?,

        CommandContent::InteractiveList {
            body,
            button,
            sections,
            header,
            footer,
        } => serde_json::to_value(InteractivePayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: command.to.clone(),
            message_type: "interactive",
            interactive: InteractiveContent {
                interactive_type: "list",
                header: header.as_ref().map(|text| InteractiveHeader {
                    header_type: "text",
                    text: text.clone(),
                }),
                body: InteractiveBody { text: body.clone() },
                footer: footer
                    .as_ref()
                    .map(|text| InteractiveFooter { text: text.clone() }),
                action: InteractiveAction::List {
                    button: button.clone(),
                    sections: sections
                        .iter()
                        .map(|(title, rows)| ListSection {
                            title: title.clone(),
                            rows: rows
                                .iter()
                                .map(|(id, row_title, description)| ListRow {
                                    id: id.clone(),
                                    title: row_title.clone(),
                                    description: description.clone(),
                                })
                                .collect(),
                        })
                        .collect(),
                },
            },
        })?,

        CommandContent::Location {
            latitude,
            longitude,
            name,
            address,
        } => serde_json::to_value(LocationPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: command.to.clone(),
            message_type: "location",
            location: LocationContent {
                latitude: *latitude,
                longitude: *longitude,
                name: name.clone(),
                address: address.clone(),
            },
        })?,

        CommandContent::Reaction { message_id, emoji } => {
            serde_json::to_value(ReactionPayload {
                messaging_product: MESSAGING_PRODUCT,
                recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
                to: command.to.clone(),
                message_type: "reaction",
                reaction: ReactionContent {
                    message_id: message_id.clone(),
                    emoji: emoji.clone(),
                },
            })?
        }

        CommandContent::MarkAsRead { message_id } => serde_json::to_value(MarkAsReadPayload {
            messaging_product: MESSAGING_PRODUCT,
            status: "read",
            message_id: message_id.clone(),
        })?,
    };

    Ok(RenderedRequest {
        path: format!("{}/messages", command.phone_number_id),
        body,
    })
}

fn render_media(to: &str, media: MediaKind, object: MediaObject) -> Result<Value, RenderError> {
    let value = match media {
        MediaKind::Image => serde_json::to_value(ImagePayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: to.to_string(),
            message_type: "image",
            image: object,
        })?,
        MediaKind::Video => serde_json::to_value(VideoPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: to.to_string(),
            message_type: "video",
            video: object,
        })?,
        MediaKind::Audio => serde_json::to_value(AudioPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: to.to_string(),
            message_type: "audio",
            audio: object,
        })?,
        MediaKind::Document => serde_json::to_value(DocumentPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: to.to_string(),
            message_type: "document",
            document: object,
        })?,
        MediaKind::Sticker => serde_json::to_value(StickerPayload {
            messaging_product: MESSAGING_PRODUCT,
            recipient_type: RECIPIENT_TYPE_INDIVIDUAL,
            to: to.to_string(),
            message_type: "sticker",
            sticker: object,
        })?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn command(content: CommandContent) -> OutboundCommand {
        OutboundCommand::new(
            Uuid::new_v4(),
            "ws-1",
            "1029384756",
            "tok",
            "15551234567",
            content,
        )
        .unwrap()
    }

    #[test]
    fn test_path_targets_the_number_resource() {
        let rendered = render(&command(CommandContent::Text {
            body: "Hi".to_string(),
            preview_url: None,
        }))
        .unwrap();
        assert_eq!(rendered.path, "1029384756/messages");
    }

    #[test]
    fn test_text_wire_format() {
        let rendered = render(&command(CommandContent::Text {
            body: "Hello, world!".to_string(),
            preview_url: None,
        }))
        .unwrap();

        let expected = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": "15551234567",
            "type": "text",
            "text": {"body": "Hello, world!"}
        });
        assert_eq!(rendered.body, expected);
    }

    #[test]
    fn test_text_with_preview_wire_format() {
        let rendered = render(&command(CommandContent::Text {
            body: "See https://example.com".to_string(),
            preview_url: Some(true),
        }))
        .unwrap();

        assert_eq!(rendered.body["text"]["preview_url"], true);
    }

    #[test]
    fn test_template_wire_format() {
        let rendered = render(&command(CommandContent::Template {
            name: "order_update".to_string(),
            language: "en_US".to_string(),
            body_parameters: vec!["Ana".to_string(), "#1042".to_string()],
        }))
        .unwrap();

        let body = &rendered.body;
        assert_eq!(body["type"], "template");
        assert_eq!(body["template"]["name"], "order_update");
        assert_eq!(body["template"]["language"]["code"], "en_US");
        assert_eq!(body["template"]["components"][0]["type"], "body");
        assert_eq!(
            body["template"]["components"][0]["parameters"][0],
            serde_json::json!({"type": "text", "text": "Ana"})
        );
    }

    #[test]
    fn test_template_without_parameters_omits_components() {
        let rendered = render(&command(CommandContent::Template {
            name: "hello_world".to_string(),
            language: "en_US".to_string(),
            body_parameters: vec![],
        }))
        .unwrap();

        assert!(rendered.body["template"].get("components").is_none());
    }

    #[test]
    fn test_media_by_id_wire_format() {
        let rendered = render(&command(CommandContent::Media {
            media: MediaKind::Image,
            source: MediaSource::Id("1013859600285441".to_string()),
            caption: Some("Sunset".to_string()),
            filename: None,
        }))
        .unwrap();

        let expected = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": "15551234567",
            "type": "image",
            "image": {"id": "1013859600285441", "caption": "Sunset"}
        });
        assert_eq!(rendered.body, expected);
    }

    #[test]
    fn test_document_by_link_with_filename() {
        let rendered = render(&command(CommandContent::Media {
            media: MediaKind::Document,
            source: MediaSource::Link("https://example.com/invoice.pdf".to_string()),
            caption: None,
            filename: Some("invoice.pdf".to_string()),
        }))
        .unwrap();

        assert_eq!(rendered.body["type"], "document");
        assert_eq!(rendered.body["document"]["link"], "https://example.com/invoice.pdf");
        assert_eq!(rendered.body["document"]["filename"], "invoice.pdf");
        assert!(rendered.body["document"].get("id").is_none());
    }

    #[test]
    fn test_interactive_buttons_wire_format() {
        let rendered = render(&command(CommandContent::InteractiveButtons {
            body: "Continue?".to_string(),
            buttons: vec![("yes".to_string(), "Yes".to_string())],
            header: None,
            footer: None,
        }))
        .unwrap();

        let body = &rendered.body;
        assert_eq!(body["type"], "interactive");
        assert_eq!(body["interactive"]["type"], "button");
        assert_eq!(body["interactive"]["body"]["text"], "Continue?");
        assert_eq!(
            body["interactive"]["action"]["buttons"][0],
            serde_json::json!({"type": "reply", "reply": {"id": "yes", "title": "Yes"}})
        );
    }

    #[test]
    fn test_interactive_list_wire_format() {
        let rendered = render(&command(CommandContent::InteractiveList {
            body: "Choose an option:".to_string(),
            button: "Open".to_string(),
            sections: vec![(
                "Options".to_string(),
                vec![
                    ("a".to_string(), "First".to_string(), Some("One".to_string())),
                    ("b".to_string(), "Second".to_string(), None),
                ],
            )],
            header: Some("Menu".to_string()),
            footer: None,
        }))
        .unwrap();

        let interactive = &rendered.body["interactive"];
        assert_eq!(interactive["type"], "list");
        assert_eq!(interactive["header"]["type"], "text");
        assert_eq!(interactive["header"]["text"], "Menu");
        assert_eq!(interactive["action"]["button"], "Open");
        assert_eq!(interactive["action"]["sections"][0]["rows"][1]["title"], "Second");
        assert!(
            interactive["action"]["sections"][0]["rows"][1]
                .get("description")
                .is_none()
        );
    }

    #[test]
    fn test_location_wire_format() {
        let rendered = render(&command(CommandContent::Location {
            latitude: 4.711,
            longitude: -74.0721,
            name: Some("Office".to_string()),
            address: None,
        }))
        .unwrap();

        assert_eq!(rendered.body["type"], "location");
        assert_eq!(rendered.body["location"]["latitude"], 4.711);
        assert_eq!(rendered.body["location"]["name"], "Office");
    }

    #[test]
    fn test_reaction_wire_format() {
        let rendered = render(&command(CommandContent::Reaction {
            message_id: "wamid.ABC".to_string(),
            emoji: "\u{1F44D}".to_string(),
        }))
        .unwrap();

        assert_eq!(rendered.body["type"], "reaction");
        assert_eq!(rendered.body["reaction"]["message_id"], "wamid.ABC");
    }

    #[test]
    fn test_mark_as_read_wire_format() {
        let rendered = render(&command(CommandContent::MarkAsRead {
            message_id: "wamid.IN".to_string(),
        }))
        .unwrap();

        let expected = serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": "wamid.IN"
        });
        assert_eq!(rendered.body, expected);
    }

    #[test]
    fn test_render_rejects_tampered_command() {
        // A command mutated after construction must still fail rendering.
        let mut cmd = command(CommandContent::Text {
            body: "ok".to_string(),
            preview_url: None,
        });
        cmd.content = CommandContent::Text {
            body: String::new(),
            preview_url: None,
        };
        assert!(matches!(render(&cmd), Err(RenderError::Invalid(_))));
    }

    #[test]
    fn test_render_is_deterministic() {
        let cmd = command(CommandContent::Text {
            body: "same".to_string(),
            preview_url: None,
        });
        assert_eq!(render(&cmd).unwrap(), render(&cmd).unwrap());
    }
}
