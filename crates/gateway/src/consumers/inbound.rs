use super::Disposition;
use common::{Core, InboundEvent, Message, MessageKind};
use tracing::debug;

/// Persist one user-initiated message.
///
/// Resolves (or creates) the contact, then writes an INBOUND message row
/// carrying the raw upstream payload. Media references inside the payload
/// stay opaque upstream media ids, resolved lazily when downloaded.
/// Redeliveries are no-ops: the upstream message id is already indexed.
pub(crate) fn apply_inbound_event(core: &Core, event: &InboundEvent) -> Disposition {
    if core
        .messages
        .get_by_upstream_id(&event.upstream_message_id)
        .is_some()
    {
        debug!(upstream = %event.upstream_message_id, "inbound message already persisted");
        return Disposition::Ack;
    }

    let contact = core.contacts.resolve_or_create(
        &event.workspace_id,
        &event.from,
        &event.from,
        event.sender_name.as_deref(),
    );

    let message = Message::new_inbound(
        event.workspace_id.clone(),
        event.phone_number_id.clone(),
        infer_kind(&event.message_type),
        event.from.clone(),
        event.upstream_message_id.clone(),
        event.payload.clone(),
    );
    let message_id = message.id;
    let _ = core.messages.insert(message);

    debug!(
        message = %message_id,
        contact = %contact.id,
        kind = %event.message_type,
        "inbound message persisted"
    );
    Disposition::Ack
}

fn infer_kind(message_type: &str) -> MessageKind {
    match message_type {
        "text" | "button" => MessageKind::Text,
        "image" | "video" | "audio" | "document" | "sticker" => MessageKind::Media,
        "location" => MessageKind::Location,
        "reaction" => MessageKind::Reaction,
        "interactive" => MessageKind::Interactive,
        _ => MessageKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::Direction;
    use std::time::Duration;

    fn text_event(upstream_id: &str) -> InboundEvent {
        InboundEvent {
            workspace_id: "ws-1".to_string(),
            phone_number_id: "1029384756".to_string(),
            upstream_message_id: upstream_id.to_string(),
            from: "15551234567".to_string(),
            sender_name: Some("Ana".to_string()),
            message_type: "text".to_string(),
            payload: serde_json::json!({
                "id": upstream_id,
                "from": "15551234567",
                "type": "text",
                "text": {"body": "hola"}
            }),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_inbound_creates_contact_and_row() {
        let core = Core::new(Duration::from_secs(60));
        apply_inbound_event(&core, &text_event("wamid.IN1"));

        let contact = core.contacts.get("ws-1", "15551234567").unwrap();
        assert_eq!(contact.display_name.as_deref(), Some("Ana"));

        let row = core.messages.get_by_upstream_id("wamid.IN1").unwrap();
        assert_eq!(row.direction, Direction::Inbound);
        assert_eq!(row.kind, MessageKind::Text);
        assert_eq!(row.counterpart, "15551234567");
        assert_eq!(row.payload["text"]["body"], "hola");
    }

    #[test]
    fn test_redelivered_inbound_event_is_noop() {
        let core = Core::new(Duration::from_secs(60));
        apply_inbound_event(&core, &text_event("wamid.IN1"));
        apply_inbound_event(&core, &text_event("wamid.IN1"));

        assert_eq!(core.contacts.len(), 1);
        // Exactly one row answers to the upstream id.
        let row = core.messages.get_by_upstream_id("wamid.IN1").unwrap();
        assert_eq!(row.upstream_message_id.as_deref(), Some("wamid.IN1"));
    }

    #[test]
    fn test_media_message_keeps_opaque_media_id() {
        let core = Core::new(Duration::from_secs(60));
        let mut event = text_event("wamid.IMG");
        event.message_type = "image".to_string();
        event.payload = serde_json::json!({
            "id": "wamid.IMG",
            "from": "15551234567",
            "type": "image",
            "image": {"id": "1013859600285441", "mime_type": "image/jpeg", "sha256": "abc"}
        });
        apply_inbound_event(&core, &event);

        let row = core.messages.get_by_upstream_id("wamid.IMG").unwrap();
        assert_eq!(row.kind, MessageKind::Media);
        assert_eq!(row.payload["image"]["id"], "1013859600285441");
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(infer_kind("text"), MessageKind::Text);
        assert_eq!(infer_kind("sticker"), MessageKind::Media);
        assert_eq!(infer_kind("location"), MessageKind::Location);
        assert_eq!(infer_kind("reaction"), MessageKind::Reaction);
        assert_eq!(infer_kind("interactive"), MessageKind::Interactive);
        assert_eq!(infer_kind("something_new"), MessageKind::Text);
    }
}
