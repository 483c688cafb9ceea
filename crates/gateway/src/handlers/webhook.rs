use crate::{
    signature,
    state::AppState,
    types::{Change, ChangeValue, ContactInfo, StatusReceipt, WebhookPayload, WebhookVerifyQuery},
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use common::{ErrorKind, InboundEvent, PhoneNumberEvent, ReceiptStatus, StatusEvent, TemplateEvent};
use http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Upstream subscription handshake: echo the challenge iff the verify
/// token matches.
pub async fn verify_webhook(
    Query(query): Query<WebhookVerifyQuery>,
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    match (query.mode.as_deref(), &query.verify_token, &query.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) => {
            if token == &state.config.verify_token {
                info!("webhook verification successful");
                Ok(challenge.clone())
            } else {
                warn!("invalid verify token");
                Err(StatusCode::FORBIDDEN)
            }
        }
        _ => {
            warn!("invalid verification query: {:?}", query);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Webhook intake: verify, parse, dedupe, fan out, 200.
///
/// The synchronous path does no downstream I/O beyond in-process queue
/// pushes, keeping the response well inside the upstream's retry threshold.
/// Body size is bounded by the router's body-limit layer.
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(secret) = state.core.workspaces.webhook_secret(&workspace_id) else {
        warn!(workspace = %workspace_id, "webhook for unknown workspace rejected");
        return StatusCode::UNAUTHORIZED;
    };

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !signature::verify_signature(&secret, &body, provided) {
        warn!(workspace = %workspace_id, kind = %ErrorKind::BadSignature, "webhook signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    // Bad JSON is never retried by returning an error the upstream would
    // redeliver: 400 drops it for good.
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(workspace = %workspace_id, kind = %ErrorKind::BadPayload, %err, "webhook body failed to parse");
            return StatusCode::BAD_REQUEST;
        }
    };

    for entry in payload.entry {
        for change in entry.changes {
            route_change(&state, &workspace_id, change);
        }
    }

    StatusCode::OK
}

/// Demultiplex one change onto the typed internal queues.
fn route_change(state: &AppState, workspace_id: &str, change: Change) {
    match change.field.as_str() {
        "messages" => {
            let value = change.value;
            if let Some(statuses) = &value.statuses {
                for receipt in statuses {
                    fan_out_status(state, workspace_id, receipt);
                }
            }
            if let Some(messages) = &value.messages {
                for message in messages {
                    fan_out_inbound(state, workspace_id, &value, message);
                }
            }
        }
        "message_template_status_update" => fan_out_template(state, workspace_id, &change.value),
        "phone_number_quality_update" => fan_out_phone(state, workspace_id, &change.value),
        other => {
            // Fixed set of queues; unknown kinds are dropped, not caught-all.
            warn!(workspace = %workspace_id, field = %other, "dropping webhook change of unknown kind");
        }
    }
}

fn fan_out_status(state: &AppState, workspace_id: &str, receipt: &StatusReceipt) {
    // Receipts for one message differ by status, so the dedupe id is the
    // (message, status) pair.
    let event_id = format!("{}:{}", receipt.id, receipt.status);
    if !state
        .core
        .webhook_dedupe
        .insert_if_absent(workspace_id, &event_id)
    {
        debug!(event = %event_id, kind = %ErrorKind::DedupeSkip, "skipping replayed status event");
        return;
    }

    let Some(status) = ReceiptStatus::from_upstream(&receipt.status) else {
        warn!(status = %receipt.status, "dropping receipt with unknown status");
        return;
    };

    let (error_detail, error_code) = receipt
        .errors
        .as_ref()
        .and_then(|errors| errors.first())
        .map(|e| {
            let detail = e
                .message
                .clone()
                .or_else(|| e.title.clone())
                .unwrap_or_else(|| format!("upstream error {}", e.code));
            (Some(detail), Some(e.code))
        })
        .unwrap_or((None, None));

    state.core.queues.status_updates.enqueue(StatusEvent {
        workspace_id: workspace_id.to_string(),
        upstream_message_id: receipt.id.clone(),
        status,
        recipient: receipt.recipient_id.clone(),
        error_detail,
        error_code,
        occurred_at: parse_timestamp(receipt.timestamp.as_deref()),
    });
}

fn fan_out_inbound(
    state: &AppState,
    workspace_id: &str,
    value: &ChangeValue,
    message: &serde_json::Value,
) {
    let event_id = match message.get("id").and_then(|id| id.as_str()) {
        Some(id) => id.to_string(),
        // Events without a discernible id get a content-hash id.
        None => content_hash(message.to_string().as_bytes()),
    };
    if !state
        .core
        .webhook_dedupe
        .insert_if_absent(workspace_id, &event_id)
    {
        debug!(event = %event_id, kind = %ErrorKind::DedupeSkip, "skipping replayed inbound event");
        return;
    }

    let Some(from) = message.get("from").and_then(|from| from.as_str()) else {
        warn!(event = %event_id, "dropping inbound message without sender");
        return;
    };

    let phone_number_id = value
        .metadata
        .as_ref()
        .map(|m| m.phone_number_id.clone())
        .unwrap_or_default();
    let sender_name = sender_display_name(value.contacts.as_deref(), from);
    let message_type = message
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown")
        .to_string();
    let occurred_at =
        parse_timestamp(message.get("timestamp").and_then(|ts| ts.as_str()));

    state.core.queues.inbound_messages.enqueue(InboundEvent {
        workspace_id: workspace_id.to_string(),
        phone_number_id,
        upstream_message_id: event_id,
        from: from.to_string(),
        sender_name,
        message_type,
        payload: message.clone(),
        occurred_at,
    });
}

fn fan_out_template(state: &AppState, workspace_id: &str, value: &ChangeValue) {
    let (Some(event), Some(name)) = (&value.event, &value.message_template_name) else {
        warn!("dropping template update without event or name");
        return;
    };
    let language = value
        .message_template_language
        .clone()
        .unwrap_or_else(|| "en_US".to_string());

    let event_id = content_hash(format!("template:{name}:{language}:{event}").as_bytes());
    if !state
        .core
        .webhook_dedupe
        .insert_if_absent(workspace_id, &event_id)
    {
        return;
    }

    state.core.queues.template_updates.enqueue(TemplateEvent {
        workspace_id: workspace_id.to_string(),
        template_name: name.clone(),
        template_language: language,
        event: event.clone(),
        occurred_at: Utc::now(),
    });
}

fn fan_out_phone(state: &AppState, workspace_id: &str, value: &ChangeValue) {
    let phone_number_id = value
        .metadata
        .as_ref()
        .map(|m| m.phone_number_id.clone())
        .or_else(|| value.display_phone_number.clone());
    let Some(phone_number_id) = phone_number_id else {
        warn!("dropping phone-number update without an identifier");
        return;
    };

    let quality = value.event.clone();
    let limit = value
        .current_limit
        .as_deref()
        .and_then(crate::types::parse_limit_tier);

    let event_id = content_hash(
        format!(
            "phone:{phone_number_id}:{}:{}",
            quality.as_deref().unwrap_or(""),
            value.current_limit.as_deref().unwrap_or("")
        )
        .as_bytes(),
    );
    if !state
        .core
        .webhook_dedupe
        .insert_if_absent(workspace_id, &event_id)
    {
        return;
    }

    state
        .core
        .queues
        .phone_number_updates
        .enqueue(PhoneNumberEvent {
            workspace_id: workspace_id.to_string(),
            phone_number_id,
            quality_rating: quality,
            current_limit: limit,
            occurred_at: Utc::now(),
        });
}

fn sender_display_name(contacts: Option<&[ContactInfo]>, from: &str) -> Option<String> {
    let contacts = contacts?;
    contacts
        .iter()
        .find(|c| c.wa_id == from)
        .or_else(|| contacts.first())
        .map(|c| c.profile.name.clone())
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The upstream sends Unix seconds as strings.
fn parse_timestamp(timestamp: Option<&str>) -> DateTime<Utc> {
    timestamp
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::routes::create_route;
    use axum::body::Body;
    use common::{Core, Workspace};
    use http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    fn app_state() -> AppState {
        let core = Core::new(Duration::from_secs(3600));
        core.workspaces
            .register(Workspace::new("ws-1", SECRET));
        AppState::new(test_config(), core)
    }

    fn status_body() -> String {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"phone_number_id": "1029384756"},
                        "statuses": [{
                            "id": "wamid.FOO",
                            "status": "delivered",
                            "timestamp": "1717171717",
                            "recipient_id": "15551234567"
                        }]
                    }
                }]
            }]
        })
        .to_string()
    }

    fn signed_post(body: &str, secret: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/ws-1")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature::sign(secret, body.as_bytes()))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_verification_handshake() {
        let state = app_state();
        let app = create_route(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/ws-1?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn test_verification_rejects_wrong_token() {
        let state = app_state();
        let app = create_route(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/ws-1?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_valid_status_event_is_fanned_out() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let response = app
            .oneshot(signed_post(&status_body(), SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(core.queues.status_updates.len(), 1);

        let delivery = core
            .queues
            .status_updates
            .dequeue(Duration::from_secs(30), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(delivery.payload.upstream_message_id, "wamid.FOO");
        assert_eq!(delivery.payload.status, ReceiptStatus::Delivered);
    }

    /// Same event body twice: the second intake is a no-op.
    #[tokio::test]
    async fn test_replayed_event_is_deduplicated() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let first = app
            .clone()
            .oneshot(signed_post(&status_body(), SECRET))
            .await
            .unwrap();
        let second = app
            .oneshot(signed_post(&status_body(), SECRET))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(core.queues.status_updates.len(), 1);
    }

    /// Signature derived from the wrong secret: 401, queues untouched.
    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let response = app
            .oneshot(signed_post(&status_body(), "not-the-secret"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(core.queues.status_updates.is_empty());
        assert!(core.webhook_dedupe.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workspace_rejected() {
        let state = app_state();
        let app = create_route(state);

        let body = status_body();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ws-unknown")
                    .header(SIGNATURE_HEADER, signature::sign(SECRET, body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_json_dropped_with_400() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let response = app
            .oneshot(signed_post("{not json", SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(core.queues.status_updates.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_message_fanned_out() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"phone_number_id": "1029384756"},
                        "contacts": [{"profile": {"name": "Ana"}, "wa_id": "15551234567"}],
                        "messages": [{
                            "id": "wamid.IN1",
                            "from": "15551234567",
                            "timestamp": "1717171717",
                            "type": "text",
                            "text": {"body": "hola"}
                        }]
                    }
                }]
            }]
        })
        .to_string();

        let response = app.oneshot(signed_post(&body, SECRET)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let delivery = core
            .queues
            .inbound_messages
            .dequeue(Duration::from_secs(30), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(delivery.payload.upstream_message_id, "wamid.IN1");
        assert_eq!(delivery.payload.from, "15551234567");
        assert_eq!(delivery.payload.sender_name.as_deref(), Some("Ana"));
        assert_eq!(delivery.payload.message_type, "text");
        assert_eq!(delivery.payload.payload["text"]["body"], "hola");
    }

    #[tokio::test]
    async fn test_template_and_phone_updates_fanned_out() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [
                    {
                        "field": "message_template_status_update",
                        "value": {
                            "event": "APPROVED",
                            "message_template_name": "order_update",
                            "message_template_language": "en_US"
                        }
                    },
                    {
                        "field": "phone_number_quality_update",
                        "value": {
                            "display_phone_number": "15550001111",
                            "event": "RED",
                            "current_limit": "TIER_1K"
                        }
                    }
                ]
            }]
        })
        .to_string();

        let response = app.oneshot(signed_post(&body, SECRET)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(core.queues.template_updates.len(), 1);
        assert_eq!(core.queues.phone_number_updates.len(), 1);

        let phone = core
            .queues
            .phone_number_updates
            .dequeue(Duration::from_secs(30), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(phone.payload.current_limit, Some(1_000));
    }

    #[tokio::test]
    async fn test_unknown_change_kind_dropped() {
        let state = app_state();
        let core = state.core.clone();
        let app = create_route(state);

        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{"field": "account_review_update", "value": {}}]
            }]
        })
        .to_string();

        let response = app.oneshot(signed_post(&body, SECRET)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(core.queues.status_updates.is_empty());
        assert!(core.queues.inbound_messages.is_empty());
        assert!(core.queues.template_updates.is_empty());
        assert!(core.queues.phone_number_updates.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = test_config();
        config.max_body_bytes = 64;
        let core = Core::new(Duration::from_secs(3600));
        core.workspaces.register(Workspace::new("ws-1", SECRET));
        let app = create_route(AppState::new(config, core));

        let body = "x".repeat(1024);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/ws-1")
                    .header(SIGNATURE_HEADER, signature::sign(SECRET, body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
