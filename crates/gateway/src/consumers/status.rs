use super::Disposition;
use common::{
    AdvanceOutcome, Core, CounterEvent, CounterField, ErrorKind, LastError, MessageStatus,
    ReceiptStatus, StatusEvent,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Apply one delivery receipt to its message row.
///
/// Receipts for one upstream message id can arrive out of order or be
/// replayed; the store's rank CAS accepts only forward transitions. A
/// receipt that arrives before the row reached SENT is buffered for one
/// grace period (delayed redelivery); on its second delivery the receipt is
/// taken to imply the missing SENT and applied directly.
pub(crate) fn apply_status_event(
    core: &Core,
    event: &StatusEvent,
    delivery_count: u32,
    grace: Duration,
) -> Disposition {
    let target = match event.status {
        ReceiptStatus::Sent => MessageStatus::Sent,
        ReceiptStatus::Delivered => MessageStatus::Delivered,
        ReceiptStatus::Read => MessageStatus::Read,
        ReceiptStatus::Failed => MessageStatus::Failed,
    };

    let error = (target == MessageStatus::Failed).then(|| LastError {
        kind: ErrorKind::PermanentUpstream,
        detail: event
            .error_detail
            .clone()
            .unwrap_or_else(|| "upstream reported failure".to_string()),
        upstream_code: event.error_code,
    });

    let imply_earlier = delivery_count > 1;
    let outcome = core.messages.advance_by_receipt(
        &event.upstream_message_id,
        target,
        event.occurred_at,
        error,
        imply_earlier,
    );

    match outcome {
        AdvanceOutcome::Advanced {
            campaign_id,
            implied_send,
        } => {
            debug!(upstream = %event.upstream_message_id, status = ?event.status, "receipt applied");
            if let Some(campaign_id) = campaign_id {
                if implied_send {
                    core.queues
                        .campaign_counters
                        .enqueue(CounterEvent::new(campaign_id, CounterField::Sent));
                }
                let field = match event.status {
                    // The dispatcher already counted the send.
                    ReceiptStatus::Sent => None,
                    ReceiptStatus::Delivered => Some(CounterField::Delivered),
                    ReceiptStatus::Read => Some(CounterField::Read),
                    ReceiptStatus::Failed => Some(CounterField::Failed),
                };
                if let Some(field) = field {
                    core.queues
                        .campaign_counters
                        .enqueue(CounterEvent::new(campaign_id, field));
                }
            }
            Disposition::Ack
        }

        AdvanceOutcome::Stale | AdvanceOutcome::Terminal => {
            debug!(upstream = %event.upstream_message_id, "receipt is stale, dropping");
            Disposition::Ack
        }

        AdvanceOutcome::Early => Disposition::Retry(grace),

        AdvanceOutcome::NotFound => {
            if delivery_count == 1 {
                // The SENT write may still be in flight; give it the grace.
                Disposition::Retry(grace)
            } else {
                warn!(upstream = %event.upstream_message_id, "receipt for unknown message, dropping");
                Disposition::Ack
            }
        }
    }
}
