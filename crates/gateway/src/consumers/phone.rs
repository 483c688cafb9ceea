use super::Disposition;
use common::{Core, PhoneNumberEvent, QualityRating};
use tracing::{debug, warn};

/// Apply a quality-rating / messaging-limit change to the number's row.
pub(crate) fn apply_phone_event(core: &Core, event: &PhoneNumberEvent) -> Disposition {
    let quality = event
        .quality_rating
        .as_deref()
        .map(QualityRating::from_upstream);

    match core
        .phone_numbers
        .apply_update(&event.phone_number_id, quality, event.current_limit)
    {
        Ok(()) => {
            debug!(
                number = %event.phone_number_id,
                quality = ?quality,
                limit = ?event.current_limit,
                "phone number updated"
            );
        }
        Err(err) => {
            warn!(number = %event.phone_number_id, %err, "quality update for unregistered number");
        }
    }
    Disposition::Ack
}
