use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Field limits published by the WhatsApp Cloud API.
pub const MAX_TEXT_BODY_LENGTH: usize = 4096;
pub const MAX_CAPTION_LENGTH: usize = 1024;
pub const MAX_BUTTON_TITLE_LENGTH: usize = 20;
pub const MAX_BUTTON_ID_LENGTH: usize = 256;
pub const MAX_LIST_SECTION_TITLE_LENGTH: usize = 24;
pub const MAX_LIST_ROW_DESCRIPTION_LENGTH: usize = 72;
pub const MAX_BUTTONS_PER_MESSAGE: usize = 3;
pub const MAX_LIST_SECTIONS: usize = 10;
pub const MAX_LIST_ROWS_TOTAL: usize = 10;
pub const MAX_TEMPLATE_NAME_LENGTH: usize = 512;
pub const MAX_URL_LENGTH: usize = 2048;

/// Validation failure for a single command field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid recipient: {0}")]
    Recipient(String),

    #[error("invalid content: {0}")]
    Content(String),
}

type ValidationResult = Result<(), ValidationError>;

/// Validate a recipient phone number.
///
/// The Cloud API addresses recipients as E.164 digits without the leading
/// plus sign, e.g. `15551234567`.
pub fn validate_recipient(to: &str) -> ValidationResult {
    static RECIPIENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = RECIPIENT_REGEX
        .get_or_init(|| Regex::new(r"^[1-9]\d{6,14}$").expect("Invalid recipient regex"));

    if !regex.is_match(to) {
        return Err(ValidationError::Recipient(format!(
            "recipient must be E.164 digits without '+': {}",
            to
        )));
    }

    Ok(())
}

/// Validate text message body (non-empty, within the published limit).
pub fn validate_text_body(body: &str) -> ValidationResult {
    if body.is_empty() {
        return Err(ValidationError::Content("text body cannot be empty".to_string()));
    }

    if body.len() > MAX_TEXT_BODY_LENGTH {
        return Err(ValidationError::Content(format!(
            "text body too long: {} characters (max {})",
            body.len(),
            MAX_TEXT_BODY_LENGTH
        )));
    }

    Ok(())
}

/// Validate an optional media caption.
pub fn validate_caption(caption: &str) -> ValidationResult {
    if caption.len() > MAX_CAPTION_LENGTH {
        return Err(ValidationError::Content(format!(
            "caption too long: {} characters (max {})",
            caption.len(),
            MAX_CAPTION_LENGTH
        )));
    }

    Ok(())
}

/// Validate an interactive reply button.
pub fn validate_button(id: &str, title: &str) -> ValidationResult {
    if id.is_empty() || id.len() > MAX_BUTTON_ID_LENGTH {
        return Err(ValidationError::Content(format!(
            "button id must be 1-{} characters",
            MAX_BUTTON_ID_LENGTH
        )));
    }

    if title.is_empty() || title.len() > MAX_BUTTON_TITLE_LENGTH {
        return Err(ValidationError::Content(format!(
            "button title must be 1-{} characters",
            MAX_BUTTON_TITLE_LENGTH
        )));
    }

    Ok(())
}

/// Validate a list section title and its rows.
pub fn validate_list_section(
    title: &str,
    rows: &[(String, String, Option<String>)],
) -> ValidationResult {
    if title.is_empty() || title.len() > MAX_LIST_SECTION_TITLE_LENGTH {
        return Err(ValidationError::Content(format!(
            "list section title must be 1-{} characters",
            MAX_LIST_SECTION_TITLE_LENGTH
        )));
    }

    if rows.is_empty() {
        return Err(ValidationError::Content(
            "list section must have at least one row".to_string(),
        ));
    }

    for (id, row_title, description) in rows {
        validate_button(id, row_title)?;
        if let Some(desc) = description {
            if desc.len() > MAX_LIST_ROW_DESCRIPTION_LENGTH {
                return Err(ValidationError::Content(format!(
                    "list row description too long: {} characters (max {})",
                    desc.len(),
                    MAX_LIST_ROW_DESCRIPTION_LENGTH
                )));
            }
        }
    }

    Ok(())
}

/// Validate an uploaded media id (numeric string per the Cloud API).
pub fn validate_media_id(media_id: &str) -> ValidationResult {
    if media_id.is_empty() || !media_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::Content(format!(
            "media id must be a non-empty numeric string: {}",
            media_id
        )));
    }

    Ok(())
}

/// Validate a hosted media URL.
pub fn validate_url(url: &str) -> ValidationResult {
    if url.is_empty() || url.len() > MAX_URL_LENGTH {
        return Err(ValidationError::Content(format!(
            "url must be 1-{} characters",
            MAX_URL_LENGTH
        )));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::Content(
            "url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

/// Validate location coordinates.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> ValidationResult {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::Content(format!(
            "invalid latitude: {} (must be between -90 and 90)",
            latitude
        )));
    }

    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::Content(format!(
            "invalid longitude: {} (must be between -180 and 180)",
            longitude
        )));
    }

    Ok(())
}

/// Validate a template name (lowercase, digits and underscores).
pub fn validate_template_name(name: &str) -> ValidationResult {
    static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = TEMPLATE_REGEX
        .get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("Invalid template name regex"));

    if name.is_empty() || name.len() > MAX_TEMPLATE_NAME_LENGTH || !regex.is_match(name) {
        return Err(ValidationError::Content(format!(
            "template name must be lowercase snake_case: {}",
            name
        )));
    }

    Ok(())
}

/// Validate an upstream message id being referenced (reactions, mark-as-read).
pub fn validate_upstream_message_id(id: &str) -> ValidationResult {
    if id.is_empty() {
        return Err(ValidationError::Content(
            "referenced message id cannot be empty".to_string(),
        ));
    }

    Ok(())
}
