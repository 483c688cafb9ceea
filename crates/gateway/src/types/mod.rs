pub mod payload;

pub use payload::*;

use serde::Deserialize;

/// Query parameters of the upstream webhook verification handshake.
#[derive(Deserialize, Debug)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}
