use crate::config::DispatcherConfig;
use crate::renderer::RenderedRequest;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, warn};

/// Idempotency header carried on every send; the value is the message id.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Fallback wait when the upstream rate-limits without a Retry-After.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Classified result of one upstream send attempt.
///
/// The client never returns a raw error: every HTTP status, parse failure
/// and transport error maps onto exactly one of these, and the dispatcher
/// acts on the variant alone.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted {
        upstream_message_id: String,
    },
    TransientFailure {
        retry_after: Option<Duration>,
        reason: String,
    },
    PermanentFailure {
        code: Option<u32>,
        reason: String,
        /// 401/403: the number's token needs an out-of-band refresh.
        auth: bool,
    },
    RateLimited {
        retry_after: Duration,
    },
}

/// One fully prepared upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub rendered: RenderedRequest,
    pub idempotency_key: String,
    pub access_token: String,
}

/// Seam between the dispatcher and the Cloud API transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Outcome;
}

/// Success response body for the `/messages` resource.
#[derive(Deserialize, Debug)]
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Deserialize, Debug)]
struct SentMessage {
    id: String,
}

/// Error response shape of the Cloud API.
#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
    code: u32,
    error_data: Option<serde_json::Value>,
}

/// HTTP client for the Cloud API `/messages` resource.
pub struct UpstreamClient {
    http_client: reqwest::Client,
    config: DispatcherConfig,
}

impl UpstreamClient {
    pub fn new(config: DispatcherConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.total_timeout())
            .user_agent("bsp-outbound/1.0")
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn send(&self, request: UpstreamRequest) -> Outcome {
        let url = self.config.upstream_url(&request.rendered.path);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match HeaderValue::from_str(&format!("Bearer {}", request.access_token)) {
            Ok(value) => headers.insert(AUTHORIZATION, value),
            Err(_) => {
                return Outcome::PermanentFailure {
                    code: None,
                    reason: "access token is not a valid header value".to_string(),
                    auth: true,
                };
            }
        };
        if let Ok(value) = HeaderValue::from_str(&request.idempotency_key) {
            headers.insert(IDEMPOTENCY_HEADER, value);
        }

        let response = match self
            .http_client
            .post(&url)
            .headers(headers)
            .json(&request.rendered.body)
            .send()
            .await
        {
            Ok(response) => response,
            // Connect errors, DNS failures, TLS errors and timeouts all
            // land here and are retryable.
            Err(err) => {
                return Outcome::TransientFailure {
                    retry_after: None,
                    reason: format!("transport error: {}", err),
                };
            }
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return Outcome::TransientFailure {
                    retry_after: None,
                    reason: format!("failed reading response body: {}", err),
                };
            }
        };

        classify_response(status, retry_after, &body)
    }
}

/// Map an upstream response onto an [`Outcome`]. Pure, exhaustively tested.
pub fn classify_response(status: u16, retry_after: Option<Duration>, body: &str) -> Outcome {
    match status {
        200..=299 => match serde_json::from_str::<SendResponse>(body) {
            Ok(parsed) => match parsed.messages.into_iter().next() {
                Some(message) => Outcome::Accepted {
                    upstream_message_id: message.id,
                },
                None => {
                    error!("upstream 2xx carried no message id: {}", body);
                    Outcome::TransientFailure {
                        retry_after: None,
                        reason: "2xx response without message id".to_string(),
                    }
                }
            },
            Err(err) => {
                error!("failed to parse upstream 2xx body ({}): {}", err, body);
                Outcome::TransientFailure {
                    retry_after: None,
                    reason: format!("unparseable 2xx response: {}", err),
                }
            }
        },

        401 | 403 => {
            let (code, reason) = parse_api_error(body)
                .map(|e| (Some(e.code), e.message))
                .unwrap_or((None, format!("authentication rejected (HTTP {})", status)));
            Outcome::PermanentFailure {
                code,
                reason,
                auth: true,
            }
        }

        429 => {
            let wait = retry_after
                .or_else(|| retry_after_from_error_data(body))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Outcome::RateLimited { retry_after: wait }
        }

        400..=499 => {
            let (code, reason) = parse_api_error(body)
                .map(|e| (Some(e.code), e.message))
                .unwrap_or((None, format!("upstream rejected request (HTTP {})", status)));
            Outcome::PermanentFailure {
                code,
                reason,
                auth: false,
            }
        }

        500..=599 => Outcome::TransientFailure {
            retry_after,
            reason: format!("upstream server error (HTTP {})", status),
        },

        other => {
            warn!("unexpected upstream status {}", other);
            Outcome::TransientFailure {
                retry_after,
                reason: format!("unexpected upstream status {}", other),
            }
        }
    }
}

fn parse_api_error(body: &str) -> Option<ApiError> {
    serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .map(|r| r.error)
}

/// Some 429 responses advertise the wait inside error_data instead of the
/// Retry-After header.
fn retry_after_from_error_data(body: &str) -> Option<Duration> {
    parse_api_error(body)?
        .error_data?
        .get("retry_after")?
        .as_u64()
        .map(Duration::from_secs)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
