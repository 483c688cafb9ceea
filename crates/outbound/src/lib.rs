pub mod client;
pub mod config;
pub mod limiter;
pub mod renderer;
pub mod worker;

pub use client::{Outcome, Upstream, UpstreamClient, UpstreamRequest};
pub use config::DispatcherConfig;
pub use limiter::{Acquisition, SendRateLimiter, effective_number_rate};
pub use renderer::{RenderError, RenderedRequest, render};
pub use worker::{Dispatcher, DispatcherHandle, backoff_delay};
