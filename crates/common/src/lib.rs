pub mod campaign;
pub mod command;
pub mod core;
pub mod errors;
pub mod events;
pub mod message;
pub mod queue;
pub mod store;
pub mod submit;
pub mod tenancy;
pub mod validate;

// Re-export the core types that other crates will use
pub use campaign::*;
pub use command::*;
pub use crate::core::*;
pub use errors::*;
pub use events::*;
pub use message::*;
pub use queue::{Delivery, InMemoryQueue, QueueItem, Receipt};
pub use store::*;
pub use submit::submit;
pub use tenancy::*;
