pub mod executor;
pub mod reducer;

pub use executor::{CampaignExecutor, ExecutorConfig, ExecutorError};
pub use reducer::{apply_counter_event, spawn_reducer};
