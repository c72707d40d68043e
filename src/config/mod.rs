//! TOML configuration for the server, the scheduler and the client.

mod loader;
mod store;
mod types;

pub use loader::ConfigError;
pub use store::ConfigStore;
pub use types::{ClientConfig, Config, SchedulerConfig, ServerConfig};
