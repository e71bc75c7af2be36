//! bwlimit-core: limit values and configuration shared by the engine and the daemon.

pub mod config;
pub mod limit;

pub use config::{BwlimitConfig, ConfigError, LimitsConfig};
pub use limit::{Limit, MAX_BURST};
