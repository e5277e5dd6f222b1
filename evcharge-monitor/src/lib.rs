//! Command-line monitor for a single EV charging session.
//!
//! Follows the session through a shared
//! [`ChargeProvider`](evcharge::ChargeProvider) and logs every derived state
//! change until interrupted.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`util`] - Signal handling

pub mod config;
pub mod util;

pub use config::{ConfigError, MonitorConfig};
