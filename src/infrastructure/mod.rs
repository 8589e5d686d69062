//! Infrastructure - cold path only
//!
//! This module contains non-latency-critical code:
//! - Logging
//! - Configuration management

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, FeedConfig};
pub use logging::init_logging;
