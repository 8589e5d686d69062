//! Client-side real-time feed multiplexer
//!
//! Core library for maintaining one persistent streaming connection per
//! upstream data provider, multiplexing many logical topic subscriptions
//! over each shared connection, and keeping consumers consistent with
//! their latest requested parameters across disconnects and reconnects.

pub mod core;
pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{ParamValue, Params, Topic};
pub use crate::infrastructure::config::{Config, FeedConfig};
pub use crate::ws::{
    Connector, ConnectionManager, ConnectionStatus, Frame, MetricsSnapshot, PushEvent,
    SubscriptionHandle, Transport, TransportError, WsConnector,
};

use thiserror::Error;

/// Main error type for the feed multiplexer
#[derive(Error, Debug)]
pub enum FeedError {
    /// Topic string could not be parsed into provider/channel/instrument
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Topic names a provider with no configured endpoint
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// No live connection for the provider; the subscription stays pending
    /// and is replayed once the connection comes up
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Operation on a handle whose registration was already removed
    #[error("Stale subscription handle")]
    StaleHandle,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FeedError>;
