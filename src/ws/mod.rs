//! Streaming connection layer for real-time feed data

pub mod connection;
pub mod frame;
pub mod manager;
pub mod registry;
pub mod subscription;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionStatus, MetricsSnapshot};
pub use frame::Frame;
pub use manager::{ConnectionManager, PushEvent, SubscriptionHandle};
pub use registry::ConnectionRegistry;
pub use subscription::{HandleId, SubscriptionTable, TopicKey, WireState};
pub use transport::{Connector, Transport, TransportError, WsConnector, WsTransport};
