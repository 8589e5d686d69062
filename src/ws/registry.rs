//! Connection registry
//!
//! Maps provider id to its connection handle, creating connections lazily
//! on first access. Creation starts the asynchronous connect sequence
//! immediately; callers never block on it. At most one live connection
//! exists per provider id.

use crate::ws::connection::{
    ConnCommand, ConnEvent, ConnTuning, ConnectionHandle, ConnectionStatus, MetricsSnapshot,
};
use crate::ws::frame::Frame;
use crate::ws::transport::Connector;
use crate::{FeedError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Registry of per-provider connections
pub struct ConnectionRegistry<C: Connector> {
    connector: Arc<C>,
    tuning: ConnTuning,
    events: mpsc::UnboundedSender<ConnEvent>,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C, tuning: ConnTuning, events: mpsc::UnboundedSender<ConnEvent>) -> Self {
        Self {
            connector: Arc::new(connector),
            tuning,
            events,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Get the provider's connection, spawning it on first access
    pub fn get_or_create(&self, provider: &str, url: &str) -> ConnectionHandle {
        self.get_or_create_tracked(provider, url).0
    }

    /// Like `get_or_create`, also reporting whether this call created it
    pub fn get_or_create_tracked(&self, provider: &str, url: &str) -> (ConnectionHandle, bool) {
        if let Some(handle) = self.connections.read().get(provider) {
            return (handle.clone(), false);
        }
        let mut connections = self.connections.write();
        // lost the race to another caller
        if let Some(handle) = connections.get(provider) {
            return (handle.clone(), false);
        }
        tracing::info!(provider = %provider, url = %url, "opening connection");
        let handle = ConnectionHandle::spawn(
            provider.to_string(),
            url.to_string(),
            self.connector.clone(),
            self.tuning.clone(),
            self.events.clone(),
        );
        connections.insert(provider.to_string(), handle.clone());
        (handle, true)
    }

    pub fn get(&self, provider: &str) -> Option<ConnectionHandle> {
        self.connections.read().get(provider).cloned()
    }

    /// Route a frame to the provider's live connection
    ///
    /// # Errors
    /// `NotConnected` when no connection exists or it is not up; the caller
    /// keeps the subscription pending and relies on replay.
    pub fn send(&self, provider: &str, frame: Frame) -> Result<()> {
        match self.connections.read().get(provider) {
            Some(handle) => handle.send_frame(frame),
            None => Err(FeedError::NotConnected(provider.to_string())),
        }
    }

    /// Point-in-time copy of every known connection's status
    pub fn all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.connections
            .read()
            .iter()
            .map(|(provider, handle)| (provider.clone(), handle.status()))
            .collect()
    }

    /// Point-in-time copy of every known connection's metrics
    pub fn all_metrics(&self) -> HashMap<String, MetricsSnapshot> {
        self.connections
            .read()
            .iter()
            .map(|(provider, handle)| (provider.clone(), handle.metrics()))
            .collect()
    }

    /// Command every connection to close; terminal
    pub fn shutdown_all(&self) {
        for handle in self.connections.read().values() {
            handle.command(ConnCommand::Shutdown);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}
