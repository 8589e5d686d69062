//! Connection manager: the public entry point
//!
//! Owns the connection registry and the subscription table; implements the
//! subscribe/unsubscribe protocol, resubscription after reconnect, and
//! atomic parameter changes. One manager instance is explicitly constructed
//! and injected by the application root; tests build independent instances.
//!
//! Connectivity failures never surface from these calls: they are absorbed
//! into the connection state machine and observable via `status`. Only
//! malformed input (bad topic, unknown provider) fails synchronously.

use crate::core::{Params, Topic};
use crate::infrastructure::config::Config;
use crate::ws::connection::{ConnCommand, ConnEvent, ConnectionStatus, MetricsSnapshot};
use crate::ws::frame::Frame;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::subscription::{
    HandleId, SubscribedWait, SubscriptionTable, TopicKey, UnregisterOutcome,
};
use crate::ws::transport::{Connector, WsConnector};
use crate::{FeedError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One inbound push delivered to consumer callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub topic: Topic,
    pub params: Params,
    /// Opaque provider payload, forwarded verbatim
    pub payload: Value,
}

/// One consumer's registration against a key
///
/// Owned by the consumer; disposing it through `unsubscribe` removes exactly
/// this registration and is idempotent.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: HandleId,
    key: TopicKey,
    created_at: SystemTime,
    disposed: AtomicBool,
}

impl SubscriptionHandle {
    fn new(id: HandleId, key: TopicKey) -> Self {
        Self {
            id,
            key,
            created_at: SystemTime::now(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        self.key.topic()
    }

    pub fn params(&self) -> &Params {
        self.key.params()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Client-side multiplexer over per-provider streaming connections
pub struct ConnectionManager<C: Connector = WsConnector> {
    config: Config,
    registry: Arc<ConnectionRegistry<C>>,
    table: Arc<Mutex<SubscriptionTable>>,
    dispatch: JoinHandle<()>,
}

impl ConnectionManager<WsConnector> {
    /// Manager over real WebSocket connections, timers from config
    pub fn new(config: Config) -> Self {
        let connector = WsConnector::new(config.connect_timeout());
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Manager over a custom connector (tests use an in-memory one)
    pub fn with_connector(config: Config, connector: C) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ConnectionRegistry::new(
            connector,
            config.tuning(),
            events_tx,
        ));
        let table = Arc::new(Mutex::new(SubscriptionTable::new()));
        let dispatch = tokio::spawn(dispatch_loop(table.clone(), registry.clone(), events_rx));
        Self {
            config,
            registry,
            table,
            dispatch,
        }
    }

    /// Register a consumer for a topic with the given parameters
    ///
    /// Resolves once the registration exists; the wire subscription may
    /// still be in flight and initial data can arrive later. Identical
    /// (topic, params) registrations share one upstream subscription.
    ///
    /// # Errors
    /// `InvalidTopic` for a malformed topic string, `UnknownProvider` when
    /// no endpoint is configured for the topic's provider. Network failures
    /// are never surfaced here; they show up in `status`.
    pub fn subscribe<F>(&self, topic: &str, callback: F, params: Params) -> Result<SubscriptionHandle>
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let topic: Topic = topic.parse()?;
        let url = self
            .config
            .endpoint(&topic.provider)
            .ok_or_else(|| FeedError::UnknownProvider(topic.provider.clone()))?
            .to_string();
        let key = TopicKey::new(topic, params);
        let provider = key.provider().to_string();

        self.registry.get_or_create(&provider, &url);

        // Registration and the first send happen under one lock so the
        // replay path can never slip in between them and double-send
        let (id, created) = {
            let mut table = self.table.lock();
            let (id, created) = table.register(key.clone(), Arc::new(callback));
            if created {
                self.flush_subscribe(&mut table, &key);
            }
            (id, created)
        };
        tracing::debug!(key = %key, handle = %id, created, "registered subscription");
        Ok(SubscriptionHandle::new(id, key))
    }

    /// Dispose one registration; idempotent
    ///
    /// Sends the wire unsubscribe only when this was the last registration
    /// for the key.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if handle.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let outcome = self.table.lock().unregister(&handle.key, handle.id);
        if outcome == UnregisterOutcome::RemovedLast {
            // A failure here is fine: the entry is gone, so the key is not
            // replayed after reconnect
            if let Err(e) = self
                .registry
                .send(handle.key.provider(), handle.key.unsubscribe_frame())
            {
                tracing::debug!(key = %handle.key, error = %e, "unsubscribe not sent");
            }
        }
        tracing::debug!(key = %handle.key, handle = %handle.id, ?outcome, "unregistered");
    }

    /// Change the parameters of an existing subscription
    ///
    /// Keeps the callback, issues a fresh handle, and consumes the old one.
    /// The new registration is created before the old one is removed, under
    /// a single table lock, so the consumer always holds at least one active
    /// registration and a rapid sequence of changes settles on exactly the
    /// last requested parameter set with intermediate keys fully cleaned up.
    ///
    /// # Errors
    /// `StaleHandle` if the handle was already disposed.
    pub fn resubscribe(
        &self,
        handle: SubscriptionHandle,
        params: Params,
    ) -> Result<SubscriptionHandle> {
        if handle.is_disposed() {
            return Err(FeedError::StaleHandle);
        }
        let new_key = TopicKey::new(handle.key.topic().clone(), params);
        if new_key == handle.key {
            return Ok(handle);
        }

        let (new_id, removed_last) = {
            let mut table = self.table.lock();
            let callback = table
                .callback_of(&handle.key, handle.id)
                .ok_or(FeedError::StaleHandle)?;
            let (new_id, created) = table.register(new_key.clone(), callback);
            let removed_last =
                table.unregister(&handle.key, handle.id) == UnregisterOutcome::RemovedLast;
            if created {
                self.flush_subscribe(&mut table, &new_key);
            }
            (new_id, removed_last)
        };
        handle.disposed.store(true, Ordering::Release);

        if removed_last {
            if let Err(e) = self
                .registry
                .send(handle.key.provider(), handle.key.unsubscribe_frame())
            {
                tracing::debug!(key = %handle.key, error = %e, "unsubscribe not sent");
            }
        }
        tracing::debug!(from = %handle.key, to = %new_key, "parameters changed");
        Ok(SubscriptionHandle::new(new_id, new_key))
    }

    /// Wait until the handle's key is subscribed on a live connection
    ///
    /// Returns false if the registration went away first (disposed or
    /// superseded by a later parameter change); no spurious success is ever
    /// reported for an intermediate key.
    pub async fn subscribed(&self, handle: &SubscriptionHandle) -> bool {
        let wait = self.table.lock().subscribed_wait(&handle.key);
        match wait {
            SubscribedWait::Ready => true,
            SubscribedWait::Gone => false,
            SubscribedWait::Waiting(rx) => rx.await.is_ok(),
        }
    }

    /// Ensure a connection to the provider exists and is coming up
    ///
    /// # Errors
    /// `UnknownProvider` when no endpoint is configured.
    pub fn connect(&self, provider: &str) -> Result<()> {
        let url = self
            .config
            .endpoint(provider)
            .ok_or_else(|| FeedError::UnknownProvider(provider.to_string()))?
            .to_string();
        let (handle, created) = self.registry.get_or_create_tracked(provider, &url);
        if !created && handle.status() == ConnectionStatus::Disconnected {
            handle.command(ConnCommand::Reconnect);
        }
        Ok(())
    }

    /// Close the provider's transport and stay down until reconnected
    pub fn disconnect(&self, provider: &str) {
        if let Some(handle) = self.registry.get(provider) {
            handle.command(ConnCommand::Disconnect);
        }
    }

    /// Drop the provider's transport and reconnect immediately
    pub fn reconnect(&self, provider: &str) {
        if let Some(handle) = self.registry.get(provider) {
            handle.command(ConnCommand::Reconnect);
        }
    }

    /// Manual heartbeat probe; does not block on the response
    pub fn ping(&self, provider: &str) {
        if let Some(handle) = self.registry.get(provider) {
            handle.command(ConnCommand::Ping);
        }
    }

    pub fn status(&self, provider: &str) -> Option<ConnectionStatus> {
        self.registry.get(provider).map(|h| h.status())
    }

    pub fn metrics(&self, provider: &str) -> Option<MetricsSnapshot> {
        self.registry.get(provider).map(|h| h.metrics())
    }

    /// Point-in-time copy of every known connection's status
    pub fn all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.registry.all_statuses()
    }

    /// Point-in-time copy of every known connection's metrics
    pub fn all_metrics(&self) -> HashMap<String, MetricsSnapshot> {
        self.registry.all_metrics()
    }

    /// Close every connection and stop dispatching
    pub fn shutdown(&self) {
        self.registry.shutdown_all();
        self.dispatch.abort();
    }

    /// Send the subscribe frame for a fresh key, or leave it pending for
    /// replay when the connection is not up yet
    ///
    /// Runs under the caller's table lock; the send is a non-blocking
    /// channel push, and keeping the lock held from registration through
    /// the state mark guarantees at most one outstanding subscribe per key.
    fn flush_subscribe(&self, table: &mut SubscriptionTable, key: &TopicKey) {
        let frame = Frame::Subscribe {
            topic: key.topic().clone(),
            params: key.params().clone(),
        };
        match self.registry.send(key.provider(), frame) {
            Ok(()) => table.mark_subscribed(key),
            Err(_) => table.mark_pending(key),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("subscriptions", &self.table.lock().len())
            .finish()
    }
}

/// Demultiplex connection events: replay on up, pend on down, fan out pushes
async fn dispatch_loop<C: Connector>(
    table: Arc<Mutex<SubscriptionTable>>,
    registry: Arc<ConnectionRegistry<C>>,
    mut events: mpsc::UnboundedReceiver<ConnEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnEvent::Up { provider } => {
                // One lock scope for collect + send + mark, mirroring the
                // subscribe path; sends are non-blocking channel pushes
                let replayed = {
                    let mut table = table.lock();
                    let frames = table.begin_replay(&provider);
                    let replayed = frames.len();
                    for (key, frame) in frames {
                        match registry.send(&provider, frame) {
                            Ok(()) => table.mark_subscribed(&key),
                            Err(_) => table.mark_pending(&key),
                        }
                    }
                    replayed
                };
                if replayed > 0 {
                    tracing::info!(provider = %provider, replayed, "resubscribed after connect");
                }
            }
            ConnEvent::Down { provider } => {
                let affected = table.lock().mark_provider_pending(&provider);
                tracing::debug!(provider = %provider, affected, "subscriptions pending");
            }
            ConnEvent::Frame { provider, frame } => match frame {
                Frame::Push { topic, params, payload } => {
                    let key = TopicKey::new(topic.clone(), params.clone());
                    // Copy the callback set out of the lock; dispatch must
                    // never run consumer code while the table is held
                    let callbacks = table.lock().callbacks_for(&key);
                    match callbacks {
                        Some(callbacks) => {
                            let event = PushEvent { topic, params, payload };
                            for callback in callbacks {
                                callback(&event);
                            }
                        }
                        // Tolerates a final push crossing an in-flight
                        // unsubscribe
                        None => {
                            tracing::debug!(provider = %provider, key = %key, "push for unknown key dropped");
                        }
                    }
                }
                other => {
                    tracing::debug!(provider = %provider, frame = ?other, "unexpected control frame dropped");
                }
            },
        }
    }
}
