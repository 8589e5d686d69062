//! Subscription table: dedup, fan-out and wire-subscription state
//!
//! Maps a key (topic + canonical parameters) to the set of consumer
//! registrations and the single outstanding wire subscription for it. N
//! consumers on the same key produce exactly one upstream subscription;
//! the wire unsubscribe goes out only when the last registration is
//! removed. The table is the one shared mutable structure in the system
//! and is driven under the manager's lock; all operations here are
//! synchronous and non-blocking.

use crate::core::{Params, Topic};
use crate::ws::frame::Frame;
use crate::ws::manager::PushEvent;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Consumer callback invoked for every push on a subscribed key
pub type PushCallback = std::sync::Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Unique id for one consumer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

impl HandleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Topic plus canonicalized parameters, the true unit of deduplication
///
/// Equality and hashing go through the canonical form so equivalent
/// parameter objects collapse to the same key.
#[derive(Debug, Clone)]
pub struct TopicKey {
    topic: Topic,
    params: Params,
    canon: String,
}

impl TopicKey {
    pub fn new(topic: Topic, params: Params) -> Self {
        let canon = format!("{}?{}", topic, params.canonical());
        Self { topic, params, canon }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn provider(&self) -> &str {
        &self.topic.provider
    }

    fn subscribe_frame(&self) -> Frame {
        Frame::Subscribe {
            topic: self.topic.clone(),
            params: self.params.clone(),
        }
    }

    pub(crate) fn unsubscribe_frame(&self) -> Frame {
        Frame::Unsubscribe {
            topic: self.topic.clone(),
            params: self.params.clone(),
        }
    }
}

impl PartialEq for TopicKey {
    fn eq(&self, other: &Self) -> bool {
        self.canon == other.canon
    }
}

impl Eq for TopicKey {}

impl Hash for TopicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canon.hash(state);
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canon)
    }
}

/// Wire-subscription state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireState {
    /// Entry exists but no subscribe has been attempted yet
    Idle,
    /// Subscribe frame queued or in flight
    Subscribing,
    /// Subscribe frame sent on a live connection
    Subscribed,
    /// Connection lost; membership preserved for replay
    Pending,
}

/// Outcome of removing one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// Registration removed, others remain; no wire traffic
    Removed,
    /// Last registration removed and the entry dropped; the caller sends
    /// the wire unsubscribe
    RemovedLast,
    /// No such registration (already disposed)
    NotFound,
}

/// Result of asking for a subscribed-notification
pub(crate) enum SubscribedWait {
    Ready,
    Waiting(oneshot::Receiver<()>),
    Gone,
}

struct Registration {
    callback: PushCallback,
}

struct TopicEntry {
    key: TopicKey,
    state: WireState,
    /// Global registration sequence of the entry, for replay ordering
    created_seq: u64,
    /// Registration order; stale ids are pruned during fan-out
    order: Vec<HandleId>,
    registrations: HashMap<HandleId, Registration>,
    /// Resolved when the key reaches Subscribed; dropped if the entry is
    /// removed first, which cancels superseded waiters
    waiters: Vec<oneshot::Sender<()>>,
}

impl TopicEntry {
    fn new(key: TopicKey, created_seq: u64) -> Self {
        Self {
            key,
            state: WireState::Idle,
            created_seq,
            order: Vec::new(),
            registrations: HashMap::new(),
            waiters: Vec::new(),
        }
    }
}

/// Shared subscription table for all consumers
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<TopicKey, TopicEntry>,
    next_seq: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one consumer registration for a key
    ///
    /// Returns the fresh handle id and whether the key is new. A new key
    /// moves Idle -> Subscribing and the caller sends exactly one subscribe
    /// frame; an existing key gets no wire traffic at all.
    pub fn register(&mut self, key: TopicKey, callback: PushCallback) -> (HandleId, bool) {
        let id = HandleId::new();
        let seq = self.next_seq;
        self.next_seq += 1;

        let (entry, created) = match self.entries.entry(key) {
            Entry::Occupied(occupied) => (occupied.into_mut(), false),
            Entry::Vacant(vacant) => {
                let key = vacant.key().clone();
                (vacant.insert(TopicEntry::new(key, seq)), true)
            }
        };
        entry.order.push(id);
        entry.registrations.insert(id, Registration { callback });
        if created {
            entry.state = WireState::Subscribing;
        }
        (id, created)
    }

    /// Remove one registration; never touches other consumers' registrations
    pub fn unregister(&mut self, key: &TopicKey, id: HandleId) -> UnregisterOutcome {
        let Some(entry) = self.entries.get_mut(key) else {
            return UnregisterOutcome::NotFound;
        };
        if entry.registrations.remove(&id).is_none() {
            return UnregisterOutcome::NotFound;
        }
        entry.order.retain(|other| *other != id);
        if entry.registrations.is_empty() {
            self.entries.remove(key);
            UnregisterOutcome::RemovedLast
        } else {
            UnregisterOutcome::Removed
        }
    }

    /// Look up the callback behind a registration (for parameter changes)
    pub fn callback_of(&self, key: &TopicKey, id: HandleId) -> Option<PushCallback> {
        self.entries
            .get(key)?
            .registrations
            .get(&id)
            .map(|r| r.callback.clone())
    }

    /// Callbacks for one inbound push, in registration order
    ///
    /// Returns None for an unknown key, which the dispatcher drops; this
    /// tolerates a final push crossing an unsubscribe in flight.
    pub fn callbacks_for(&mut self, key: &TopicKey) -> Option<Vec<PushCallback>> {
        let entry = self.entries.get_mut(key)?;
        let registrations = &entry.registrations;
        entry.order.retain(|id| registrations.contains_key(id));
        Some(
            entry
                .order
                .iter()
                .filter_map(|id| entry.registrations.get(id))
                .map(|r| r.callback.clone())
                .collect(),
        )
    }

    /// The subscribe frame reached a live connection
    pub fn mark_subscribed(&mut self, key: &TopicKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.state = WireState::Subscribed;
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// The subscribe frame could not be sent; wait for replay
    pub fn mark_pending(&mut self, key: &TopicKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.state = WireState::Pending;
        }
    }

    /// Connection lost: every in-flight or active key of the provider goes
    /// pending while keeping its registrations
    pub fn mark_provider_pending(&mut self, provider: &str) -> usize {
        let mut affected = 0;
        for entry in self.entries.values_mut() {
            if entry.key.provider() == provider
                && matches!(entry.state, WireState::Subscribing | WireState::Subscribed)
            {
                entry.state = WireState::Pending;
                affected += 1;
            }
        }
        affected
    }

    /// Collect subscribe frames to replay for a provider, oldest
    /// registration first, and mark them in flight
    pub fn begin_replay(&mut self, provider: &str) -> Vec<(TopicKey, Frame)> {
        let mut due: Vec<&mut TopicEntry> = self
            .entries
            .values_mut()
            .filter(|entry| {
                entry.key.provider() == provider
                    && matches!(entry.state, WireState::Pending | WireState::Subscribing)
                    && !entry.registrations.is_empty()
            })
            .collect();
        due.sort_by_key(|entry| entry.created_seq);
        due.into_iter()
            .map(|entry| {
                entry.state = WireState::Subscribing;
                (entry.key.clone(), entry.key.subscribe_frame())
            })
            .collect()
    }

    /// Register interest in the key reaching Subscribed
    pub(crate) fn subscribed_wait(&mut self, key: &TopicKey) -> SubscribedWait {
        match self.entries.get_mut(key) {
            None => SubscribedWait::Gone,
            Some(entry) if entry.state == WireState::Subscribed => SubscribedWait::Ready,
            Some(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                SubscribedWait::Waiting(rx)
            }
        }
    }

    /// Current wire state of a key, if present
    pub fn state_of(&self, key: &TopicKey) -> Option<WireState> {
        self.entries.get(key).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registrations on a key
    pub fn registration_count(&self, key: &TopicKey) -> usize {
        self.entries
            .get(key)
            .map(|entry| entry.registrations.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(topic: &str, tf: &str) -> TopicKey {
        TopicKey::new(topic.parse().unwrap(), Params::new().set("tf", tf))
    }

    fn noop() -> PushCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn test_key_collapses_equivalent_params() {
        let a = TopicKey::new(
            "p.c.X".parse().unwrap(),
            Params::new().set("a", 1i64).set("b", "x"),
        );
        let b = TopicKey::new(
            "p.c.X".parse().unwrap(),
            Params::new().set("b", "x").set("a", 1i64),
        );
        assert_eq!(a, b);
        let c = TopicKey::new("p.c.X".parse().unwrap(), Params::new().set("a", 2i64));
        assert_ne!(a, c);
    }

    #[test]
    fn test_register_dedups_same_key() {
        let mut table = SubscriptionTable::new();
        let (_, created_first) = table.register(key("p.c.X", "1m"), noop());
        let (_, created_second) = table.register(key("p.c.X", "1m"), noop());
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.registration_count(&key("p.c.X", "1m")), 2);
    }

    #[test]
    fn test_unregister_last_removes_entry() {
        let mut table = SubscriptionTable::new();
        let k = key("p.c.X", "1m");
        let (first, _) = table.register(k.clone(), noop());
        let (second, _) = table.register(k.clone(), noop());

        assert_eq!(table.unregister(&k, first), UnregisterOutcome::Removed);
        assert_eq!(table.len(), 1);
        assert_eq!(table.unregister(&k, second), UnregisterOutcome::RemovedLast);
        assert!(table.is_empty());
        assert_eq!(table.unregister(&k, second), UnregisterOutcome::NotFound);
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let mut table = SubscriptionTable::new();
        let k = key("p.c.X", "1m");
        let seen: Arc<parking_lot::Mutex<Vec<u32>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3u32 {
            let seen = seen.clone();
            table.register(k.clone(), Arc::new(move |_| seen.lock().push(i)));
        }
        let event = PushEvent {
            topic: "p.c.X".parse().unwrap(),
            params: Params::new().set("tf", "1m"),
            payload: serde_json::Value::Null,
        };
        for cb in table.callbacks_for(&k).unwrap() {
            cb(&event);
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_key_has_no_callbacks() {
        let mut table = SubscriptionTable::new();
        assert!(table.callbacks_for(&key("p.c.X", "1m")).is_none());
    }

    #[test]
    fn test_replay_preserves_registration_order() {
        let mut table = SubscriptionTable::new();
        let first = key("p.c.A", "1m");
        let second = key("p.c.B", "1m");
        let other_provider = key("q.c.C", "1m");
        table.register(first.clone(), noop());
        table.register(second.clone(), noop());
        table.register(other_provider, noop());

        table.mark_subscribed(&first);
        table.mark_subscribed(&second);
        assert_eq!(table.mark_provider_pending("p"), 2);

        let frames = table.begin_replay("p");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, first);
        assert_eq!(frames[1].0, second);
        assert_eq!(table.state_of(&first), Some(WireState::Subscribing));
    }

    #[test]
    fn test_replay_skips_already_subscribed() {
        let mut table = SubscriptionTable::new();
        let k = key("p.c.A", "1m");
        table.register(k.clone(), noop());
        table.mark_subscribed(&k);
        assert!(table.begin_replay("p").is_empty());
    }

    #[test]
    fn test_subscribed_waiters_fire() {
        let mut table = SubscriptionTable::new();
        let k = key("p.c.A", "1m");
        table.register(k.clone(), noop());

        let SubscribedWait::Waiting(mut rx) = table.subscribed_wait(&k) else {
            panic!("expected waiting");
        };
        assert!(rx.try_recv().is_err());
        table.mark_subscribed(&k);
        assert!(rx.try_recv().is_ok());
        assert!(matches!(table.subscribed_wait(&k), SubscribedWait::Ready));
    }

    #[test]
    fn test_waiters_cancelled_on_removal() {
        let mut table = SubscriptionTable::new();
        let k = key("p.c.A", "1m");
        let (id, _) = table.register(k.clone(), noop());
        let SubscribedWait::Waiting(mut rx) = table.subscribed_wait(&k) else {
            panic!("expected waiting");
        };
        table.unregister(&k, id);
        // sender dropped with the entry
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
