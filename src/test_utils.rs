//! Test utilities: in-memory connector and polling helpers
//!
//! `MockConnector` stands in for the WebSocket connector. Every open hands
//! out a channel-backed transport; the test side can push frames, inspect
//! everything the client sent, fail upcoming opens, or drop all live
//! transports to exercise reconnection.

use crate::core::Params;
use crate::ws::frame::Frame;
use crate::ws::transport::{Connector, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll a condition until it holds, yielding so background tasks progress
///
/// Panics after a bounded number of attempts; under the paused test clock
/// the sleeps auto-advance, so failures are immediate in wall time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Config with mock providers `p` and `q` for manager tests
pub fn test_config() -> crate::Config {
    let mut config = crate::Config::default();
    config
        .endpoints
        .insert("p".to_string(), "mock://p".to_string());
    config
        .endpoints
        .insert("q".to_string(), "mock://q".to_string());
    config
}

struct MockState {
    sent: Mutex<Vec<Frame>>,
    /// Live server-side senders, one per open transport
    servers: Mutex<Vec<(u64, mpsc::UnboundedSender<Frame>)>>,
    opens: AtomicU64,
    pings: AtomicU64,
    fail_opens: AtomicU64,
    /// When false, pings are recorded but never answered
    auto_pong: AtomicBool,
}

/// In-memory connector; clones share one state
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A peer that never answers pings, for heartbeat-timeout tests
    pub fn silent() -> Self {
        Self::build(false)
    }

    fn build(auto_pong: bool) -> Self {
        Self {
            state: Arc::new(MockState {
                sent: Mutex::new(Vec::new()),
                servers: Mutex::new(Vec::new()),
                opens: AtomicU64::new(0),
                pings: AtomicU64::new(0),
                fail_opens: AtomicU64::new(0),
                auto_pong: AtomicBool::new(auto_pong),
            }),
        }
    }

    /// Successful opens so far
    pub fn opens(&self) -> u64 {
        self.state.opens.load(Ordering::Relaxed)
    }

    /// Heartbeat pings sent by the client (kept out of `sent`)
    pub fn pings(&self) -> u64 {
        self.state.pings.load(Ordering::Relaxed)
    }

    /// Make the next `n` opens fail with a connect error
    pub fn fail_next_opens(&self, n: u64) {
        self.state.fail_opens.store(n, Ordering::Relaxed);
    }

    /// Everything the client sent, in order, heartbeats excluded
    pub fn sent(&self) -> Vec<Frame> {
        self.state.sent.lock().clone()
    }

    /// (topic, params) of every subscribe frame sent
    pub fn sent_subscribes(&self) -> Vec<(String, Params)> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Subscribe { topic, params } => Some((topic.to_string(), params)),
                _ => None,
            })
            .collect()
    }

    /// (topic, params) of every unsubscribe frame sent
    pub fn sent_unsubscribes(&self) -> Vec<(String, Params)> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Unsubscribe { topic, params } => Some((topic.to_string(), params)),
                _ => None,
            })
            .collect()
    }

    pub fn subscribe_count(&self) -> usize {
        self.sent_subscribes().len()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.sent_unsubscribes().len()
    }

    /// Push a frame to every live transport; true if at least one took it
    pub fn push(&self, frame: Frame) -> bool {
        let servers = self.state.servers.lock();
        let mut delivered = false;
        for (_, server) in servers.iter() {
            if server.send(frame.clone()).is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    /// Drop every live transport, forcing the client to reconnect
    pub fn drop_connection(&self) {
        self.state.servers.lock().clear();
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self, _url: &str) -> Result<MockTransport, TransportError> {
        let failures = self.state.fail_opens.load(Ordering::Relaxed);
        if failures > 0 {
            self.state
                .fail_opens
                .store(failures.saturating_sub(1), Ordering::Relaxed);
            return Err(TransportError::ConnectionFailed("mock refused".to_string()));
        }
        let id = self.state.opens.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.servers.lock().push((id, tx));
        Ok(MockTransport {
            state: self.state.clone(),
            id,
            rx,
            pending: VecDeque::new(),
        })
    }
}

/// Channel-backed transport handed out by `MockConnector`
pub struct MockTransport {
    state: Arc<MockState>,
    id: u64,
    rx: mpsc::UnboundedReceiver<Frame>,
    /// Locally queued replies (auto-pong), drained before the channel
    pending: VecDeque<Frame>,
}

impl Transport for MockTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if let Frame::Ping = frame {
            self.state.pings.fetch_add(1, Ordering::Relaxed);
            if self.state.auto_pong.load(Ordering::Relaxed) {
                self.pending.push_back(Frame::Pong);
            }
            return Ok(());
        }
        self.state.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.state.servers.lock().retain(|(id, _)| *id != self.id);
        self.rx.close();
    }
}
