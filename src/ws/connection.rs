//! Provider connection actor
//!
//! One task owns the transport for one provider and serializes every state
//! transition and send for it. The task drives the status machine
//! CONNECTING -> CONNECTED -> (DISCONNECTED | RECONNECTING) -> CONNECTED,
//! with CLOSED reached only on explicit shutdown. Heartbeats bound the
//! detection latency of silent failures; reconnection uses exponential
//! backoff with jitter, capped, and the attempt counter resets on any
//! successful connect.

use crate::ws::frame::Frame;
use crate::ws::transport::{Connector, Transport};
use crate::FeedError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

/// Connection status as observed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// First connect in progress
    Connecting = 0,
    /// Transport open and serving
    Connected = 1,
    /// Transport lost or paused, not yet retrying
    Disconnected = 2,
    /// Reopen attempt in progress
    Reconnecting = 3,
    /// Explicit shutdown, terminal
    Closed = 4,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Connecting,
            1 => ConnectionStatus::Connected,
            2 => ConnectionStatus::Disconnected,
            3 => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one connection's metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub message_count: u64,
    pub reconnect_count: u64,
    pub last_latency_ms: Option<u64>,
    /// Unix millis of the last successful connect, None while down
    pub connected_since_ms: Option<u64>,
}

/// Timer settings for one connection
#[derive(Debug, Clone)]
pub struct ConnTuning {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for ConnTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Commands accepted by the connection task
#[derive(Debug)]
pub(crate) enum ConnCommand {
    /// Route one frame out on the live transport
    Send(Frame),
    /// Manual heartbeat probe; failure detection stays with the timeout
    Ping,
    /// Close the transport and stay down until Reconnect
    Disconnect,
    /// Drop the current transport (if any) and reconnect without backoff
    Reconnect,
    /// Terminal close
    Shutdown,
}

/// Events the connection task reports to the manager
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// Transport is open; subscriptions for this provider should be replayed
    Up { provider: String },
    /// Transport lost; topic states stay registered and go pending
    Down { provider: String },
    /// Inbound frame other than heartbeat traffic
    Frame { provider: String, frame: Frame },
}

const NO_LATENCY: u64 = u64::MAX;

/// State shared between the task and its handle, read lock-free
struct ConnShared {
    status: AtomicU8,
    message_count: AtomicU64,
    reconnect_count: AtomicU64,
    last_latency_ms: AtomicU64,
    connected_since_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ConnShared {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnectionStatus::Connecting as u8),
            message_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(NO_LATENCY),
            connected_since_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn record_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        self.last_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    fn mark_connected(&self) {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.connected_since_ms.store(now, Ordering::Relaxed);
        self.set_status(ConnectionStatus::Connected);
    }

    fn mark_down(&self, status: ConnectionStatus) {
        self.connected_since_ms.store(0, Ordering::Relaxed);
        self.set_status(status);
    }

    fn set_last_error(&self, error: String) {
        *self.last_error.lock() = Some(error);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.last_latency_ms.load(Ordering::Relaxed);
        let since = self.connected_since_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            message_count: self.message_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            last_latency_ms: (latency != NO_LATENCY).then_some(latency),
            connected_since_ms: (since != 0).then_some(since),
        }
    }
}

/// Caller-side handle to one provider connection
#[derive(Clone)]
pub struct ConnectionHandle {
    provider: String,
    cmd: mpsc::UnboundedSender<ConnCommand>,
    shared: Arc<ConnShared>,
}

impl ConnectionHandle {
    /// Spawn the owning task for one provider connection
    ///
    /// The connect sequence starts immediately; the caller does not block on
    /// completion.
    pub(crate) fn spawn<C: Connector>(
        provider: String,
        url: String,
        connector: Arc<C>,
        tuning: ConnTuning,
        events: mpsc::UnboundedSender<ConnEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ConnShared::new());
        let task = ConnectionTask {
            provider: provider.clone(),
            url,
            connector,
            tuning,
            cmd_rx,
            events,
            shared: shared.clone(),
            backoff_attempt: 0,
            last_activity: Instant::now(),
            ping_sent_at: None,
        };
        tokio::spawn(task.run());
        Self {
            provider,
            cmd: cmd_tx,
            shared,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Route one frame out, failing fast when the transport is not live
    pub fn send_frame(&self, frame: Frame) -> crate::Result<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(FeedError::NotConnected(self.provider.clone()));
        }
        self.cmd
            .send(ConnCommand::Send(frame))
            .map_err(|_| FeedError::NotConnected(self.provider.clone()))
    }

    pub(crate) fn command(&self, command: ConnCommand) {
        let _ = self.cmd.send(command);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("provider", &self.provider)
            .field("status", &self.status())
            .finish()
    }
}

/// Outcome of one served transport session
enum Served {
    Shutdown,
    Paused,
    Restart,
    Lost,
}

struct ConnectionTask<C: Connector> {
    provider: String,
    url: String,
    connector: Arc<C>,
    tuning: ConnTuning,
    cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    events: mpsc::UnboundedSender<ConnEvent>,
    shared: Arc<ConnShared>,
    backoff_attempt: u32,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(mut self) {
        let mut first_attempt = true;
        loop {
            let status = if first_attempt {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            };
            self.shared.set_status(status);

            match self.connector.open(&self.url).await {
                Ok(mut transport) => {
                    self.backoff_attempt = 0;
                    if !first_attempt {
                        self.shared.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    }
                    first_attempt = false;
                    self.shared.mark_connected();
                    tracing::info!(provider = %self.provider, "connected");
                    let _ = self.events.send(ConnEvent::Up {
                        provider: self.provider.clone(),
                    });

                    let served = self.serve(&mut transport).await;
                    transport.close().await;
                    match served {
                        Served::Shutdown => {
                            self.shared.mark_down(ConnectionStatus::Closed);
                            tracing::info!(provider = %self.provider, "closed");
                            return;
                        }
                        Served::Paused => {
                            self.shared.mark_down(ConnectionStatus::Disconnected);
                            let _ = self.events.send(ConnEvent::Down {
                                provider: self.provider.clone(),
                            });
                            if !self.wait_while_paused().await {
                                self.shared.set_status(ConnectionStatus::Closed);
                                return;
                            }
                            continue;
                        }
                        Served::Restart => {
                            self.shared.mark_down(ConnectionStatus::Disconnected);
                            let _ = self.events.send(ConnEvent::Down {
                                provider: self.provider.clone(),
                            });
                            self.backoff_attempt = 0;
                            continue;
                        }
                        Served::Lost => {
                            self.shared.mark_down(ConnectionStatus::Disconnected);
                            let _ = self.events.send(ConnEvent::Down {
                                provider: self.provider.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %self.provider, error = %e, "connect failed");
                    self.shared.set_last_error(e.to_string());
                    first_attempt = false;
                    self.shared.mark_down(ConnectionStatus::Disconnected);
                }
            }

            let delay = self.next_backoff();
            tracing::debug!(
                provider = %self.provider,
                delay_ms = delay.as_millis() as u64,
                "reconnect backoff"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(ConnCommand::Shutdown) => {
                        self.shared.set_status(ConnectionStatus::Closed);
                        return;
                    }
                    Some(ConnCommand::Reconnect) => {
                        self.backoff_attempt = 0;
                    }
                    Some(ConnCommand::Disconnect) => {
                        if !self.wait_while_paused().await {
                            self.shared.set_status(ConnectionStatus::Closed);
                            return;
                        }
                    }
                    // Sends while down are dropped; subscriptions are
                    // replayed from the table once the connection is up
                    Some(_) => {}
                },
            }
        }
    }

    /// Serve one open transport until it is lost or commanded away
    async fn serve(&mut self, transport: &mut C::Transport) -> Served {
        let mut heartbeat = interval(self.tuning.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_activity = Instant::now();
        self.ping_sent_at = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(ConnCommand::Shutdown) => return Served::Shutdown,
                    Some(ConnCommand::Disconnect) => return Served::Paused,
                    Some(ConnCommand::Reconnect) => return Served::Restart,
                    Some(ConnCommand::Send(frame)) => {
                        if let Err(e) = transport.send(frame).await {
                            self.shared.set_last_error(e.to_string());
                            tracing::warn!(provider = %self.provider, error = %e, "send failed");
                            return Served::Lost;
                        }
                    }
                    Some(ConnCommand::Ping) => {
                        if self.send_ping(transport).await.is_err() {
                            return Served::Lost;
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    if self.last_activity.elapsed() >= self.tuning.heartbeat_timeout {
                        self.shared.set_last_error("heartbeat timeout".to_string());
                        tracing::warn!(provider = %self.provider, "heartbeat timeout");
                        return Served::Lost;
                    }
                    if self.send_ping(transport).await.is_err() {
                        return Served::Lost;
                    }
                },
                res = transport.recv() => match res {
                    Ok(Some(frame)) => {
                        self.last_activity = Instant::now();
                        self.shared.record_message();
                        match frame {
                            Frame::Pong => {
                                if let Some(sent_at) = self.ping_sent_at.take() {
                                    self.shared.record_latency(sent_at.elapsed());
                                }
                            }
                            Frame::Ping => {
                                if transport.send(Frame::Pong).await.is_err() {
                                    return Served::Lost;
                                }
                            }
                            other => {
                                let _ = self.events.send(ConnEvent::Frame {
                                    provider: self.provider.clone(),
                                    frame: other,
                                });
                            }
                        }
                    }
                    Ok(None) => {
                        self.shared.set_last_error("closed by peer".to_string());
                        return Served::Lost;
                    }
                    Err(e) => {
                        self.shared.set_last_error(e.to_string());
                        tracing::warn!(provider = %self.provider, error = %e, "receive failed");
                        return Served::Lost;
                    }
                },
            }
        }
    }

    async fn send_ping(&mut self, transport: &mut C::Transport) -> Result<(), ()> {
        if self.ping_sent_at.is_none() {
            self.ping_sent_at = Some(Instant::now());
        }
        match transport.send(Frame::Ping).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.set_last_error(e.to_string());
                Err(())
            }
        }
    }

    /// Stay down until an explicit reconnect; false means shutdown
    async fn wait_while_paused(&mut self) -> bool {
        tracing::info!(provider = %self.provider, "connection paused");
        loop {
            match self.cmd_rx.recv().await {
                None | Some(ConnCommand::Shutdown) => return false,
                Some(ConnCommand::Reconnect) => {
                    self.backoff_attempt = 0;
                    return true;
                }
                Some(_) => {}
            }
        }
    }

    /// Exponential backoff with additive jitter, capped
    fn next_backoff(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.backoff_attempt);
        let base = self
            .tuning
            .reconnect_initial
            .saturating_mul(factor)
            .min(self.tuning.reconnect_max);
        self.backoff_attempt = self.backoff_attempt.saturating_add(1);
        jittered(base)
    }
}

/// Add up to 25% jitter so reconnect storms spread out
fn jittered(base: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    base + base.mul_f64((nanos % 256) as f64 / 1024.0)
}
