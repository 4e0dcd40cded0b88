//! Reconnecting signaling client
//!
//! Owns the connection task: opens a channel through the transport, dispatches
//! inbound messages to the handler registered for their kind, and reconnects
//! with a fixed delay until the retry budget is spent.

use super::message::{MessageKind, SignalingMessage};
use super::transport::SignalingTransport;
use super::{SignalSink, SignalingError};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Reconnection policy: bounded attempts with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after a failure before giving up (0 disables reconnection)
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn should_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Channel status reported to the status handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// `connect()` not called yet
    Idle,
    Connecting,
    Connected,
    /// Channel lost; reconnection may follow
    Disconnected,
    /// Retry budget spent
    GaveUp,
    /// Closed locally
    Closed,
}

/// Callback for one inbound message kind
pub type MessageHandler = Box<dyn Fn(SignalingMessage) + Send + Sync>;

/// Callback for channel status transitions
pub type StatusHandler = Box<dyn Fn(ChannelStatus) + Send + Sync>;

struct Inner {
    transport: Arc<dyn SignalingTransport>,
    policy: RetryPolicy,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    handlers: RwLock<HashMap<MessageKind, MessageHandler>>,
    status_handler: RwLock<Option<StatusHandler>>,
    status: watch::Sender<ChannelStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit_status(&self, status: ChannelStatus) {
        // Handler first, so observers woken by the watch see its effects
        if let Some(ref handler) = *self.status_handler.read() {
            handler(status);
        }
        self.status.send_replace(status);
    }

    fn dispatch(&self, text: &str) {
        let message = match SignalingMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound signaling frame: {}", e);
                return;
            }
        };

        let kind = message.kind();
        let handlers = self.handlers.read();
        match handlers.get(&kind) {
            Some(handler) => handler(message),
            None => debug!("No handler registered for {} message", kind),
        }
    }
}

/// Signaling client handle; cheap to clone
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

impl SignalingClient {
    pub fn new(transport: Arc<dyn SignalingTransport>, policy: RetryPolicy) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                outbound: Mutex::new(None),
                handlers: RwLock::new(HashMap::new()),
                status_handler: RwLock::new(None),
                status,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Register the handler for one message kind, replacing any previous one.
    /// Handlers run on the connection task and must not block.
    pub fn on_message(&self, kind: MessageKind, handler: impl Fn(SignalingMessage) + Send + Sync + 'static) {
        self.inner.handlers.write().insert(kind, Box::new(handler));
    }

    /// Register the channel status handler
    pub fn on_status(&self, handler: impl Fn(ChannelStatus) + Send + Sync + 'static) {
        *self.inner.status_handler.write() = Some(Box::new(handler));
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Start the connection task. No-op while it is already running.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock();
        if let Some(ref handle) = *task {
            if !handle.is_finished() {
                debug!("Signaling client already running");
                return;
            }
        }

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_connection(inner)));
    }

    /// Wait until the channel is connected. Returns false when the client
    /// gave up, was closed, or the timeout elapsed first.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.status.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ChannelStatus::Connected | ChannelStatus::GaveUp | ChannelStatus::Closed)),
        )
        .await;

        matches!(settled, Ok(Ok(status)) if *status == ChannelStatus::Connected)
    }

    /// Encode and transmit a message
    pub fn try_send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let text = message.to_json()?;
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if tx.send(text).is_ok() => Ok(()),
            _ => Err(SignalingError::Disconnected),
        }
    }

    /// Stop the connection task and drop the channel
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
        }
        self.inner.outbound.lock().take();
        if self.status() != ChannelStatus::Closed {
            info!("Signaling client closed");
            self.inner.emit_status(ChannelStatus::Closed);
        }
    }
}

impl SignalSink for SignalingClient {
    fn send(&self, message: SignalingMessage) {
        if let Err(e) = self.try_send(&message) {
            debug!("Dropping outbound {} message: {}", message.kind(), e);
        }
    }

    fn close(&self) {
        self.shutdown();
    }
}

async fn run_connection(inner: Arc<Inner>) {
    let mut attempts: u32 = 0;

    loop {
        inner.emit_status(ChannelStatus::Connecting);

        match inner.transport.open().await {
            Ok(channel) => {
                attempts = 0;
                info!("Connected to signaling server");
                *inner.outbound.lock() = Some(channel.outbound);
                inner.emit_status(ChannelStatus::Connected);

                let mut inbound = channel.inbound;
                while let Some(text) = inbound.recv().await {
                    inner.dispatch(&text);
                }

                inner.outbound.lock().take();
                warn!("Signaling channel lost");
                inner.emit_status(ChannelStatus::Disconnected);
            }
            Err(e) => {
                warn!("Signaling connect attempt failed: {}", e);
            }
        }

        if !inner.policy.should_retry(attempts) {
            error!(
                "Giving up on signaling server after {} reconnection attempts",
                attempts
            );
            inner.emit_status(ChannelStatus::GaveUp);
            break;
        }

        attempts += 1;
        debug!(
            "Reconnecting in {:?} (attempt {}/{})",
            inner.policy.delay, attempts, inner.policy.max_attempts
        );
        tokio::time::sleep(inner.policy.delay).await;
    }
}
