//! In-process transport that plays the agent's part.
//!
//! Sent audio comes straight back as inbound audio (PCM encoding assumed).
//! The most recent sends are kept in a bounded log, and tests can inject
//! inbound messages or make the next few connects fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{InboundMessage, InboundStream, OutboundMessage, Transport};
use crate::{
    audio::pcm,
    error::{Result, VoxlinkError},
};

/// Sends kept by default: a few seconds of 8 ms payloads.
pub const DEFAULT_SENT_LOG_CAP: usize = 1024;

pub struct LoopbackTransport {
    echo: bool,
    connected: AtomicBool,
    fail_connects: AtomicU32,
    connects: AtomicU32,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    sent: Mutex<VecDeque<OutboundMessage>>,
    sent_cap: usize,
}

impl LoopbackTransport {
    /// `echo`: return sent audio as inbound audio.
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            connected: AtomicBool::new(false),
            fail_connects: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            inbound: Mutex::new(None),
            sent: Mutex::new(VecDeque::new()),
            sent_cap: DEFAULT_SENT_LOG_CAP,
        }
    }

    /// Keep at most `cap` sends; `0` disables the log.
    pub fn with_sent_log_cap(mut self, cap: usize) -> Self {
        self.sent_cap = cap;
        self
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver `msg` as if the remote end had sent it.
    pub fn inject(&self, msg: InboundMessage) -> Result<()> {
        self.inbound
            .lock()
            .as_ref()
            .ok_or(VoxlinkError::TransportClosed)?
            .send(msg)
            .map_err(|_| VoxlinkError::TransportClosed)
    }

    /// Simulate the remote end hanging up: the inbound stream ends.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound.lock().take();
    }

    /// The most recent sends, oldest first.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().iter().cloned().collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<InboundStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_connects.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_connects.store(pending - 1, Ordering::SeqCst);
            return Err(VoxlinkError::TransportConnect("loopback refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    fn send(&self, msg: OutboundMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(VoxlinkError::TransportClosed);
        }
        if self.echo {
            if let OutboundMessage::Audio(bytes) = &msg {
                self.inject(InboundMessage::Audio(pcm::from_le_bytes(bytes)))?;
            }
        }
        if self.sent_cap > 0 {
            let mut sent = self.sent.lock();
            if sent.len() == self.sent_cap {
                sent.pop_front();
            }
            sent.push_back(msg);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_connection();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
