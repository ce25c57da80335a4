//! Duplex message channel to the remote voice agent.
//!
//! A `Transport` connects, hands back a receiver of inbound messages, and
//! accepts outbound messages without blocking. When the connection drops the
//! inbound receiver ends; reconnecting is the caller's job (see
//! [`backoff::Reconnector`]).

pub mod backoff;
pub mod codec;
pub mod loopback;
pub mod tcp;

pub use backoff::{BackoffPolicy, Reconnector};
pub use codec::{PayloadEncoder, PcmEncoder};
pub use loopback::LoopbackTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// JSON control messages exchanged alongside audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Abandon the response currently being generated (barge-in).
    CancelResponse,
    /// Anything this build does not understand.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Encoded microphone audio.
    Audio(Vec<u8>),
    Control(ControlMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// 16-bit PCM from the agent, at the playback rate.
    Audio(Vec<i16>),
    Control(ControlMessage),
}

pub type InboundStream = mpsc::UnboundedReceiver<InboundMessage>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Fails with `TransportConnect` when unreachable.
    async fn connect(&self) -> Result<InboundStream>;

    /// Queue a message. Never waits on the network.
    ///
    /// # Errors
    /// `TransportClosed` when not connected.
    fn send(&self, msg: OutboundMessage) -> Result<()>;

    /// Close the connection. Safe to call when already closed.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}
