//! # voxlink-core
//!
//! Live voice streaming engine: capture, gate and ship microphone audio to a
//! voice agent, and play its replies back without gaps.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                    │
//!                                     resample → VAD → hangover gate
//!                                                    │
//!                                         quantize → chunk → payload
//!                                                    │
//!                                         mpsc → LiveSession → Transport
//!                                                                  │
//! Speaker ← CpalOutput ← PlaybackScheduler ← inbound audio ←───────┘
//! ```
//!
//! The audio callback only downmixes and pushes. All per-frame work happens in
//! the pipeline thread; the session and the reconnection loop run on tokio
//! and talk to it through channels only.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;
pub mod transport;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{CaptureEngine, CaptureSource, EncoderKind, EngineConfig, HangoverPolicy};
pub use error::{Result, VoxlinkError};
pub use ipc::events::{
    AudioActivityEvent, AudioDataPayload, CaptureStatus, CaptureStatusEvent, ConnectionState,
    ConnectionStateEvent, LiveState, LiveStateEvent, SpeakingChangedEvent,
};
pub use playback::{OfflineOutput, PlaybackConfig, PlaybackOutput, PlaybackScheduler};
pub use session::{LiveSession, SessionParts};
pub use transport::{
    BackoffPolicy, LoopbackTransport, Reconnector, TcpTransport, Transport,
};

#[cfg(feature = "audio-cpal")]
pub use playback::CpalOutput;

#[cfg(feature = "onnx")]
pub use vad::SileroVad;
