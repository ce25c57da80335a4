//! Events emitted by the capture engine, transport and live session.
//!
//! | Event | Producer |
//! |-------|----------|
//! | `AudioDataPayload` | capture pipeline (payload-emitted) |
//! | `SpeakingChangedEvent` | capture pipeline (VAD_START / VAD_END) |
//! | `AudioActivityEvent` | capture pipeline, once per processed frame |
//! | `ConnectionStateEvent` | reconnection state machine |
//! | `CaptureStatusEvent` | capture engine lifecycle |
//! | `LiveStateEvent` | live session |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One emitted unit of quantized microphone audio.
///
/// `sequence` starts at 0 on every capture start and increases by one per
/// payload in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDataPayload {
    pub samples: Vec<i16>,
    /// Wall-clock milliseconds since the Unix epoch at emission time.
    pub timestamp_ms: i64,
    pub sequence: u64,
}

impl AudioDataPayload {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Voice activity
// ---------------------------------------------------------------------------

/// Utterance boundary: `speaking == true` is VAD_START, `false` is VAD_END.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingChangedEvent {
    pub speaking: bool,
    pub timestamp_ms: i64,
}

/// Per-frame level, for meters and visualisers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing frame counter for this capture session.
    pub seq: u64,
    /// Root-mean-square level of the resampled frame.
    pub rms: f32,
    /// Raw VAD decision for the frame (before hangover).
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Lifecycle of the duplex channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStateEvent {
    pub state: ConnectionState,
    /// 1-based connect attempt that produced this state.
    pub attempt: u32,
}

// ---------------------------------------------------------------------------
// Capture lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Idle,
    Recording,
    Paused,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatusEvent {
    pub status: CaptureStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Live session
// ---------------------------------------------------------------------------

/// Where the voice-agent loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStateEvent {
    pub state: LiveState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_camel_case() {
        let payload = AudioDataPayload {
            samples: vec![1, -1],
            timestamp_ms: 1_700_000_000_000,
            sequence: 4,
        };
        let json = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(json["timestampMs"], 1_700_000_000_000i64);
        assert_eq!(json["sequence"], 4);
        assert_eq!(json["samples"][1], -1);
    }

    #[test]
    fn connection_state_is_lowercase() {
        let event = ConnectionStateEvent {
            state: ConnectionState::Connecting,
            attempt: 2,
        };
        let json = serde_json::to_value(event).expect("serialize state");
        assert_eq!(json["state"], "connecting");
        assert_eq!(json["attempt"], 2);
        assert!(serde_json::from_str::<ConnectionState>(r#""Connected""#).is_err());
    }

    #[test]
    fn activity_event_uses_is_speech_key() {
        let json = serde_json::to_value(AudioActivityEvent {
            seq: 3,
            rms: 0.25,
            is_speech: true,
        })
        .expect("serialize activity");
        assert_eq!(json["isSpeech"], true);
        assert_eq!(json["rms"], 0.25);
    }

    #[test]
    fn live_state_round_trips() {
        let ev: LiveStateEvent = serde_json::from_str(r#"{"state":"thinking"}"#).unwrap();
        assert_eq!(ev.state, LiveState::Thinking);
    }
}
