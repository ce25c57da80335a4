//! Voice Activity Detection (VAD) abstraction.
//!
//! The `VoiceActivityDetector` trait is the seam between the capture pipeline
//! and a detector: `EnergyVad` (RMS threshold) or `SileroVad` (recurrent
//! scorer, `onnx` feature). The hangover tail lives in the pipeline's gate,
//! not in the detectors, so both report the raw per-frame decision.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The frame contains speech.
    Speech,
    /// The frame is silent or below threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }

    pub fn from_bool(speaking: bool) -> Self {
        if speaking {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}

/// Trait for all VAD implementations.
///
/// `classify` runs on the pipeline thread and may block while a model runs
/// inference; frames keep queueing in the ring buffer meanwhile. It must not
/// panic or fail: detectors degrade to an energy decision instead.
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a frame at the pipeline's target rate.
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;

    /// Reset any internal state (e.g. recurrent hidden state).
    /// Called at the start of every capture session.
    fn reset(&mut self);

    /// Update the RMS threshold of the energy decision, where one applies.
    fn set_threshold(&mut self, _threshold: f32) {}
}

/// Which detector a capture session constructs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadKind {
    #[default]
    Energy,
    Silero,
}

/// Default location for VAD model files.
pub fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("voxlink").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxlink")
            .join("models")
    }
}

/// Default path for the Silero VAD model file.
pub fn default_silero_model_path() -> PathBuf {
    default_models_dir().join("silero_vad.onnx")
}
