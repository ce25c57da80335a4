//! Energy-based VAD: a frame is speech when its RMS exceeds a threshold.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// Default RMS threshold for the standalone energy detector.
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.01;

/// A stateless energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames strictly above it are speech.
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The decision rule shared with the neural detector's fallback path.
    pub fn is_speech(samples: &[f32], threshold: f32) -> bool {
        !samples.is_empty() && crate::buffering::chunk::rms(samples) > threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_THRESHOLD)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        VadDecision::from_bool(Self::is_speech(&chunk.samples, self.threshold))
    }

    fn reset(&mut self) {}

    fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(amplitude: f32, len: usize) -> AudioChunk {
        AudioChunk::new(vec![amplitude; len], 16_000)
    }

    #[test]
    fn silence_below_threshold() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.classify(&chunk(0.0, 128)), VadDecision::Silence);
        assert_eq!(vad.classify(&chunk(0.005, 128)), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.classify(&chunk(0.5, 128)), VadDecision::Speech);
    }

    #[test]
    fn threshold_is_strict() {
        let mut vad = EnergyVad::new(0.25);
        assert_eq!(vad.classify(&chunk(0.25, 64)), VadDecision::Silence);
        assert_eq!(vad.classify(&chunk(0.2501, 64)), VadDecision::Speech);
    }

    #[test]
    fn no_state_carries_between_frames() {
        let mut vad = EnergyVad::default();
        assert!(vad.classify(&chunk(0.5, 128)).is_speech());
        assert!(!vad.classify(&chunk(0.0, 128)).is_speech());
    }

    #[test]
    fn threshold_update_applies_to_next_frame() {
        let mut vad = EnergyVad::default();
        assert!(vad.classify(&chunk(0.05, 128)).is_speech());
        vad.set_threshold(0.1);
        assert_eq!(vad.threshold(), 0.1);
        assert!(!vad.classify(&chunk(0.05, 128)).is_speech());
    }

    #[test]
    fn empty_chunk_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.classify(&chunk(0.0, 0)), VadDecision::Silence);
    }
}
