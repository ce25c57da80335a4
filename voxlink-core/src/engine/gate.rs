//! Speech gate: turns raw per-frame VAD decisions into utterance boundaries
//! and an emit/drop verdict for each frame.
//!
//! ```text
//!            speech frame                        silent frame, counter == 0
//!   Idle ───────────────────► Speaking ──────────────────────────────► Idle
//!    ▲   (VAD_START, count=0)   │  ▲                (VAD_END)
//!    │                          │  │ speech frame: count += 1,
//!    │                          ▼  │   counter = hangover(count)
//!    │                     silent frame, counter > 0: counter -= 1
//! ```
//!
//! A frame is forwarded whenever the gate is speaking or the hangover
//! counter is still positive; every other frame is dropped.

use serde::{Deserialize, Serialize};

/// How long the tail after speech lasts, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "mode")]
pub enum HangoverPolicy {
    /// The same tail after every utterance.
    Fixed { frames: u32 },
    /// Short utterances get `short_frames`; once an utterance has run for
    /// more than `long_after_frames` speaking frames the tail grows to
    /// `long_frames`, riding over mid-sentence pauses.
    Adaptive {
        short_frames: u32,
        long_frames: u32,
        long_after_frames: u32,
    },
}

impl HangoverPolicy {
    /// Tail length for an utterance that has produced `speaking_frames` so far.
    pub fn frames_for(&self, speaking_frames: u32) -> u32 {
        match *self {
            HangoverPolicy::Fixed { frames } => frames,
            HangoverPolicy::Adaptive {
                short_frames,
                long_frames,
                long_after_frames,
            } => {
                if speaking_frames > long_after_frames {
                    long_frames
                } else {
                    short_frames
                }
            }
        }
    }
}

impl Default for HangoverPolicy {
    /// ~8 ms frames: 250 frames ≈ 2 s, 62 ≈ 0.5 s, 187 ≈ 1.5 s.
    fn default() -> Self {
        HangoverPolicy::Adaptive {
            short_frames: 62,
            long_frames: 187,
            long_after_frames: 250,
        }
    }
}

/// Utterance boundary produced by [`SpeechGate::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    Started,
    Ended,
}

/// Result of feeding one frame's VAD decision through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub transition: Option<GateTransition>,
    /// Whether this frame's audio should be emitted.
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct SpeechGate {
    policy: HangoverPolicy,
    is_speaking: bool,
    hangover_counter: u32,
    speaking_frame_count: u32,
}

impl SpeechGate {
    pub fn new(policy: HangoverPolicy) -> Self {
        Self {
            policy,
            is_speaking: false,
            hangover_counter: 0,
            speaking_frame_count: 0,
        }
    }

    pub fn update(&mut self, currently_speaking: bool) -> GateOutcome {
        let mut transition = None;

        if currently_speaking {
            if !self.is_speaking {
                self.is_speaking = true;
                self.speaking_frame_count = 0;
                transition = Some(GateTransition::Started);
            }
            self.speaking_frame_count = self.speaking_frame_count.saturating_add(1);
            self.hangover_counter = self.policy.frames_for(self.speaking_frame_count);
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
        } else if self.is_speaking {
            self.is_speaking = false;
            transition = Some(GateTransition::Ended);
        }

        GateOutcome {
            transition,
            forward: self.is_speaking || self.hangover_counter > 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn hangover_counter(&self) -> u32 {
        self.hangover_counter
    }

    pub fn speaking_frame_count(&self) -> u32 {
        self.speaking_frame_count
    }

    pub fn set_policy(&mut self, policy: HangoverPolicy) {
        self.policy = policy;
    }

    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.hangover_counter = 0;
        self.speaking_frame_count = 0;
    }
}
