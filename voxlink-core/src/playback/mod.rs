//! Jitter-buffered playback of inbound audio.
//!
//! `PlaybackScheduler` decides *when* and *how fast* each arriving payload
//! plays; a `PlaybackOutput` owns the clock and actually renders segments.
//! Two outputs ship with the crate: `OfflineOutput` (manual clock, renders
//! into a buffer) and `CpalOutput` (speaker device, feature `audio-cpal`).

pub mod mixer;
#[cfg(feature = "audio-cpal")]
pub mod output;

#[cfg(feature = "audio-cpal")]
pub use output::CpalOutput;

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{audio::pcm, error::Result};

use mixer::SegmentMixer;

pub type SegmentId = u64;

/// Jitter-buffer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackConfig {
    /// Rate of inbound payloads and of the output (Hz). Default: 24000.
    pub sample_rate: u32,
    /// Cushion re-established after an underrun. Default: 40 ms.
    pub initial_buffer_ms: u32,
    /// Queued latency above which segments play faster. Default: 200 ms.
    pub max_latency_ms: u32,
    /// Rate used to drain excess latency. Default: 1.05.
    pub catch_up_rate: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            initial_buffer_ms: 40,
            max_latency_ms: 200,
            catch_up_rate: 1.05,
        }
    }
}

/// A buffer of samples with a start time on the output clock and a rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Absolute output-clock time (seconds).
    pub start_time: f64,
    pub rate: f64,
}

impl ScheduledSegment {
    /// Length of the audio at normal speed.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Wall time the segment occupies at its playback rate.
    pub fn playback_secs(&self) -> f64 {
        self.duration_secs() / self.rate
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.playback_secs()
    }
}

/// Clock plus segment start/stop: what the scheduler needs from a device.
pub trait PlaybackOutput: Send {
    /// Current output-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Start `segment` at its `start_time` with its `rate`.
    fn schedule(&mut self, segment: &ScheduledSegment) -> Result<()>;

    /// Stop a segment. Fails if it already finished.
    fn stop(&mut self, id: SegmentId) -> Result<()>;

    /// Segments that completed since the last call.
    fn drain_ended(&mut self) -> Vec<SegmentId> {
        Vec::new()
    }
}

/// Schedules arriving payloads for gap-free, adaptively paced output.
///
/// Owns `next_start_time` for one output; feed it from one session only.
pub struct PlaybackScheduler<O: PlaybackOutput> {
    config: PlaybackConfig,
    output: O,
    next_start_time: f64,
    /// In-flight segment id → end time on the output clock.
    in_flight: BTreeMap<SegmentId, f64>,
    next_id: SegmentId,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    pub fn new(output: O, config: PlaybackConfig) -> Self {
        Self {
            config,
            output,
            next_start_time: 0.0,
            in_flight: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Audio queued ahead of the clock, in seconds (never negative).
    pub fn buffered_secs(&self) -> f64 {
        (self.next_start_time - self.output.current_time()).max(0.0)
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Schedule one inbound payload right after the previous one.
    ///
    /// Returns `None` for an empty payload.
    pub fn add_audio(&mut self, samples: &[i16]) -> Result<Option<ScheduledSegment>> {
        self.reap();
        if samples.is_empty() {
            return Ok(None);
        }

        let now = self.output.current_time();
        if self.next_start_time < now {
            // Underrun: rebuild a small cushion instead of racing to catch up.
            let resync = now + f64::from(self.config.initial_buffer_ms) / 1000.0;
            debug!(
                gap_ms = (now - self.next_start_time) * 1000.0,
                "playback underrun; resynchronising"
            );
            self.next_start_time = resync;
        }

        let latency = self.next_start_time - now;
        let rate = if latency > f64::from(self.config.max_latency_ms) / 1000.0 {
            trace!(latency_ms = latency * 1000.0, "draining excess playback latency");
            self.config.catch_up_rate
        } else {
            1.0
        };

        let segment = ScheduledSegment {
            id: self.next_id,
            samples: pcm::dequantize(samples).into(),
            sample_rate: self.config.sample_rate,
            start_time: self.next_start_time,
            rate,
        };
        self.output.schedule(&segment)?;

        self.next_id += 1;
        self.in_flight.insert(segment.id, segment.end_time());
        self.next_start_time += segment.playback_secs();
        Ok(Some(segment))
    }

    /// Stop everything in flight and forget the timeline (barge-in).
    pub fn clear(&mut self) {
        let ids: Vec<SegmentId> = self.in_flight.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.output.stop(id) {
                // Segment ended between the check and the stop.
                trace!(id, "ignoring stop failure: {e}");
            }
        }
        if !self.in_flight.is_empty() {
            debug!(segments = self.in_flight.len(), "playback cleared");
        }
        self.in_flight.clear();
        self.next_start_time = 0.0;
    }

    /// Release segments the output reports finished, or whose end time passed.
    pub fn reap(&mut self) {
        for id in self.output.drain_ended() {
            self.in_flight.remove(&id);
        }
        let now = self.output.current_time();
        self.in_flight.retain(|_, end| *end > now);
    }
}

/// Output with a manual clock that renders into memory.
///
/// Useful for tests and for writing a session's playback to a file.
pub struct OfflineOutput {
    mixer: SegmentMixer,
    ended: Vec<SegmentId>,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mixer: SegmentMixer::new(sample_rate),
            ended: Vec::new(),
        }
    }

    /// Advance the clock by `frames` output samples and return them.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        let ended = &mut self.ended;
        self.mixer.render(&mut out, |id| ended.push(id));
        out
    }

    pub fn active(&self) -> usize {
        self.mixer.active()
    }
}

impl PlaybackOutput for OfflineOutput {
    fn current_time(&self) -> f64 {
        self.mixer.current_time()
    }

    fn schedule(&mut self, segment: &ScheduledSegment) -> Result<()> {
        self.mixer.add(segment.clone());
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        if self.mixer.stop(id) {
            Ok(())
        } else {
            Err(crate::error::VoxlinkError::PlaybackScheduling(format!(
                "segment {id} is not playing"
            )))
        }
    }

    fn drain_ended(&mut self) -> Vec<SegmentId> {
        std::mem::take(&mut self.ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoxlinkError;
    use approx::assert_relative_eq;

    /// Manual clock; every stop fails, as if each segment already ended.
    #[derive(Default)]
    struct FakeOutput {
        now: f64,
        scheduled: Vec<ScheduledSegment>,
        stops: Vec<SegmentId>,
    }

    impl PlaybackOutput for FakeOutput {
        fn current_time(&self) -> f64 {
            self.now
        }

        fn schedule(&mut self, segment: &ScheduledSegment) -> Result<()> {
            self.scheduled.push(segment.clone());
            Ok(())
        }

        fn stop(&mut self, id: SegmentId) -> Result<()> {
            self.stops.push(id);
            Err(VoxlinkError::PlaybackScheduling("already ended".into()))
        }
    }

    fn scheduler() -> PlaybackScheduler<FakeOutput> {
        PlaybackScheduler::new(FakeOutput::default(), PlaybackConfig::default())
    }

    /// `ms` of audio at 24 kHz.
    fn payload(ms: usize) -> Vec<i16> {
        vec![1000; 24 * ms]
    }

    #[test]
    fn back_to_back_segments_are_contiguous() {
        let mut s = scheduler();
        let a = s.add_audio(&payload(100)).unwrap().unwrap();
        let b = s.add_audio(&payload(100)).unwrap().unwrap();
        assert_relative_eq!(a.start_time, 0.0);
        assert_relative_eq!(b.start_time, 0.1, epsilon = 1e-9);
        assert_relative_eq!(s.next_start_time(), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn underrun_resyncs_with_cushion() {
        let mut s = scheduler();
        s.add_audio(&payload(100)).unwrap();
        s.output_mut().now = 0.5;
        let seg = s.add_audio(&payload(100)).unwrap().unwrap();
        assert_relative_eq!(seg.start_time, 0.54, epsilon = 1e-9);
        assert_relative_eq!(seg.rate, 1.0);
    }

    #[test]
    fn long_stall_restarts_forty_ms_ahead() {
        let mut s = scheduler();
        s.add_audio(&payload(100)).unwrap();
        s.add_audio(&payload(100)).unwrap();
        // Network stall: 1.5 s pass with nothing queued after 0.2 s.
        s.output_mut().now = 1.7;
        let seg = s.add_audio(&payload(50)).unwrap().unwrap();
        assert_relative_eq!(seg.start_time, 1.74, epsilon = 1e-9);
        assert_relative_eq!(seg.rate, 1.0);
        assert_relative_eq!(s.next_start_time(), 1.79, epsilon = 1e-9);
    }

    #[test]
    fn catches_up_above_max_latency() {
        let mut s = scheduler();
        // 300 ms queued at t=0; the next segment sees latency 0.3 s.
        s.add_audio(&payload(300)).unwrap();
        let fast = s.add_audio(&payload(105)).unwrap().unwrap();
        assert_relative_eq!(fast.rate, 1.05);
        assert_relative_eq!(s.next_start_time(), 0.3 + 0.105 / 1.05, epsilon = 1e-9);
    }

    #[test]
    fn exactly_max_latency_plays_normally() {
        let mut s = scheduler();
        s.add_audio(&payload(200)).unwrap();
        let seg = s.add_audio(&payload(10)).unwrap().unwrap();
        assert_relative_eq!(seg.rate, 1.0);
    }

    #[test]
    fn start_times_never_decrease() {
        let mut s = scheduler();
        let mut last = f64::NEG_INFINITY;
        for (i, clock) in [0.0, 0.01, 0.02, 0.5, 0.51, 0.9, 2.0].iter().enumerate() {
            s.output_mut().now = *clock;
            let seg = s.add_audio(&payload(20 + i * 10)).unwrap().unwrap();
            assert!(seg.start_time >= last);
            assert!(seg.start_time >= *clock);
            last = seg.start_time;
        }
    }

    #[test]
    fn clear_swallows_stop_errors_and_resets() {
        let mut s = scheduler();
        s.add_audio(&payload(100)).unwrap();
        s.add_audio(&payload(100)).unwrap();
        assert_eq!(s.in_flight(), 2);

        s.clear();
        assert_eq!(s.output().stops, vec![0, 1]);
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.next_start_time(), 0.0);
    }

    #[test]
    fn finished_segments_are_released() {
        let mut s = scheduler();
        s.add_audio(&payload(100)).unwrap();
        s.add_audio(&payload(100)).unwrap();
        s.output_mut().now = 0.15;
        s.reap();
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn empty_payload_is_ignored() {
        let mut s = scheduler();
        assert!(s.add_audio(&[]).unwrap().is_none());
        assert!(s.output().scheduled.is_empty());
    }

    #[test]
    fn samples_are_normalised() {
        let mut s = scheduler();
        let seg = s.add_audio(&[16384, -32768]).unwrap().unwrap();
        assert_relative_eq!(seg.samples[0], 0.5);
        assert_relative_eq!(seg.samples[1], -1.0);
    }

    #[test]
    fn offline_output_plays_scheduled_audio() {
        let mut s = PlaybackScheduler::new(OfflineOutput::new(24_000), PlaybackConfig::default());
        s.add_audio(&payload(10)).unwrap();
        let rendered = s.output_mut().render(24 * 20);
        assert!(rendered[..240].iter().all(|&v| (v - 1000.0 / 32768.0).abs() < 1e-6));
        assert!(rendered[240..].iter().all(|&v| v == 0.0));
        s.reap();
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn offline_clear_stops_playing_segment() {
        let mut s = PlaybackScheduler::new(OfflineOutput::new(24_000), PlaybackConfig::default());
        s.add_audio(&payload(100)).unwrap();
        s.output_mut().render(240);
        s.clear();
        assert_eq!(s.output().active(), 0);
        assert!(s.output_mut().render(240).iter().all(|&v| v == 0.0));
    }
}
