//! Renders scheduled segments against a running sample clock.
//!
//! Runs inside the output device callback, so `render` never allocates once
//! the active list has grown to its working size.

use super::{ScheduledSegment, SegmentId};

pub struct SegmentMixer {
    sample_rate: u32,
    /// Output samples rendered so far; the clock.
    clock: u64,
    active: Vec<ScheduledSegment>,
}

impl SegmentMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            clock: 0,
            active: Vec::with_capacity(32),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn current_time(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn add(&mut self, segment: ScheduledSegment) {
        self.active.push(segment);
    }

    /// Returns `false` when `id` is not playing (finished or unknown).
    pub fn stop(&mut self, id: SegmentId) -> bool {
        let before = self.active.len();
        self.active.retain(|s| s.id != id);
        self.active.len() != before
    }

    pub fn stop_all(&mut self) {
        self.active.clear();
    }

    /// Fill `out` with the sum of all segments and advance the clock.
    ///
    /// `on_end` is called once per segment that finished in this block.
    pub fn render(&mut self, out: &mut [f32], mut on_end: impl FnMut(SegmentId)) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let out_rate = self.sample_rate as f64;
        let block_start = self.clock;

        self.active.retain(|seg| {
            let step = seg.sample_rate as f64 * seg.rate / out_rate;
            // Start snapped to the output sample grid.
            let start = (seg.start_time * out_rate).round() as i64;
            let len = seg.samples.len();
            let last = len.saturating_sub(1);

            for (n, slot) in out.iter_mut().enumerate() {
                let elapsed = (block_start + n as u64) as i64 - start;
                if elapsed < 0 {
                    continue;
                }
                let pos = elapsed as f64 * step;
                let lo = pos.floor() as usize;
                if lo >= len {
                    on_end(seg.id);
                    return false;
                }
                let hi = (lo + 1).min(last);
                let w = (pos - lo as f64) as f32;
                *slot += seg.samples[lo] * (1.0 - w) + seg.samples[hi] * w;
            }
            true
        });

        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
        self.clock += out.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn segment(id: SegmentId, samples: Vec<f32>, start_time: f64, rate: f64) -> ScheduledSegment {
        ScheduledSegment {
            id,
            samples: Arc::from(samples),
            sample_rate: 1_000,
            start_time,
            rate,
        }
    }

    #[test]
    fn segment_starts_at_its_start_time() {
        let mut m = SegmentMixer::new(1_000);
        m.add(segment(0, vec![0.5; 4], 0.003, 1.0));
        let mut out = [0.0; 10];
        let mut ended = Vec::new();
        m.render(&mut out, |id| ended.push(id));
        assert_eq!(&out[..3], &[0.0; 3]);
        assert_eq!(&out[3..7], &[0.5; 4]);
        assert_eq!(&out[7..], &[0.0; 3]);
        assert_eq!(ended, vec![0]);
        assert_eq!(m.clock(), 10);
    }

    #[test]
    fn faster_rate_finishes_sooner() {
        let mut m = SegmentMixer::new(1_000);
        m.add(segment(0, (0..10).map(|i| i as f32 / 10.0).collect(), 0.0, 2.0));
        let mut out = [0.0; 10];
        let mut ended = Vec::new();
        m.render(&mut out, |id| ended.push(id));
        assert!(out[5..].iter().all(|&v| v == 0.0));
        assert!((out[2] - 0.4).abs() < 1e-6);
        assert_eq!(ended, vec![0]);
    }

    #[test]
    fn spans_multiple_blocks() {
        let mut m = SegmentMixer::new(1_000);
        m.add(segment(7, vec![0.25; 6], 0.0, 1.0));
        let mut a = [0.0; 4];
        let mut ended = Vec::new();
        m.render(&mut a, |id| ended.push(id));
        assert!(ended.is_empty());
        let mut b = [0.0; 4];
        m.render(&mut b, |id| ended.push(id));
        assert_eq!(&b[..2], &[0.25; 2]);
        assert_eq!(ended, vec![7]);
    }

    #[test]
    fn overlapping_segments_sum_and_clamp() {
        let mut m = SegmentMixer::new(1_000);
        m.add(segment(0, vec![0.75; 4], 0.0, 1.0));
        m.add(segment(1, vec![0.75; 4], 0.0, 1.0));
        let mut out = [0.0; 4];
        m.render(&mut out, |_| {});
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn stop_reports_unknown_ids() {
        let mut m = SegmentMixer::new(1_000);
        m.add(segment(3, vec![0.1; 100], 0.0, 1.0));
        assert!(m.stop(3));
        assert!(!m.stop(3));
    }
}
