//! Fixed-size slicing of quantized samples.
//!
//! When a target chunk size is configured, quantized frames are appended here
//! and drained in exact `chunk_size` slices. Whatever is left over stays
//! buffered for the next frame, so after every `push` the buffered length is
//! strictly below `chunk_size`.

/// Accumulation buffer for 16-bit samples awaiting fixed-size emission.
#[derive(Debug, Clone)]
pub struct SampleAccumulator {
    chunk_size: usize,
    buf: Vec<i16>,
}

impl SampleAccumulator {
    /// Create an accumulator emitting slices of `chunk_size` samples.
    ///
    /// A `chunk_size` of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            buf: Vec::with_capacity(chunk_size * 2),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Samples currently retained (always `< chunk_size` after a `push`).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append `samples` and return every full slice now available, in order.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buf.extend_from_slice(samples);

        let full = self.buf.len() / self.chunk_size;
        if full == 0 {
            return Vec::new();
        }

        let drained = full * self.chunk_size;
        let chunks = self.buf[..drained]
            .chunks_exact(self.chunk_size)
            .map(<[i16]>::to_vec)
            .collect();
        self.buf.drain(..drained);
        chunks
    }

    /// Take the retained remainder, leaving the accumulator empty.
    pub fn take_remainder(&mut self) -> Option<Vec<i16>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nothing_below_chunk_size() {
        let mut acc = SampleAccumulator::new(4);
        assert!(acc.push(&[1, 2, 3]).is_empty());
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn drains_full_slices_and_keeps_remainder() {
        let mut acc = SampleAccumulator::new(4);
        let out = acc.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(out, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(acc.len(), 2);

        let out = acc.push(&[11, 12]);
        assert_eq!(out, vec![vec![9, 10, 11, 12]]);
        assert!(acc.is_empty());
    }

    #[test]
    fn remainder_is_taken_once() {
        let mut acc = SampleAccumulator::new(3);
        acc.push(&[1, 2, 3, 4]);
        assert_eq!(acc.take_remainder(), Some(vec![4]));
        assert_eq!(acc.take_remainder(), None);
    }

    #[test]
    fn chunking_law_holds_across_uneven_pushes() {
        let n = 100;
        let mut acc = SampleAccumulator::new(n);
        let mut total = 0usize;
        let mut full = 0usize;
        for len in [37usize, 128, 5, 250, 99, 1, 64] {
            let frame = vec![7i16; len];
            total += len;
            for chunk in acc.push(&frame) {
                assert_eq!(chunk.len(), n);
                full += 1;
            }
            assert!(acc.len() < n);
        }
        assert_eq!(full, total / n);
        assert_eq!(acc.take_remainder().map(|r| r.len()).unwrap_or(0), total % n);
    }
}
