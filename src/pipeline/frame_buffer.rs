//! Frame assembly: batches from the audio callback are appended to a
//! pre-sized buffer, and analysis windows are read back out of it by cursor.

use cpal::{ FromSample, Sample };

use super::PipelineError;

pub struct FrameAssembler {
    buf: Box<[f32]>,
    /// Next free slot.
    fb_index: usize,
    /// Start of the next window to analyse. Always `<= fb_index`.
    start_index: usize,
    window_frames: usize,
}

impl FrameAssembler {
    pub fn new(capacity: usize, window_frames: usize) -> Self {
        debug_assert!(capacity >= 2 * window_frames);
        Self {
            buf: vec![0.0; capacity].into_boxed_slice(),
            fb_index: 0,
            start_index: 0,
            window_frames,
        }
    }

    /// Copies `samples` in as floats, then zeroes them. Batches longer than
    /// one window are rejected.
    pub fn append<T>(&mut self, samples: &mut [T]) -> Result<(), PipelineError>
        where T: Sample, f32: FromSample<T>
    {
        let n = samples.len();
        if n > self.window_frames {
            return Err(PipelineError::OversizedBatch { got: n, max: self.window_frames });
        }

        if self.fb_index >= self.buf.len() - n {
            self.compact(n);
        }

        let dst = &mut self.buf[self.fb_index..self.fb_index + n];
        for (d, s) in dst.iter_mut().zip(samples.iter_mut()) {
            *d = s.to_sample::<f32>();
            *s = T::EQUILIBRIUM;
        }
        self.fb_index += n;
        Ok(())
    }

    /// Moves the unconsumed tail to the front and pulls both cursors back.
    /// If windows were never drained, the oldest samples are dropped so that
    /// `room` more still fit.
    fn compact(&mut self, room: usize) {
        let keep_max = self.buf.len() - room;
        let drop = self.start_index.max(self.fb_index.saturating_sub(keep_max));
        self.buf.copy_within(drop..self.fb_index, 0);
        self.fb_index -= drop;
        self.start_index = self.start_index.saturating_sub(drop);
    }

    /// Next `len`-sample window, advancing the analysis cursor by `hop`.
    /// `None` until enough samples have arrived.
    pub fn next_window(&mut self, len: usize, hop: usize) -> Option<&[f32]> {
        let start = self.start_index;
        if start + len > self.fb_index {
            return None;
        }
        self.start_index += hop;
        Some(&self.buf[start..start + len])
    }

    pub fn clear(&mut self) {
        self.fb_index = 0;
        self.start_index = 0;
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.fb_index - self.start_index
    }

    #[cfg(test)]
    pub fn cursors(&self) -> (usize, usize) {
        (self.start_index, self.fb_index)
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_zeroes_input_and_advances() {
        let mut fa = FrameAssembler::new(64, 16);
        let mut batch = [0.5f32; 8];
        fa.append(&mut batch).unwrap();
        assert!(batch.iter().all(|&s| s == 0.0));
        assert_eq!(fa.cursors(), (0, 8));
    }

    #[test]
    fn integer_samples_are_converted() {
        let mut fa = FrameAssembler::new(64, 16);
        let mut batch = [i16::MAX, 0, i16::MIN, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        fa.append(&mut batch).unwrap();
        assert!(batch.iter().all(|&s| s == 0));
        let w = fa.next_window(16, 16).unwrap();
        assert!((w[0] - 1.0).abs() < 1e-3);
        assert_eq!(w[1], 0.0);
        assert_eq!(w[2], -1.0);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let mut fa = FrameAssembler::new(64, 16);
        let mut batch = [1.0f32; 17];
        assert_eq!(
            fa.append(&mut batch),
            Err(PipelineError::OversizedBatch { got: 17, max: 16 })
        );
        assert_eq!(fa.cursors(), (0, 0));
        assert_eq!(batch[0], 1.0);
    }

    #[test]
    fn defers_until_a_full_window() {
        let mut fa = FrameAssembler::new(64, 16);
        let mut batch = [1.0f32; 10];
        fa.append(&mut batch).unwrap();
        assert!(fa.next_window(16, 4).is_none());
        let mut batch = [1.0f32; 6];
        fa.append(&mut batch).unwrap();
        assert!(fa.next_window(16, 4).is_some());
        assert!(fa.next_window(16, 4).is_none());
    }

    #[test]
    fn compaction_keeps_cursor_invariants_and_data() {
        let mut fa = FrameAssembler::new(40, 16);
        let mut next = 0.0f32;
        let mut seen = Vec::new();
        for _ in 0..50 {
            let mut batch = [0.0f32; 7];
            for s in batch.iter_mut() {
                *s = next;
                next += 1.0;
            }
            fa.append(&mut batch).unwrap();
            let (start, fb) = fa.cursors();
            assert!(start <= fb && fb <= fa.capacity());
            while let Some(w) = fa.next_window(16, 5) {
                seen.push(w[0]);
                for pair in w.windows(2) {
                    assert_eq!(pair[1], pair[0] + 1.0);
                }
            }
        }
        // window starts advance by exactly one hop, across compactions
        for pair in seen.windows(2) {
            assert_eq!(pair[1], pair[0] + 5.0);
        }
        assert!(seen.len() > 50);
    }

    #[test]
    fn undrained_buffer_drops_oldest_instead_of_overflowing() {
        let mut fa = FrameAssembler::new(32, 16);
        for k in 0..10 {
            let mut batch = [k as f32; 16];
            fa.append(&mut batch).unwrap();
            let (start, fb) = fa.cursors();
            assert!(start <= fb && fb <= fa.capacity());
        }
        // only the two newest batches survive
        assert_eq!(fa.next_window(16, 16).unwrap()[0], 8.0);
        assert_eq!(fa.next_window(16, 16).unwrap()[0], 9.0);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut fa = FrameAssembler::new(64, 16);
        let mut batch = [1.0f32; 16];
        fa.append(&mut batch).unwrap();
        fa.clear();
        assert_eq!(fa.buffered(), 0);
        assert!(fa.next_window(16, 16).is_none());
    }
}
