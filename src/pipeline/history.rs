//! Per-bin bounded history of accumulated dB values and the low-percentile
//! digest computed over it.
//!
//! The digest takes the 5th percentile of each bin rather than its mean so
//! that short loud events do not pull the fingerprint away from the
//! background noise floor.

use super::PipelineError;

/// Percentile (in percent) reported per bin.
pub const SUMMARY_PERCENTILE: usize = 5;

/// Fixed-depth FIFO of one bin's history. Pushing into a full window evicts
/// the oldest value.
pub struct SlidingWindow {
    values: Box<[f32]>,
    /// Index of the oldest value.
    head: usize,
    len: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self { values: vec![0.0; capacity.max(1)].into_boxed_slice(), head: 0, len: 0 }
    }

    pub fn push(&mut self, v: f32) {
        let cap = self.values.len();
        if self.len == cap {
            self.values[self.head] = v;
            self.head = (self.head + 1) % cap;
        } else {
            self.values[(self.head + self.len) % cap] = v;
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let cap = self.values.len();
        (0..self.len).map(move |i| self.values[(self.head + i) % cap])
    }

    /// Copies the current contents into the front of `out`, returning the count.
    fn copy_into(&self, out: &mut [f32]) -> usize {
        for (o, v) in out.iter_mut().zip(self.iter()) {
            *o = v;
        }
        self.len
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Nearest-rank percentile: the value at 1-based rank `ceil(pct/100 · n)` of
/// the ascending order. Reorders `values`. Returns 0.0 for an empty slice.
pub fn nearest_rank(values: &mut [f32], pct: usize) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let rank = ((pct * n + 99) / 100).clamp(1, n);
    let (_, v, _) = values.select_nth_unstable_by(rank - 1, |a, b| a.total_cmp(b));
    *v
}

/// `fp_length` sliding windows of depth `history_count`.
pub struct SpectrogramHistory {
    windows: Vec<SlidingWindow>,
    scratch: Box<[f32]>,
}

impl SpectrogramHistory {
    pub fn new(fp_length: usize, history_count: usize) -> Self {
        Self {
            windows: (0..fp_length).map(|_| SlidingWindow::new(history_count)).collect(),
            scratch: vec![0.0; history_count.max(1)].into_boxed_slice(),
        }
    }

    pub fn update(&mut self, spectrum: &[f32]) -> Result<(), PipelineError> {
        if spectrum.len() != self.windows.len() {
            return Err(PipelineError::LengthMismatch {
                expected: self.windows.len(),
                got: spectrum.len(),
            });
        }
        for (w, &v) in self.windows.iter_mut().zip(spectrum) {
            w.push(v);
        }
        Ok(())
    }

    /// Writes the per-bin percentile digest into `out`. Bins whose window is
    /// not yet full use whatever history exists; empty bins report 0.0.
    pub fn summary(&mut self, out: &mut [f32]) -> Result<(), PipelineError> {
        if out.len() != self.windows.len() {
            return Err(PipelineError::LengthMismatch {
                expected: self.windows.len(),
                got: out.len(),
            });
        }
        for (o, w) in out.iter_mut().zip(self.windows.iter()) {
            let n = w.copy_into(&mut self.scratch);
            *o = nearest_rank(&mut self.scratch[..n], SUMMARY_PERCENTILE);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn window(&self, bin: usize) -> Option<&SlidingWindow> {
        self.windows.get(bin)
    }

    /// Number of spectra currently held (equal across bins).
    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.windows.first().map(|w| w.len()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        for w in self.windows.iter_mut() {
            w.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_evicts_oldest_and_never_exceeds_capacity() {
        let mut w = SlidingWindow::new(3);
        for v in 0..10 {
            w.push(v as f32);
            assert!(w.len() <= 3);
        }
        assert_eq!(w.iter().collect::<Vec<_>>(), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(nearest_rank(&mut [], 5), 0.0);
    }

    #[test]
    fn nearest_rank_small_sets() {
        assert_eq!(nearest_rank(&mut [4.0], 5), 4.0);
        // rank ceil(0.05 * 20) = 1
        let mut v: Vec<f32> = (1..=20).rev().map(|x| x as f32).collect();
        assert_eq!(nearest_rank(&mut v, 5), 1.0);
        // rank ceil(0.05 * 100) = 5
        let mut v: Vec<f32> = (1..=100).rev().map(|x| x as f32).collect();
        assert_eq!(nearest_rank(&mut v, 5), 5.0);
        // rank ceil(0.05 * 101) = 6
        let mut v: Vec<f32> = (1..=101).map(|x| x as f32).collect();
        assert_eq!(nearest_rank(&mut v, 5), 6.0);
    }

    #[test]
    fn percentile_bounds_hold_with_ties() {
        let data: Vec<f32> = (0..73).map(|i| ((i * 37) % 11) as f32).collect();
        let v = nearest_rank(&mut data.clone(), 5);
        let n = data.len() as f32;
        let le = data.iter().filter(|&&x| x <= v).count() as f32;
        let ge = data.iter().filter(|&&x| x >= v).count() as f32;
        assert!(le >= 0.05 * n);
        assert!(ge >= 0.95 * n);
    }

    #[test]
    fn summary_before_any_update_is_zeros() {
        let mut h = SpectrogramHistory::new(4, 10);
        let mut out = [1.0f32; 4];
        h.summary(&mut out).unwrap();
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn summary_over_partial_history() {
        let mut h = SpectrogramHistory::new(2, 100);
        h.update(&[3.0, -1.0]).unwrap();
        h.update(&[1.0, -2.0]).unwrap();
        h.update(&[2.0, -3.0]).unwrap();
        let mut out = [0.0f32; 2];
        h.summary(&mut out).unwrap();
        assert_eq!(out, [1.0, -3.0]);
        assert_eq!(h.depth(), 3);
    }

    #[test]
    fn summary_ignores_evicted_values() {
        let mut h = SpectrogramHistory::new(1, 4);
        h.update(&[-100.0]).unwrap();
        for v in [5.0, 6.0, 7.0, 8.0] {
            h.update(&[v]).unwrap();
        }
        let mut out = [0.0f32; 1];
        h.summary(&mut out).unwrap();
        assert_eq!(out[0], 5.0);
        assert_eq!(h.window(0).unwrap().len(), 4);
    }

    #[test]
    fn negative_infinity_sorts_lowest() {
        let mut h = SpectrogramHistory::new(1, 4);
        for v in [f32::NEG_INFINITY, 1.0, 2.0] {
            h.update(&[v]).unwrap();
        }
        let mut out = [0.0f32; 1];
        h.summary(&mut out).unwrap();
        assert_eq!(out[0], f32::NEG_INFINITY);
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut h = SpectrogramHistory::new(3, 4);
        assert_eq!(
            h.update(&[1.0]),
            Err(PipelineError::LengthMismatch { expected: 3, got: 1 })
        );
        let mut out = [0.0f32; 2];
        assert!(h.summary(&mut out).is_err());
        assert_eq!(h.depth(), 0);
    }
}
