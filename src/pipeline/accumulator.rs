/// Outcome of adding one power spectrum.
#[derive(Debug, PartialEq)]
pub enum Accumulation<'a> {
    Pending,
    /// Averaged spectrum in dB (`10·log10`), one value per bin.
    Ready(&'a [f32]),
    /// The averaged spectrum contained NaN and was discarded.
    Invalid,
}

/// Sums consecutive power spectra and emits their dB average every
/// `accumulation_num` windows.
pub struct TemporalAccumulator {
    sum: Box<[f32]>,
    out: Box<[f32]>,
    count: usize,
    accumulation_num: usize,
}

impl TemporalAccumulator {
    pub fn new(fp_length: usize, accumulation_num: usize) -> Self {
        Self {
            sum: vec![0.0; fp_length].into_boxed_slice(),
            out: vec![0.0; fp_length].into_boxed_slice(),
            count: 0,
            accumulation_num,
        }
    }

    pub fn accumulate(&mut self, power: &[f32]) -> Accumulation<'_> {
        for (s, &p) in self.sum.iter_mut().zip(power) {
            *s += p;
        }
        self.count += 1;
        if self.count < self.accumulation_num {
            return Accumulation::Pending;
        }

        let n = self.accumulation_num as f32;
        let mut valid = true;
        for (o, &s) in self.out.iter_mut().zip(self.sum.iter()) {
            *o = 10.0 * (s / n).log10();
            valid &= !o.is_nan();
        }
        self.clear();

        if valid { Accumulation::Ready(&self.out) } else { Accumulation::Invalid }
    }

    pub fn clear(&mut self) {
        self.sum.fill(0.0);
        self.count = 0;
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_db_average_every_n() {
        let mut acc = TemporalAccumulator::new(3, 4);
        for _ in 0..3 {
            assert_eq!(acc.accumulate(&[10.0, 100.0, 1.0]), Accumulation::Pending);
        }
        match acc.accumulate(&[10.0, 100.0, 1.0]) {
            Accumulation::Ready(db) => {
                assert!((db[0] - 10.0).abs() < 1e-4);
                assert!((db[1] - 20.0).abs() < 1e-4);
                assert!(db[2].abs() < 1e-4);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn count_stays_below_accumulation_num() {
        let mut acc = TemporalAccumulator::new(2, 3);
        for _ in 0..20 {
            let _ = acc.accumulate(&[1.0, 1.0]);
            assert!(acc.count() < 3);
        }
    }

    #[test]
    fn nan_spectrum_is_dropped_and_state_resets() {
        let mut acc = TemporalAccumulator::new(2, 2);
        let _ = acc.accumulate(&[1.0, f32::NAN]);
        assert_eq!(acc.accumulate(&[1.0, 1.0]), Accumulation::Invalid);
        assert_eq!(acc.count(), 0);

        // the next cycle starts from a clean sum
        let _ = acc.accumulate(&[1.0, 1.0]);
        match acc.accumulate(&[1.0, 1.0]) {
            Accumulation::Ready(db) => assert!(db.iter().all(|v| v.abs() < 1e-6)),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn silence_gives_negative_infinity_not_nan() {
        let mut acc = TemporalAccumulator::new(1, 1);
        match acc.accumulate(&[0.0]) {
            Accumulation::Ready(db) => assert_eq!(db[0], f32::NEG_INFINITY),
            other => panic!("expected Ready, got {:?}", other),
        }
    }
}
