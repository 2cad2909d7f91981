//! Windowed power spectra of overlapping analysis windows.

use std::sync::Arc;

use realfft::{ num_complex::Complex, RealFftPlanner, RealToComplex };

/// Turns one windowed block of samples into per-bin power.
///
/// `input` may be clobbered. `power` receives `power.len()` non-negative
/// values in ascending frequency order starting at DC.
pub trait PowerTransform: Send {
    fn power_spectrum(&mut self, input: &mut [f32], power: &mut [f32]);
}

/// Real-input FFT with all buffers planned up front.
pub struct RealFftTransform {
    r2c: Arc<dyn RealToComplex<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RealFftTransform {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(len);
        let spectrum = r2c.make_output_vec();
        let scratch = r2c.make_scratch_vec();
        Self { r2c, spectrum, scratch }
    }
}

impl PowerTransform for RealFftTransform {
    fn power_spectrum(&mut self, input: &mut [f32], power: &mut [f32]) {
        if self.r2c.process_with_scratch(input, &mut self.spectrum, &mut self.scratch).is_err() {
            // poison the cycle; the accumulator drops NaN spectra
            power.fill(f32::NAN);
            return;
        }
        for (p, c) in power.iter_mut().zip(self.spectrum.iter()) {
            *p = c.norm_sqr();
        }
    }
}

/// Periodic Hamming window.
pub fn hamming(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = (2.0 * std::f32::consts::PI * (i as f32)) / (n as f32);
            0.54 - 0.46 * t.cos()
        })
        .collect()
}

pub struct SpectralAnalyzer<T: PowerTransform = RealFftTransform> {
    transform: T,
    window_fn: Box<[f32]>,
    scratch: Box<[f32]>,
    power: Box<[f32]>,
}

#[cfg(test)]
impl SpectralAnalyzer<RealFftTransform> {
    pub fn new(spec_res: usize, fp_length: usize) -> Self {
        Self::with_transform(RealFftTransform::new(spec_res), spec_res, fp_length)
    }
}

impl<T: PowerTransform> SpectralAnalyzer<T> {
    pub fn with_transform(transform: T, spec_res: usize, fp_length: usize) -> Self {
        Self {
            transform,
            window_fn: hamming(spec_res).into_boxed_slice(),
            scratch: vec![0.0; spec_res].into_boxed_slice(),
            power: vec![0.0; fp_length].into_boxed_slice(),
        }
    }

    /// Power of the first `fp_length` bins of `window`, DC upward. Bins past
    /// `fp_length` are discarded.
    pub fn power_spectrum(&mut self, window: &[f32]) -> &[f32] {
        for ((s, &x), &w) in self.scratch.iter_mut().zip(window).zip(self.window_fn.iter()) {
            *s = x * w;
        }
        self.transform.power_spectrum(&mut self.scratch, &mut self.power);
        &self.power
    }
}
