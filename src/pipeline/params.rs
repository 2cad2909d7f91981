//! Pipeline constants and the derived layout every stage is sized from.

use super::PipelineError;

pub const SAMPLE_RATE: u32 = 44_100;
pub const SPEC_RES: usize = 1024;
pub const WINDOW_OFFSET_S: f64 = 0.01;
pub const ACCUMULATION_NUM: usize = 10;
pub const HISTORY_TIME_S: f64 = 10.0;
pub const FREQ_CUTOFF_HZ: f64 = 7000.0;

/// What a reconfiguration reset does to the accumulated per-bin history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    #[default]
    Keep,
    Reset,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub sample_rate: u32,
    /// Transform length; must be a power of two.
    pub spec_res: usize,
    /// Hop between overlapping windows, in seconds.
    pub window_offset_s: f64,
    pub accumulation_num: usize,
    pub history_time_s: f64,
    pub freq_cutoff_hz: f64,
    /// Frame buffer capacity in samples. Raised to `2 * spec_res` if smaller.
    pub frame_capacity: usize,
    pub history_policy: HistoryPolicy,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            spec_res: SPEC_RES,
            window_offset_s: WINDOW_OFFSET_S,
            accumulation_num: ACCUMULATION_NUM,
            history_time_s: HISTORY_TIME_S,
            freq_cutoff_hz: FREQ_CUTOFF_HZ,
            frame_capacity: (SAMPLE_RATE as usize) / 2,
            history_policy: HistoryPolicy::Keep,
        }
    }
}

/// Sizes derived from `Params` once at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub sample_rate: u32,
    pub spec_res: usize,
    pub hop_size: usize,
    pub fp_length: usize,
    pub accumulation_num: usize,
    pub history_count: usize,
    pub frame_capacity: usize,
    pub history_policy: HistoryPolicy,
}

impl Params {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn layout(&self) -> Result<Layout, PipelineError> {
        let bad = |msg: String| Err(PipelineError::InvalidParams(msg));

        if self.sample_rate == 0 {
            return bad("sample rate must be > 0".to_string());
        }
        if self.spec_res < 2 || !self.spec_res.is_power_of_two() {
            return bad(format!("spec_res {} is not a power of two", self.spec_res));
        }
        if self.accumulation_num == 0 {
            return bad("accumulation_num must be >= 1".to_string());
        }

        // fp_length = spec_res·cutoff/nyquist bins of width sr/spec_res, so the
        // retained band reaches twice the cutoff and that must fit under Nyquist
        let nyquist = (self.sample_rate as f64) / 2.0;
        let max_cutoff = nyquist / 2.0;
        if !(self.freq_cutoff_hz > 0.0 && self.freq_cutoff_hz <= max_cutoff) {
            return bad(format!(
                "frequency cutoff {:.1} Hz outside (0, {:.1}]: the retained band spans twice the cutoff and must stay below Nyquist ({:.1} Hz)",
                self.freq_cutoff_hz,
                max_cutoff,
                nyquist
            ));
        }

        let hop_size = (self.window_offset_s * (self.sample_rate as f64)).floor();
        if !(hop_size >= 1.0 && hop_size <= (self.spec_res as f64)) {
            return bad(format!(
                "window offset {}s gives hop {} outside 1..={}",
                self.window_offset_s,
                hop_size,
                self.spec_res
            ));
        }
        let hop_size = hop_size as usize;

        let fp_length = (((self.spec_res as f64) * self.freq_cutoff_hz) / nyquist).floor() as usize;
        if fp_length == 0 {
            return bad(format!(
                "frequency cutoff {:.1} Hz is below one bin at spec_res {}",
                self.freq_cutoff_hz,
                self.spec_res
            ));
        }

        let cycle_s = (self.accumulation_num as f64) * self.window_offset_s;
        let history_count = (self.history_time_s / cycle_s).round();
        if !history_count.is_finite() || history_count < 1.0 {
            return bad(format!(
                "history of {}s covers no accumulation cycles of {}s",
                self.history_time_s,
                cycle_s
            ));
        }

        Ok(Layout {
            sample_rate: self.sample_rate,
            spec_res: self.spec_res,
            hop_size,
            fp_length,
            accumulation_num: self.accumulation_num,
            history_count: history_count as usize,
            frame_capacity: self.frame_capacity.max(2 * self.spec_res),
            history_policy: self.history_policy,
        })
    }
}

impl Layout {
    /// Upper edge of the highest retained bin. Twice the configured cutoff.
    pub fn band_top_hz(&self) -> f64 {
        ((self.fp_length as f64) * (self.sample_rate as f64)) / (self.spec_res as f64)
    }

    /// Seconds of audio between two published fingerprints.
    pub fn cycle_seconds(&self) -> f64 {
        ((self.accumulation_num * self.hop_size) as f64) / (self.sample_rate as f64)
    }
}
