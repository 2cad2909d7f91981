pub mod live;
pub mod offline;

use std::{ fs::{ File, OpenOptions }, io::Write, path::Path };

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::Receiver;

use crate::logger::Logger;
use crate::pipeline::PipelineEvent;

pub const CSV_HEADER: &str = "timestamp,source,offset_s,fp_length,fp_db";

/// Min/mean/max over the finite bins of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Digest {
    pub min: f32,
    pub mean: f32,
    pub max: f32,
    pub finite: usize,
}

pub fn digest(fp: &[f32]) -> Option<Digest> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut finite = 0usize;
    for &v in fp.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
        finite += 1;
    }
    if finite == 0 {
        return None;
    }
    Some(Digest { min, mean: (sum / (finite as f64)) as f32, max, finite })
}

pub fn describe(fp: &[f32]) -> String {
    match digest(fp) {
        Some(d) =>
            format!(
                "fp[{}] min={:.2} dB mean={:.2} dB max={:.2} dB ({} finite)",
                fp.len(),
                d.min,
                d.mean,
                d.max,
                d.finite
            ),
        None => format!("fp[{}] silent (no finite bins)", fp.len()),
    }
}

pub fn format_fp(fp: &[f32]) -> String {
    fp.iter()
        .map(|v| format!("{:.2}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append-only fingerprint CSV; writes the header into empty files.
pub struct CsvSink {
    file: File,
}

impl CsvSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", CSV_HEADER)?;
            file.flush()?;
        }
        Ok(Self { file })
    }

    /// `None` when `path` is empty.
    pub fn open_optional(path: &str) -> Result<Option<Self>> {
        if path.is_empty() { Ok(None) } else { Self::open(path).map(Some) }
    }

    pub fn write_row(&mut self, source: &str, offset_s: f64, fp: &[f32]) -> Result<()> {
        writeln!(
            self.file,
            "{},{},{:.3},{},{}",
            Utc::now().to_rfc3339(),
            source.replace(',', "_"),
            offset_s,
            fp.len(),
            format_fp(fp)
        )?;
        self.file.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventTally {
    pub published: usize,
    pub invalid: usize,
    pub lock_failed: usize,
    pub source_failure: Option<String>,
}

impl EventTally {
    /// Cycles that completed but were not published.
    pub fn dropped(&self) -> usize {
        self.invalid + self.lock_failed
    }
}

/// Drains everything the producer has queued and logs it.
pub fn report_events(rx: &Receiver<PipelineEvent>, logger: &Logger) -> Result<EventTally> {
    let mut tally = EventTally::default();
    for ev in rx.try_iter() {
        match ev {
            PipelineEvent::Published { cycle } => {
                tally.published += 1;
                crate::log_debug!(logger, "cycle {} published", cycle)?;
            }
            PipelineEvent::InvalidSpectrum { cycle } => {
                tally.invalid += 1;
                crate::log_warn!(logger, "cycle {} dropped: spectrum contained NaN", cycle)?;
            }
            PipelineEvent::LockFailed { cycle } => {
                tally.lock_failed += 1;
                crate::log_error!(logger, "cycle {} not published: fingerprint lock poisoned", cycle)?;
            }
            PipelineEvent::Reset { history_cleared } => {
                crate::log_info!(logger, "pipeline reset (history cleared: {})", history_cleared)?;
            }
            PipelineEvent::SourceFailed(msg) => {
                crate::log_error!(logger, "audio source failed: {}", msg)?;
                tally.source_failure = Some(msg);
            }
        }
    }
    Ok(tally)
}
