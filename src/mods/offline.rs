use anyhow::{ bail, Result };
use crossbeam_channel::{ bounded, Receiver };
use std::{ path::Path, sync::Arc };

use crate::{
    decode::{ FirstChannelDecoder, LinearResampler },
    logger::Logger,
    mods::{ describe, report_events, CsvSink },
    pipeline::{ FingerprintPublisher, Fingerprinter, PipelineEvent, Producer, PushSource },
    Config,
};

const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineSummary {
    pub sample_rate: u32,
    pub frames: usize,
    pub cycles: usize,
    pub dropped: usize,
    pub rows: usize,
    pub fingerprint: Option<Vec<f32>>,
}

/// Offline mode: run a decoded file through the pipeline as if it were live.
pub fn run_offline(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    let summary = fingerprint_file(cli, &logger)?;
    if let Some(fp) = &summary.fingerprint {
        logger.info(&describe(fp))?;
    }
    if summary.dropped > 0 {
        crate::log_warn!(logger, "{} cycle(s) dropped", summary.dropped)?;
    }
    crate::log_info!(
        logger,
        "Done: {} frames at {} Hz, {} cycle(s), {} CSV row(s)",
        summary.frames,
        summary.sample_rate,
        summary.cycles,
        summary.rows
    )?;
    Ok(())
}

/// Pushes pipeline-rate audio in fixed blocks and takes a snapshot every
/// tick of audio time.
struct BlockFeeder<'a> {
    fp: Fingerprinter<PushSource>,
    rx: Receiver<PipelineEvent>,
    logger: &'a Logger,
    sink: Option<CsvSink>,
    tag: String,
    sample_rate: u32,
    block: usize,
    tick_frames: usize,
    next_tick: usize,
    fed: usize,
    cycles: usize,
    dropped: usize,
    rows: usize,
    out: Vec<f32>,
}

impl BlockFeeder<'_> {
    /// Consumes whole blocks from the front of `pending`; with `flush` the
    /// short remainder goes too.
    fn feed(&mut self, pending: &mut Vec<f32>, flush: bool) -> Result<()> {
        let mut used = 0;
        while pending.len() - used >= self.block || (flush && used < pending.len()) {
            let end = (used + self.block).min(pending.len());
            self.push(&pending[used..end])?;
            used = end;
        }
        pending.drain(..used);
        Ok(())
    }

    fn push(&mut self, block: &[f32]) -> Result<()> {
        self.fp.source_mut().push(block, 1);
        self.fed += block.len();
        let tally = report_events(&self.rx, self.logger)?;
        self.cycles += tally.published;
        self.dropped += tally.dropped();

        while self.fed >= self.next_tick {
            if self.fp.snapshot(&mut self.out) {
                if let Some(sink) = self.sink.as_mut() {
                    let offset_s = (self.next_tick as f64) / (self.sample_rate as f64);
                    sink.write_row(&self.tag, offset_s, &self.out)?;
                    self.rows += 1;
                }
            }
            self.next_tick += self.tick_frames;
        }
        Ok(())
    }
}

pub fn fingerprint_file(cli: &Config, logger: &Logger) -> Result<OfflineSummary> {
    if cli.input_path.is_empty() {
        bail!("--input <PATH> is required in offline mode");
    }
    let path = Path::new(&cli.input_path);

    logger.info(&format!("Decoding: {}", path.display()))?;
    let mut decoder = FirstChannelDecoder::open(path)?;
    let info = decoder.info();
    crate::log_info!(logger, "Stream: sr={} Hz, channels={}", info.sample_rate, info.channels)?;

    // 0 keeps the file's own rate
    let target_sr = if cli.sample_rate == 0 { info.sample_rate } else { cli.sample_rate };
    if info.sample_rate != target_sr {
        crate::log_info!(logger, "Resampling {} Hz -> {} Hz", info.sample_rate, target_sr)?;
    }
    let mut resampler = LinearResampler::new(info.sample_rate, target_sr);

    let layout = cli.params(target_sr).layout()?;
    let publisher = Arc::new(FingerprintPublisher::new(layout.fp_length));
    let (tx, rx) = bounded(EVENT_QUEUE);
    let producer = Producer::new(layout, publisher.clone()).with_events(tx);
    let mut fp = Fingerprinter::new(PushSource::new(producer), publisher);
    fp.try_start()?;

    let tick_frames = (((cli.tick_ms as f64) * (target_sr as f64)) / 1000.0).round().max(1.0) as usize;
    let mut feeder = BlockFeeder {
        fp,
        rx,
        logger,
        sink: CsvSink::open_optional(&cli.out_path)?,
        tag: format!("file://{}", path.display()),
        sample_rate: target_sr,
        block: cli.block_frames.max(1),
        tick_frames,
        next_tick: tick_frames,
        fed: 0,
        cycles: 0,
        dropped: 0,
        rows: 0,
        out: vec![0.0f32; layout.fp_length],
    };

    let mut pending = Vec::new();
    while let Some(block) = decoder.next_block()? {
        resampler.process(block, &mut pending);
        feeder.feed(&mut pending, false)?;
    }
    resampler.finish(&mut pending);
    feeder.feed(&mut pending, true)?;

    let mut out = vec![0.0f32; layout.fp_length];
    let fingerprint = if feeder.fp.snapshot(&mut out) {
        Some(out)
    } else {
        crate::log_warn!(
            logger,
            "Input too short for one accumulation cycle ({:.3} s needed)",
            ((layout.spec_res + (layout.accumulation_num - 1) * layout.hop_size) as f64) /
                (target_sr as f64)
        )?;
        None
    };
    feeder.fp.stop();

    Ok(OfflineSummary {
        sample_rate: target_sr,
        frames: feeder.fed,
        cycles: feeder.cycles,
        dropped: feeder.dropped,
        rows: feeder.rows,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use crate::Mode;
    use std::{ f32::consts::PI, fs, io::Write, path::PathBuf };

    fn write_wav(path: &Path, sr: u32, samples: &[f32]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::with_capacity(44 + (data_len as usize));
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sr.to_le_bytes());
        bytes.extend_from_slice(&(sr * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &s in samples {
            bytes.extend_from_slice(&((s * 32767.0) as i16).to_le_bytes());
        }
        fs::File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    fn temp(name: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("ambient-fp-{}-{}", std::process::id(), name));
        let _ = fs::remove_file(&p);
        p
    }

    fn offline_config(input: &Path, out: &Path) -> Config {
        Config {
            mode: Mode::Offline,
            input_path: input.to_string_lossy().into_owned(),
            out_path: out.to_string_lossy().into_owned(),
            sample_rate: 44_100,
            tick_ms: 500,
            ..Config::default()
        }
    }

    #[test]
    fn tone_file_produces_fingerprint_rows() {
        let wav = temp("tone.wav");
        let csv = temp("tone.csv");
        let sr = 44_100u32;
        let tone: Vec<f32> = (0..(sr as usize) * 2)
            .map(|i| 0.5 * (2.0 * PI * 1000.0 * (i as f32) / (sr as f32)).sin())
            .collect();
        write_wav(&wav, sr, &tone);

        let logger = Logger::stderr(LogLevel::Error);
        let summary = fingerprint_file(&offline_config(&wav, &csv), &logger).unwrap();
        let text = fs::read_to_string(&csv).unwrap();
        let _ = fs::remove_file(&wav);
        let _ = fs::remove_file(&csv);

        assert_eq!(summary.frames, 88_200);
        assert_eq!(summary.rows, 4);
        assert!(summary.cycles >= 15);
        assert_eq!(summary.dropped, 0);

        let fp = summary.fingerprint.unwrap();
        assert_eq!(fp.len(), 325);
        // 1 kHz lands near bin 1000 / (44100 / 1024) ~ 23
        let peak = fp
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((22..=24).contains(&peak), "peak at bin {peak}");

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], crate::mods::CSV_HEADER);
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[2], "0.500");
        assert_eq!(fields[3], "325");
        assert_eq!(fields[4].split(' ').count(), 325);
    }

    #[test]
    fn resampled_file_is_fed_at_pipeline_rate() {
        let wav = temp("tone48k.wav");
        let sr = 48_000u32;
        let tone: Vec<f32> = (0..(sr as usize) * 2)
            .map(|i| 0.5 * (2.0 * PI * 1000.0 * (i as f32) / (sr as f32)).sin())
            .collect();
        write_wav(&wav, sr, &tone);
        let cli = offline_config(&wav, Path::new(""));

        let logger = Logger::stderr(LogLevel::Error);
        let summary = fingerprint_file(&cli, &logger).unwrap();
        let _ = fs::remove_file(&wav);

        assert_eq!(summary.sample_rate, 44_100);
        assert_eq!(summary.frames, 88_200);
        let fp = summary.fingerprint.unwrap();
        let peak = fp
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((22..=24).contains(&peak), "peak at bin {peak}");
    }

    #[test]
    fn short_file_has_no_fingerprint() {
        let wav = temp("short.wav");
        write_wav(&wav, 44_100, &vec![0.1f32; 2000]);
        // empty out path: no CSV
        let cli = offline_config(&wav, Path::new(""));

        let logger = Logger::stderr(LogLevel::Error);
        let summary = fingerprint_file(&cli, &logger).unwrap();
        let _ = fs::remove_file(&wav);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.rows, 0);
        assert!(summary.fingerprint.is_none());
    }

    #[test]
    fn missing_input_is_rejected() {
        let logger = Logger::stderr(LogLevel::Error);
        let cli = Config { mode: Mode::Offline, ..Config::default() };
        assert!(fingerprint_file(&cli, &logger).is_err());
    }
}
