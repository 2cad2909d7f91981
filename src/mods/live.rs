use anyhow::{ bail, Context, Result };
use crossbeam_channel::bounded;
use std::{
    sync::{ atomic::{ AtomicBool, Ordering }, Arc },
    thread,
    time::{ Duration, Instant },
};

use crate::{
    capture::{ CpalSource, InputDevice },
    logger::Logger,
    mods::{ describe, report_events, CsvSink },
    pipeline::{ FingerprintPublisher, Fingerprinter, Producer },
    Config,
};

const EVENT_QUEUE: usize = 256;

/// Live mode: fingerprint the default microphone until Ctrl+C.
pub fn run_live(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    let input = InputDevice::default_with_rate(cli.sample_rate).context(
        "opening default input device"
    )?;
    if input.sample_rate() != cli.sample_rate {
        crate::log_warn!(
            logger,
            "{} Hz not supported by device, using {} Hz",
            cli.sample_rate,
            input.sample_rate()
        )?;
    }
    crate::log_info!(
        logger,
        "Input device: {} ({} Hz, {} ch, {:?})",
        input.name(),
        input.sample_rate(),
        input.channels(),
        input.sample_format
    )?;

    let layout = cli.params(input.sample_rate()).layout()?;
    crate::log_info!(
        logger,
        "Layout: spec_res={} hop={} fp_length={} (0-{:.0} Hz) history={} cycles ({:.2} s/cycle, policy {:?})",
        layout.spec_res,
        layout.hop_size,
        layout.fp_length,
        layout.band_top_hz(),
        layout.history_count,
        layout.cycle_seconds(),
        layout.history_policy
    )?;

    let publisher = Arc::new(FingerprintPublisher::new(layout.fp_length));
    let (tx, rx) = bounded(EVENT_QUEUE);
    let producer = Producer::new(layout, publisher.clone()).with_events(tx);
    let source = CpalSource::open(input, producer)?;
    let mut fp = Fingerprinter::new(source, publisher);
    let reader = fp.reader();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    fp.try_start().context("starting capture")?;
    logger.info("Capture started. Press Ctrl+C to stop.")?;

    let mut sink = CsvSink::open_optional(&cli.out_path)?;
    let mut out = vec![0.0f32; reader.fp_length()];
    let mut reopens_left = cli.reopen_attempts;
    let started = Instant::now();
    let tick = Duration::from_millis(cli.tick_ms);

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(tick);
        let tally = report_events(&rx, &logger)?;

        if tally.source_failure.is_some() || !fp.is_running() {
            fp.stop();
            if reopens_left == 0 {
                bail!("audio source failed and no reopen attempts are left");
            }
            reopens_left -= 1;
            crate::log_warn!(logger, "Reopening input ({} attempt(s) left after this)", reopens_left)?;
            let reopened = fp
                .source_mut()
                .reopen()
                .and_then(|_| fp.try_start());
            match reopened {
                Ok(()) => logger.info("Capture resumed")?,
                Err(e) => crate::log_error!(logger, "Reopen failed: {}", e)?,
            }
            continue;
        }

        if !reader.snapshot(&mut out) {
            logger.debug("No fingerprint yet")?;
            continue;
        }
        if tally.published > 0 {
            logger.info(&describe(&out))?;
        }
        if let Some(sink) = sink.as_mut() {
            sink.write_row("mic", started.elapsed().as_secs_f64(), &out)?;
        }
    }

    fp.stop();
    report_events(&rx, &logger)?;
    logger.info("Capture stopped")?;
    Ok(())
}
