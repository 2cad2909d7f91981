//! Real-time producer context: everything the audio callback touches,
//! allocated once and driven synchronously per delivered batch.

use std::sync::Arc;

use cpal::{ FromSample, Sample };
use crossbeam_channel::Sender;

use super::{
    accumulator::{ Accumulation, TemporalAccumulator },
    frame_buffer::FrameAssembler,
    history::SpectrogramHistory,
    params::{ HistoryPolicy, Layout },
    publisher::FingerprintPublisher,
    spectral::{ PowerTransform, RealFftTransform, SpectralAnalyzer },
};

/// Things worth logging that happen on the audio thread. Sent with
/// `try_send`, so a full channel drops events rather than blocking.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    Published { cycle: u64 },
    InvalidSpectrum { cycle: u64 },
    LockFailed { cycle: u64 },
    Reset { history_cleared: bool },
    SourceFailed(String),
}

pub struct Producer<T: PowerTransform = RealFftTransform> {
    layout: Layout,
    assembler: FrameAssembler,
    analyzer: SpectralAnalyzer<T>,
    accumulator: TemporalAccumulator,
    history: SpectrogramHistory,
    fingerprint: Box<[f32]>,
    batch: Box<[f32]>,
    publisher: Arc<FingerprintPublisher>,
    events: Option<Sender<PipelineEvent>>,
    cycle: u64,
    /// Publisher generation whose reset was last honoured.
    generation: u64,
}

impl Producer<RealFftTransform> {
    pub fn new(layout: Layout, publisher: Arc<FingerprintPublisher>) -> Self {
        let transform = RealFftTransform::new(layout.spec_res);
        Self::with_transform(layout, publisher, transform)
    }
}

impl<T: PowerTransform> Producer<T> {
    pub fn with_transform(layout: Layout, publisher: Arc<FingerprintPublisher>, transform: T) -> Self {
        Self {
            assembler: FrameAssembler::new(layout.frame_capacity, layout.spec_res),
            analyzer: SpectralAnalyzer::with_transform(transform, layout.spec_res, layout.fp_length),
            accumulator: TemporalAccumulator::new(layout.fp_length, layout.accumulation_num),
            history: SpectrogramHistory::new(layout.fp_length, layout.history_count),
            fingerprint: vec![0.0; layout.fp_length].into_boxed_slice(),
            batch: vec![0.0; layout.spec_res].into_boxed_slice(),
            publisher,
            events: None,
            cycle: 0,
            generation: 0,
            layout,
        }
    }

    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn publisher(&self) -> &Arc<FingerprintPublisher> {
        &self.publisher
    }

    pub fn events(&self) -> Option<&Sender<PipelineEvent>> {
        self.events.as_ref()
    }

    #[cfg(test)]
    pub fn history(&self) -> &SpectrogramHistory {
        &self.history
    }

    /// Feeds interleaved frames; only the first channel is analysed.
    /// Input is dropped while the pipeline is idle. `data` is only borrowed,
    /// so the frame zeroing applies to the internal batch copy, not to the
    /// host's buffer.
    pub fn process_interleaved<S>(&mut self, data: &[S], channels: usize)
        where S: Sample, f32: FromSample<S>
    {
        if let Some(generation) = self.publisher.take_reset_request() {
            self.generation = generation;
            self.reset();
        }
        if !self.publisher.is_running() {
            return;
        }

        let channels = channels.max(1);
        for chunk in data.chunks(self.batch.len() * channels) {
            let n = chunk.len() / channels;
            for (b, frame) in self.batch.iter_mut().zip(chunk.chunks_exact(channels)) {
                *b = frame[0].to_sample::<f32>();
            }
            // batches are capped at the window size, so this cannot reject
            if self.assembler.append::<f32>(&mut self.batch[..n]).is_ok() {
                self.drain_windows();
            }
        }
    }

    fn drain_windows(&mut self) {
        let (len, hop) = (self.layout.spec_res, self.layout.hop_size);
        while let Some(window) = self.assembler.next_window(len, hop) {
            let power = self.analyzer.power_spectrum(window);
            match self.accumulator.accumulate(power) {
                Accumulation::Pending => {}
                Accumulation::Invalid => {
                    self.cycle += 1;
                    emit(&self.events, PipelineEvent::InvalidSpectrum { cycle: self.cycle });
                }
                Accumulation::Ready(spectrum) => {
                    self.cycle += 1;
                    if self.history.update(spectrum).is_err() {
                        continue;
                    }
                    if self.history.summary(&mut self.fingerprint).is_err() {
                        continue;
                    }
                    let event = match self.publisher.publish(&self.fingerprint, self.generation) {
                        Ok(true) => PipelineEvent::Published { cycle: self.cycle },
                        Ok(false) => {
                            continue;
                        }
                        Err(_) => PipelineEvent::LockFailed { cycle: self.cycle },
                    };
                    emit(&self.events, event);
                }
            }
        }
    }

    /// Returns the frame buffer and accumulator to empty. The history is
    /// cleared too when the layout's policy says so.
    pub fn reset(&mut self) {
        self.assembler.clear();
        self.accumulator.clear();
        let history_cleared = self.layout.history_policy == HistoryPolicy::Reset;
        if history_cleared {
            self.history.clear();
        }
        emit(&self.events, PipelineEvent::Reset { history_cleared });
    }
}

fn emit(events: &Option<Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        let _ = tx.try_send(event);
    }
}
