//! Audio source seam and the start/stop/snapshot control surface.

use std::sync::Arc;

use cpal::{ FromSample, Sample };

use super::{
    producer::Producer,
    publisher::FingerprintPublisher,
    spectral::{ PowerTransform, RealFftTransform },
    SourceError,
};

/// Something that delivers PCM frames into a `Producer` from its own
/// callback, and can be switched on and off.
pub trait AudioSource {
    fn start(&mut self) -> Result<(), SourceError>;
    fn stop(&mut self) -> Result<(), SourceError>;
    /// Whether frames are actually flowing.
    fn is_active(&self) -> bool;
}

/// Cloneable read-only handle for consumer threads.
#[derive(Clone)]
pub struct FingerprintReader {
    publisher: Arc<FingerprintPublisher>,
}

impl FingerprintReader {
    pub fn snapshot(&self, out: &mut [f32]) -> bool {
        self.publisher.snapshot(out)
    }

    pub fn fp_length(&self) -> usize {
        self.publisher.fp_length()
    }
}

/// Pipeline lifecycle: `Idle` until a successful `start`, back to `Idle` on
/// `stop` or when the source fails.
pub struct Fingerprinter<S: AudioSource> {
    source: S,
    publisher: Arc<FingerprintPublisher>,
}

impl<S: AudioSource> Fingerprinter<S> {
    pub fn new(source: S, publisher: Arc<FingerprintPublisher>) -> Self {
        Self { source, publisher }
    }

    /// Starts the source and confirms it became active. Returns whether the
    /// pipeline is running afterwards; a no-op while already running.
    pub fn start(&mut self) -> bool {
        let _ = self.try_start();
        self.publisher.is_running()
    }

    /// Like `start`, but hands back why the source refused.
    pub fn try_start(&mut self) -> Result<(), SourceError> {
        if self.publisher.is_running() {
            return Ok(());
        }
        // open the gate first so the earliest frames are not dropped
        self.publisher.begin();
        let started = self.source.start().and_then(|_| {
            if self.source.is_active() { Ok(()) } else { Err(SourceError::Inactive) }
        });
        if started.is_err() {
            self.publisher.halt();
            let _ = self.source.stop();
        }
        started
    }

    /// Stops the pipeline. Returns whether it is still running afterwards
    /// (always `false`); a no-op while idle.
    pub fn stop(&mut self) -> bool {
        if !self.publisher.is_running() {
            return false;
        }
        self.publisher.halt();
        let _ = self.source.stop();
        self.publisher.is_running()
    }

    pub fn snapshot(&self, out: &mut [f32]) -> bool {
        self.publisher.snapshot(out)
    }

    pub fn is_running(&self) -> bool {
        self.publisher.is_running()
    }

    pub fn reader(&self) -> FingerprintReader {
        FingerprintReader { publisher: self.publisher.clone() }
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

/// Source fed synchronously by the caller, e.g. from a decoded file.
pub struct PushSource<T: PowerTransform = RealFftTransform> {
    producer: Producer<T>,
    active: bool,
}

impl<T: PowerTransform> PushSource<T> {
    pub fn new(producer: Producer<T>) -> Self {
        Self { producer, active: false }
    }

    /// Runs `data` through the pipeline on the calling thread. Dropped while
    /// the source is stopped.
    pub fn push<X>(&mut self, data: &[X], channels: usize) where X: Sample, f32: FromSample<X> {
        if self.active {
            self.producer.process_interleaved(data, channels);
        }
    }
}

impl<T: PowerTransform> AudioSource for PushSource<T> {
    fn start(&mut self) -> Result<(), SourceError> {
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
