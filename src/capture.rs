//! Microphone input via cpal, driving a `Producer` from the stream callback.

use std::sync::{ atomic::{ AtomicBool, Ordering }, Arc, Mutex };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use cpal::{ FromSample, SizedSample };

use crate::pipeline::{ AudioSource, PipelineEvent, Producer, SourceError };

/// Input device plus the stream configuration it will be opened with.
pub struct InputDevice {
    pub device: cpal::Device,
    pub config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

impl InputDevice {
    /// Default input device at `want_sr` when supported, else its default rate.
    pub fn default_with_rate(want_sr: u32) -> Result<Self, SourceError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(SourceError::NoDevice)?;
        let default_cfg = device.default_input_config()?;
        let sample_format = default_cfg.sample_format();
        let mut config = default_cfg.config();
        if let Some(sr) = maybe_rate_supported(&device, want_sr) {
            config.sample_rate = cpal::SampleRate(sr);
        }
        Ok(Self { device, config, sample_format })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }

    pub fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "<unnamed>".to_string())
    }
}

pub fn maybe_rate_supported(device: &cpal::Device, want: u32) -> Option<u32> {
    if let Ok(mut configs) = device.supported_input_configs() {
        for c in configs.by_ref() {
            let r = c.min_sample_rate().0..=c.max_sample_rate().0;
            if r.contains(&want) {
                return Some(want);
            }
        }
    }
    None
}

/// `AudioSource` over a cpal input stream, built paused at open.
pub struct CpalSource {
    input: InputDevice,
    producer: Arc<Mutex<Producer>>,
    stream: Option<cpal::Stream>,
    playing: bool,
    failed: Arc<AtomicBool>,
}

impl CpalSource {
    pub fn open(input: InputDevice, producer: Producer) -> Result<Self, SourceError> {
        let mut source = Self {
            input,
            producer: Arc::new(Mutex::new(producer)),
            stream: None,
            playing: false,
            failed: Arc::new(AtomicBool::new(false)),
        };
        source.rebuild()?;
        Ok(source)
    }

    /// Whether the stream reported an error since it was last built.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Replaces a dead stream with a fresh paused one for the same producer,
    /// and asks the producer to start over from empty buffers. The caller
    /// restarts the pipeline afterwards.
    pub fn reopen(&mut self) -> Result<(), SourceError> {
        self.rebuild()?;
        let producer = match self.producer.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        producer.publisher().request_reset();
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), SourceError> {
        // the old stream must be gone before the device is opened again
        self.stream = None;
        self.playing = false;
        self.failed.store(false, Ordering::Release);
        let stream = self.build()?;
        // not every backend can pause; such a stream just runs into an idle producer
        let _ = stream.pause();
        self.stream = Some(stream);
        Ok(())
    }

    fn build(&self) -> Result<cpal::Stream, SourceError> {
        match self.input.sample_format {
            cpal::SampleFormat::F32 => self.build_typed::<f32>(),
            cpal::SampleFormat::I16 => self.build_typed::<i16>(),
            cpal::SampleFormat::U16 => self.build_typed::<u16>(),
            // 24-bit hardware commonly arrives left-justified in 32 bits
            cpal::SampleFormat::I32 => self.build_typed::<i32>(),
            other => Err(SourceError::UnsupportedFormat(format!("{:?}", other))),
        }
    }

    fn build_typed<T>(&self) -> Result<cpal::Stream, SourceError>
        where T: SizedSample, f32: FromSample<T>
    {
        let (publisher, events) = match self.producer.lock() {
            Ok(p) => (p.publisher().clone(), p.events().cloned()),
            Err(poisoned) => {
                let p = poisoned.into_inner();
                (p.publisher().clone(), p.events().cloned())
            }
        };

        let failed = self.failed.clone();
        let err_fn = move |e: cpal::StreamError| {
            failed.store(true, Ordering::Release);
            publisher.halt();
            if let Some(tx) = &events {
                let _ = tx.try_send(PipelineEvent::SourceFailed(e.to_string()));
            }
        };

        let producer = self.producer.clone();
        let channels = self.input.channels();
        let stream = self.input.device.build_input_stream(
            &self.input.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // only contended while the source is being rebuilt
                if let Ok(mut p) = producer.try_lock() {
                    p.process_interleaved(data, channels);
                }
            },
            err_fn,
            None
        )?;
        Ok(stream)
    }
}

impl AudioSource for CpalSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if let Some(stream) = &self.stream {
            stream.play()?;
            self.playing = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        if !self.playing {
            return Ok(());
        }
        self.playing = false;
        if let Some(stream) = &self.stream {
            stream.pause()?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.stream.is_some() && self.playing && !self.has_failed()
    }
}
