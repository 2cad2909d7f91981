//! File input for offline mode: the first channel of any symphonia-supported
//! container, pulled packet by packet and brought to the pipeline rate.

use std::{ fs::File, path::Path };

use symphonia::core::{
    audio::{ AudioBuffer, Signal },
    codecs::{ Decoder, DecoderOptions, CODEC_TYPE_NULL },
    errors::Error as MediaError,
    formats::{ FormatOptions, FormatReader },
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{ get_codecs, get_probe };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("no decodable audio track")]
    NoTrack,

    #[error("audio track does not declare a sample rate")]
    UnknownRate,

    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Pull decoder yielding the first channel of one track, one packet at a time.
pub struct FirstChannelDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    planar: Option<AudioBuffer<f32>>,
}

impl FirstChannelDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default()
        )?;
        let format = probed.format;

        // first track a codec is registered for, not necessarily the default
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let info = StreamInfo {
            sample_rate: track.codec_params.sample_rate.ok_or(DecodeError::UnknownRate)?,
            channels: track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(1),
        };
        let track_id = track.id;
        let decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self { format, decoder, track_id, info, planar: None })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Next packet's worth of first-channel samples, `None` at end of stream.
    /// Corrupt packets are skipped.
    pub fn next_block(&mut self) -> Result<Option<&[f32]>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(MediaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(MediaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(e.into());
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(MediaError::DecodeError(_)) => {
                    continue;
                }
                Err(e) => {
                    return Err(e.into());
                }
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let reuse = self.planar
                .as_ref()
                .is_some_and(|b| *b.spec() == spec && b.capacity() >= decoded.capacity());
            if !reuse {
                self.planar = Some(AudioBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(planar) = self.planar.as_mut() else {
                continue;
            };
            decoded.convert(planar);
            break;
        }
        Ok(self.planar.as_ref().map(|planar| planar.chan(0)))
    }
}

/// Linear-interpolation resampler that can be fed in arbitrary blocks.
/// Output sample `k` sits at input position `k · sr_in / sr_out`; positions
/// past the last input sample hold that sample.
pub struct LinearResampler {
    sr_in: u64,
    sr_out: u64,
    next_out: u64,
    /// Input index of the first sample of the next block.
    consumed: u64,
    /// Input sample at `consumed - 1`.
    last: f32,
}

impl LinearResampler {
    pub fn new(sr_in: u32, sr_out: u32) -> Self {
        Self {
            sr_in: sr_in as u64,
            sr_out: sr_out as u64,
            next_out: 0,
            consumed: 0,
            last: 0.0,
        }
    }

    fn is_identity(&self) -> bool {
        self.sr_in == 0 || self.sr_out == 0 || self.sr_in == self.sr_out
    }

    /// Appends every output sample that `block` completes to `out`.
    pub fn process(&mut self, block: &[f32], out: &mut Vec<f32>) {
        if self.is_identity() {
            out.extend_from_slice(block);
            return;
        }
        let (base, last) = (self.consumed, self.last);
        let end = base + (block.len() as u64);
        let at = |i: u64| if i < base { last } else { block[(i - base) as usize] };

        loop {
            // exact position as i0 + rem / sr_out
            let num = self.next_out * self.sr_in;
            let (i0, rem) = (num / self.sr_out, num % self.sr_out);
            if i0 + 1 >= end {
                break;
            }
            let t = ((rem as f64) / (self.sr_out as f64)) as f32;
            let (a, b) = (at(i0), at(i0 + 1));
            out.push(a + (b - a) * t);
            self.next_out += 1;
        }

        if let Some(&l) = block.last() {
            self.last = l;
        }
        self.consumed = end;
    }

    /// Emits the tail that needs no further input, so the output spans the
    /// same duration as the input.
    pub fn finish(&mut self, out: &mut Vec<f32>) {
        if self.is_identity() || self.consumed == 0 {
            return;
        }
        let total = ((self.consumed * self.sr_out) / self.sr_in).max(1);
        while self.next_out < total {
            out.push(self.last);
            self.next_out += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resample_all(x: &[f32], sr_in: u32, sr_out: u32, block: usize) -> Vec<f32> {
        let mut r = LinearResampler::new(sr_in, sr_out);
        let mut y = Vec::new();
        for b in x.chunks(block) {
            r.process(b, &mut y);
        }
        r.finish(&mut y);
        y
    }

    #[test]
    fn same_rate_passes_through() {
        let x = [0.1, -0.2, 0.3];
        assert_eq!(resample_all(&x, 44100, 44100, 2), x.to_vec());
        assert!(resample_all(&[], 8000, 16000, 4).is_empty());
    }

    #[test]
    fn upsampling_interpolates_between_samples() {
        let y = resample_all(&[0.0, 1.0, 2.0, 3.0], 1000, 2000, 4);
        let expect = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0];
        assert_eq!(y.len(), expect.len());
        for (a, b) in y.iter().zip(expect.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn block_boundaries_do_not_change_output() {
        let x: Vec<f32> = (0..5000).map(|i| ((i as f32) * 0.013).sin()).collect();
        let whole = resample_all(&x, 48000, 44100, x.len());
        for block in [1, 7, 480, 1023] {
            let split = resample_all(&x, 48000, 44100, block);
            assert_eq!(split.len(), whole.len(), "block {block}");
            for (a, b) in split.iter().zip(whole.iter()) {
                assert!((a - b).abs() < 1e-6, "block {block}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn downsampling_keeps_duration() {
        let x: Vec<f32> = (0..48000).map(|i| (i as f32) / 48000.0).collect();
        let y = resample_all(&x, 48000, 44100, 4096);
        assert_eq!(y.len(), 44100);
        assert!(y.windows(2).all(|w| w[1] >= w[0]));
        assert!((y[22050] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        assert!(
            matches!(
                FirstChannelDecoder::open("/nonexistent/ambient.wav"),
                Err(DecodeError::Open { .. })
            )
        );
    }
}
