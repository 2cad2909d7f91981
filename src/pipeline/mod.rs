//! Live audio → ambient fingerprint.
//!
//! Data flow, all on the audio callback thread:
//! frame assembly → windowed power spectrum → temporal accumulation →
//! per-bin history → 5th-percentile digest → publish.
//! Consumers read the published fingerprint from any thread via snapshot.

pub mod accumulator;
mod error;
pub mod frame_buffer;
pub mod history;
pub mod params;
pub mod producer;
pub mod publisher;
pub mod source;
pub mod spectral;

pub use error::{ PipelineError, SourceError };
pub use params::{ HistoryPolicy, Params };
pub use producer::{ PipelineEvent, Producer };
pub use publisher::FingerprintPublisher;
pub use source::{ AudioSource, Fingerprinter, PushSource };
