//! Incremental waveform and spectrogram display caches for audio clips.
//!
//! A [`Clip`] owns a block-organised sample source and the caches derived
//! from it. Display requests map pixel columns onto samples; when the next
//! request overlaps the last one at the same zoom, only the new columns are
//! computed.

pub mod cache;
pub mod clip;
pub mod config;
pub mod dsp;
pub mod error;
pub mod source;
pub mod util;

pub use cache::{DisplayRequest, PixelValues, Spectrogram, WaveDisplay};
pub use clip::Clip;
pub use config::{SpectrogramSettings, ViewSettings, WaveformSettings};
pub use error::{CacheError, SourceError};
pub use source::memory::MemorySequence;
pub use source::{BlockSequence, Revision, SampleSource};
