//! A clip owns its samples together with every display cache derived from them.

use crate::cache::{
    DisplayRequest, PixelValues, SpecCache, SpecPxCache, Spectrogram, WaveCache, WaveDisplay,
    WavePxCache,
};
use crate::config::{SpectrogramSettings, WaveformSettings};
use crate::error::CacheError;
use crate::source::{BlockSequence, SampleSource};
use tracing::debug;

#[derive(Debug, Default)]
struct ClipCaches {
    wave: WaveCache,
    spec: SpecCache,
    spec_px: SpecPxCache,
    wave_px: WavePxCache,
}

/// Caches stay valid across calls until the source revision changes or
/// [`Clip::invalidate_caches`] drops them.
#[derive(Debug)]
pub struct Clip<S> {
    source: S,
    caches: ClipCaches,
}

impl<S> Clip<S>
where
    S: SampleSource + BlockSequence,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            caches: ClipCaches::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Edits through this handle must bump the source revision.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn invalidate_caches(&mut self) {
        debug!("[clip] dropping display caches");
        self.caches = ClipCaches::default();
    }

    /// Recomputed data here leaves the waveform pixel grid stale, so it is dropped.
    pub fn wave_display(&mut self, request: &DisplayRequest) -> Result<WaveDisplay<'_>, CacheError> {
        let caches = &mut self.caches;
        let display = caches.wave.get_display(&self.source, request)?;
        if display.updated {
            caches.wave_px.invalidate();
        }
        Ok(display)
    }

    /// Recomputed data here leaves the spectral pixel grid stale, so it is dropped.
    pub fn spectrogram(
        &mut self,
        settings: &SpectrogramSettings,
        request: &DisplayRequest,
    ) -> Result<Spectrogram<'_>, CacheError> {
        let caches = &mut self.caches;
        caches.spec.set_parallel(settings.parallel);
        let spectrogram =
            caches
                .spec
                .get_spectrogram(&self.source, &settings.analysis_params(), request)?;
        if spectrogram.updated {
            caches.spec_px.invalidate();
        }
        Ok(spectrogram)
    }

    pub fn spectrogram_pixels(
        &mut self,
        settings: &SpectrogramSettings,
        request: &DisplayRequest,
        height: usize,
    ) -> Result<PixelValues<'_>, CacheError> {
        let caches = &mut self.caches;
        caches.spec.set_parallel(settings.parallel);
        let spectrogram =
            caches
                .spec
                .get_spectrogram(&self.source, &settings.analysis_params(), request)?;
        let rate = self.source.sample_rate();
        caches
            .spec_px
            .values(&spectrogram, &settings.pixel_params(rate), rate, height)
    }

    pub fn waveform_pixels(
        &mut self,
        settings: &WaveformSettings,
        request: &DisplayRequest,
        height: usize,
    ) -> Result<PixelValues<'_>, CacheError> {
        let caches = &mut self.caches;
        let display = caches.wave.get_display(&self.source, request)?;
        caches
            .wave_px
            .values(&display, &settings.pixel_params(), height)
    }
}
