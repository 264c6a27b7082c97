//! Display intensities in `[0, 1]` derived from the wave and spectral caches.
//!
//! Both caches rebuild wholesale: when their key changes, or when the data
//! cache they read from reports that it recomputed anything.

use super::{Spectrogram, WaveDisplay};
use crate::dsp::scale::{NumberScale, ScaleKind};
use crate::error::{CacheError, check_elements};
use crate::util::audio::amplitude_to_db;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Intensity of the min..max envelope.
pub const ENVELOPE_INTENSITY: f32 = 0.5;
/// Intensity inside the +/- rms band.
pub const RMS_INTENSITY: f32 = 1.0;

/// A `width x height` intensity grid. Row 0 is the top of the display.
#[derive(Debug, Clone, Copy)]
pub struct PixelValues<'a> {
    /// Column `x` occupies `values[x * height..(x + 1) * height]`.
    pub values: &'a [f32],
    pub width: usize,
    pub height: usize,
    /// `false` when the grid was returned unchanged from the previous call.
    pub recomputed: bool,
}

impl PixelValues<'_> {
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.values[x * self.height + y]
    }

    pub fn column(&self, x: usize) -> &[f32] {
        &self.values[x * self.height..(x + 1) * self.height]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecPixelParams {
    pub scale: ScaleKind,
    pub min_freq: f64,
    pub max_freq: f64,
    /// Added to every bin before mapping, in dB.
    pub gain_db: f32,
    /// Span of dB mapped onto `[0, 1]`.
    pub range_db: f32,
    /// Values are autocorrelation lag strengths, indexed in reverse.
    pub autocorrelation: bool,
}

impl Default for SpecPixelParams {
    fn default() -> Self {
        Self {
            scale: ScaleKind::Logarithmic,
            min_freq: 100.0,
            max_freq: 20_000.0,
            gain_db: 20.0,
            range_db: 80.0,
            autocorrelation: false,
        }
    }
}

impl SpecPixelParams {
    pub fn number_scale(&self) -> NumberScale {
        NumberScale::new(self.scale, self.min_freq, self.max_freq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SpecKey {
    params: SpecPixelParams,
    width: usize,
    height: usize,
    n_bins: usize,
    sample_rate: f64,
}

/// Spectral intensity grid plus the per-row bin table it was built from.
#[derive(Debug, Default)]
pub struct SpecPxCache {
    key: Option<SpecKey>,
    /// `height + 1` fractional bin boundaries, lowest frequency first.
    bins: Vec<f32>,
    values: Vec<f32>,
}

impl SpecPxCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    pub fn values<'a>(
        &'a mut self,
        spectrogram: &Spectrogram<'_>,
        params: &SpecPixelParams,
        sample_rate: f64,
        height: usize,
    ) -> Result<PixelValues<'a>, CacheError> {
        let width = spectrogram.width();
        if height == 0 {
            return Err(CacheError::InvalidRequest("zero pixel height"));
        }
        let elements = check_elements(width, height)?;
        let key = SpecKey {
            params: *params,
            width,
            height,
            n_bins: spectrogram.n_bins,
            sample_rate,
        };

        let recompute = spectrogram.updated || self.key != Some(key);
        if recompute {
            if self.key.is_some_and(|k| k.params != key.params || k.height != height) {
                debug!("[spec-pixels] display parameters changed, rebuilding {width}x{height}");
            }
            self.rebuild(spectrogram, params, sample_rate, height, elements);
            self.key = Some(key);
        }

        Ok(PixelValues {
            values: &self.values,
            width,
            height,
            recomputed: recompute,
        })
    }

    fn rebuild(
        &mut self,
        spectrogram: &Spectrogram<'_>,
        params: &SpecPixelParams,
        sample_rate: f64,
        height: usize,
        elements: usize,
    ) {
        let n_bins = spectrogram.n_bins;
        self.values.clear();
        self.values.resize(elements, 0.0);
        if n_bins == 0 {
            self.bins.clear();
            return;
        }

        let bin_unit = sample_rate / (2 * n_bins) as f64;
        let top = (n_bins - 1) as f64;
        self.bins.clear();
        self.bins.extend(
            params
                .number_scale()
                .boundaries(height)
                .map(|freq| (freq / bin_unit).clamp(0.0, top) as f32),
        );

        for (x, out) in self.values.chunks_mut(height).enumerate() {
            let column = spectrogram.column(x);
            for (y, v) in out.iter_mut().enumerate() {
                let row = height - 1 - y;
                *v = find_value(column, self.bins[row], self.bins[row + 1], params);
            }
        }
    }
}

/// Largest value among the bins one row spans, mapped into `[0, 1]`.
///
/// Rows never interpolate between bins, so narrow-band content stays visible
/// when many bins share one row.
fn find_value(spectrum: &[f32], bin0: f32, bin1: f32, params: &SpecPixelParams) -> f32 {
    let n_bins = spectrum.len();
    let last = (n_bins - 1) as f32;
    let (mut index, limit) = if params.autocorrelation {
        let lag_index = |bin: f32| (last - (2 * n_bins) as f32 / bin.max(1.0)).clamp(0.0, last) as usize;
        (lag_index(bin0), lag_index(bin1))
    } else {
        (
            ((0.5 + bin0).floor() as usize).min(n_bins - 1),
            ((0.5 + bin1).floor() as usize).min(n_bins),
        )
    };

    let mut value = spectrum[index];
    index += 1;
    while index < limit {
        value = value.max(spectrum[index]);
        index += 1;
    }
    if !params.autocorrelation {
        let range = params.range_db.max(f32::EPSILON);
        value = (value + range + params.gain_db) / range;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WaveScale {
    #[default]
    Linear,
    Db,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavePixelParams {
    pub scale: WaveScale,
    /// Depth of the dB scale; amplitudes below `-db_range` dB sit on the axis.
    pub db_range: f32,
    /// Vertical zoom: the values shown at the bottom and top rows.
    pub zoom_min: f32,
    pub zoom_max: f32,
}

impl Default for WavePixelParams {
    fn default() -> Self {
        Self {
            scale: WaveScale::Linear,
            db_range: 60.0,
            zoom_min: -1.0,
            zoom_max: 1.0,
        }
    }
}

impl WavePixelParams {
    /// Row of `value`, clipped to the display. Row 0 is the top.
    pub fn row_of(&self, value: f32, height: usize) -> usize {
        if height == 0 {
            return 0;
        }
        let mut value = value;
        if self.scale == WaveScale::Db && value != 0.0 {
            let range = self.db_range.max(f32::EPSILON);
            let db = amplitude_to_db(value.abs(), -range);
            value = ((db + range) / range).max(0.0).copysign(value);
        }
        let span = self.zoom_max - self.zoom_min;
        if span <= 0.0 {
            return 0;
        }
        let value = value.clamp(self.zoom_min, self.zoom_max);
        let position = (self.zoom_max - value) / span;
        (position * (height - 1) as f32 + 0.5) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WaveKey {
    params: WavePixelParams,
    width: usize,
    height: usize,
}

/// Rasterised waveform: envelope and rms band per column.
#[derive(Debug, Default)]
pub struct WavePxCache {
    key: Option<WaveKey>,
    values: Vec<f32>,
}

impl WavePxCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    pub fn values<'a>(
        &'a mut self,
        display: &WaveDisplay<'_>,
        params: &WavePixelParams,
        height: usize,
    ) -> Result<PixelValues<'a>, CacheError> {
        let width = display.width();
        if height == 0 {
            return Err(CacheError::InvalidRequest("zero pixel height"));
        }
        let elements = check_elements(width, height)?;
        let key = WaveKey {
            params: *params,
            width,
            height,
        };

        let recompute = display.updated || self.key != Some(key);
        if recompute {
            self.values.clear();
            self.values.resize(elements, 0.0);
            for (x, out) in self.values.chunks_mut(height).enumerate() {
                let (min, max) = (display.min[x], display.max[x]);
                let rms = display.rms[x];
                let top = params.row_of(max, height);
                let bottom = params.row_of(min, height);
                out[top..=bottom.max(top)].fill(ENVELOPE_INTENSITY);

                let rms_top = params.row_of(rms.min(max), height);
                let rms_bottom = params.row_of((-rms).max(min), height);
                if rms_top <= rms_bottom {
                    out[rms_top..=rms_bottom].fill(RMS_INTENSITY);
                }
            }
            self.key = Some(key);
        }

        Ok(PixelValues {
            values: &self.values,
            width,
            height,
            recomputed: recompute,
        })
    }
}
