//! Persisted view settings for spectrogram and waveform display.

use crate::cache::{SpecPixelParams, WavePixelParams};
use crate::dsp::spectrogram::AnalysisParams;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

pub use crate::cache::pixels::WaveScale;
pub use crate::dsp::{Algorithm, ScaleKind, WindowKind};

pub const MIN_WINDOW_SIZE: usize = 8;
pub const MAX_WINDOW_SIZE: usize = 32_768;
pub const MAX_ZERO_PADDING: usize = 8;
pub const MAX_FREQUENCY_GAIN: f32 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramSettings {
    pub window_size: usize,
    pub window: WindowKind,
    pub zero_padding_factor: usize,
    pub algorithm: Algorithm,
    /// dB per decade above 1 kHz.
    pub frequency_gain: f32,
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub scale: ScaleKind,
    pub range_db: f32,
    pub gain_db: f32,
    pub parallel: bool,
}

impl Default for SpectrogramSettings {
    fn default() -> Self {
        Self {
            window_size: 2048,
            window: WindowKind::Hann,
            zero_padding_factor: 1,
            algorithm: Algorithm::Standard,
            frequency_gain: 0.0,
            min_frequency: 100.0,
            max_frequency: 20_000.0,
            scale: ScaleKind::Logarithmic,
            range_db: 80.0,
            gain_db: 20.0,
            parallel: true,
        }
    }
}

/// Round to the nearest power of two in `[lo, hi]`.
fn clamp_pow2(value: usize, lo: usize, hi: usize) -> usize {
    let value = value.clamp(lo, hi);
    let up = value.next_power_of_two();
    let down = up >> 1;
    if up > hi || (down >= lo && value - down < up - value) {
        down
    } else {
        up
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

impl SpectrogramSettings {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.window_size = clamp_pow2(self.window_size, MIN_WINDOW_SIZE, MAX_WINDOW_SIZE);
        self.zero_padding_factor = clamp_pow2(self.zero_padding_factor, 1, MAX_ZERO_PADDING);
        self.frequency_gain = finite_or(self.frequency_gain, 0.0).clamp(0.0, MAX_FREQUENCY_GAIN);
        self.range_db = finite_or(self.range_db, defaults.range_db).clamp(1.0, 300.0);
        self.gain_db = finite_or(self.gain_db, defaults.gain_db).clamp(-100.0, 100.0);
        if !(self.min_frequency.is_finite() && self.min_frequency >= 0.0) {
            self.min_frequency = defaults.min_frequency;
        }
        if !(self.max_frequency.is_finite() && self.max_frequency > self.min_frequency) {
            self.max_frequency = defaults.max_frequency.max(self.min_frequency + 1.0);
        }
    }

    pub fn analysis_params(&self) -> AnalysisParams {
        AnalysisParams {
            algorithm: self.algorithm,
            window: self.window,
            window_size: self.window_size,
            zero_padding: self.zero_padding_factor,
            frequency_gain: self.frequency_gain,
        }
    }

    pub fn fft_len(&self) -> usize {
        self.analysis_params().fft_len()
    }

    pub fn n_bins(&self) -> usize {
        self.fft_len() / 2
    }

    /// Width of one bin in Hz.
    pub fn bin_unit(&self, sample_rate: f64) -> f64 {
        sample_rate / self.fft_len() as f64
    }

    /// Displayed frequency range, clamped to what the scale and rate can show.
    pub fn frequency_bounds(&self, sample_rate: f64) -> (f64, f64) {
        let nyquist = sample_rate / 2.0;
        let bottom = match self.scale {
            ScaleKind::Linear => 0.0,
            ScaleKind::Period => sample_rate / (self.fft_len() / 2) as f64,
            _ => 1.0,
        };
        let bottom = bottom.min(nyquist);
        let min = self.min_frequency.clamp(bottom, nyquist);
        let max = self.max_frequency.clamp(bottom, nyquist);
        (min, max)
    }

    pub fn pixel_params(&self, sample_rate: f64) -> SpecPixelParams {
        let (min_freq, max_freq) = self.frequency_bounds(sample_rate);
        SpecPixelParams {
            scale: self.scale,
            min_freq,
            max_freq,
            gain_db: self.gain_db,
            range_db: self.range_db,
            autocorrelation: self.algorithm == Algorithm::Autocorrelation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    pub scale: WaveScale,
    pub db_range: f32,
    pub zoom_min: f32,
    pub zoom_max: f32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            scale: WaveScale::Linear,
            db_range: 60.0,
            zoom_min: -1.0,
            zoom_max: 1.0,
        }
    }
}

impl WaveformSettings {
    pub fn sanitize(&mut self) {
        self.db_range = finite_or(self.db_range, 60.0).clamp(1.0, 300.0);
        self.zoom_min = finite_or(self.zoom_min, -1.0).clamp(-2.0, 2.0);
        self.zoom_max = finite_or(self.zoom_max, 1.0).clamp(-2.0, 2.0);
        if self.zoom_max <= self.zoom_min {
            (self.zoom_min, self.zoom_max) = (-1.0, 1.0);
        }
    }

    pub fn pixel_params(&self) -> WavePixelParams {
        WavePixelParams {
            scale: self.scale,
            db_range: self.db_range,
            zoom_min: self.zoom_min,
            zoom_max: self.zoom_max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub spectrogram: SpectrogramSettings,
    pub waveform: WaveformSettings,
}

impl ViewSettings {
    pub fn sanitize(&mut self) {
        self.spectrogram.sanitize();
        self.waveform.sanitize();
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(json).context("parsing view settings")?;
        settings.sanitize();
        Ok(settings)
    }

    /// Missing or unreadable files yield defaults.
    pub fn load_or_default(path: &Path) -> Self {
        let mut settings = fs::read_to_string(path)
            .ok()
            .and_then(|s| {
                serde_json::from_str::<Self>(&s)
                    .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        settings.sanitize();
        settings
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = self.clone();
        data.sanitize();
        let json = serde_json::to_string_pretty(&data).context("serialising view settings")?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {parent:?}"))?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &json).with_context(|| format!("writing {temp_path:?}"))?;
        fs::rename(&temp_path, path).with_context(|| format!("replacing {path:?}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_snaps_to_legal_values() {
        let mut s = SpectrogramSettings {
            window_size: 3000,
            zero_padding_factor: 100,
            frequency_gain: f32::NAN,
            range_db: -5.0,
            min_frequency: -10.0,
            max_frequency: f64::INFINITY,
            ..SpectrogramSettings::default()
        };
        s.sanitize();
        assert_eq!(s.window_size, 2048);
        assert_eq!(s.zero_padding_factor, 8);
        assert_eq!(s.frequency_gain, 0.0);
        assert_eq!(s.range_db, 1.0);
        assert_eq!(s.min_frequency, 100.0);
        assert!(s.max_frequency.is_finite() && s.max_frequency > s.min_frequency);

        let mut tiny = SpectrogramSettings {
            window_size: 1,
            ..SpectrogramSettings::default()
        };
        tiny.sanitize();
        assert_eq!(tiny.window_size, MIN_WINDOW_SIZE);
    }

    #[test]
    fn frequency_bounds_respect_scale_bottom() {
        let mut s = SpectrogramSettings {
            min_frequency: 0.0,
            max_frequency: 30_000.0,
            ..SpectrogramSettings::default()
        };
        assert_eq!(s.frequency_bounds(44_100.0), (1.0, 22_050.0));
        s.scale = ScaleKind::Linear;
        assert_eq!(s.frequency_bounds(44_100.0), (0.0, 22_050.0));
        s.scale = ScaleKind::Period;
        let (lo, _) = s.frequency_bounds(44_100.0);
        assert!((lo - 44_100.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings =
            ViewSettings::from_json(r#"{ "spectrogram": { "window_size": 512, "algorithm": "Reassignment" } }"#)
                .unwrap();
        assert_eq!(settings.spectrogram.window_size, 512);
        assert_eq!(settings.spectrogram.algorithm, Algorithm::Reassignment);
        assert_eq!(settings.spectrogram.scale, ScaleKind::Logarithmic);
        assert_eq!(settings.waveform, WaveformSettings::default());
        assert!(ViewSettings::from_json("not json").is_err());
    }

    #[test]
    fn analysis_params_follow_settings() {
        let s = SpectrogramSettings {
            window_size: 1024,
            zero_padding_factor: 2,
            ..SpectrogramSettings::default()
        };
        assert_eq!(s.fft_len(), 2048);
        assert_eq!(s.n_bins(), 1024);
        assert_eq!(s.analysis_params().window_size, 1024);
        assert!(!s.pixel_params(44_100.0).autocorrelation);
    }
}
