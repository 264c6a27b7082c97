//! Per-pixel-column spectral analysis: plain STFT, enhanced autocorrelation and reassignment.

use super::window::{AnalysisWindows, WindowKind};
use crate::error::CacheError;
use crate::source::{SampleCursor, SampleSource};
use crate::util::audio::{DB_FLOOR, apply_window, power_to_db};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Bins quieter than this are not reassigned.
const REASSIGN_POWER_FLOOR: f32 = 1.0e-16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    Standard,
    Reassignment,
    /// Enhanced autocorrelation; values are linear lag strengths, not dB.
    Autocorrelation,
}

/// Everything that fixes the content of one spectral column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    pub algorithm: Algorithm,
    pub window: WindowKind,
    pub window_size: usize,
    pub zero_padding: usize,
    /// dB per decade, 0 at 1 kHz.
    pub frequency_gain: f32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Standard,
            window: WindowKind::Hann,
            window_size: 2048,
            zero_padding: 1,
            frequency_gain: 0.0,
        }
    }
}

impl AnalysisParams {
    /// Autocorrelation ignores zero padding.
    pub fn effective_zero_padding(&self) -> usize {
        match self.algorithm {
            Algorithm::Autocorrelation => 1,
            _ => self.zero_padding.max(1),
        }
    }

    pub fn fft_len(&self) -> usize {
        self.window_size * self.effective_zero_padding()
    }

    pub fn n_bins(&self) -> usize {
        self.fft_len() / 2
    }

    pub fn uses_gain_factors(&self) -> bool {
        self.frequency_gain != 0.0 && self.algorithm != Algorithm::Autocorrelation
    }
}

/// Immutable FFT plan, windows and gain table for one set of [`AnalysisParams`].
///
/// Shared by reference between column workers.
pub struct AnalysisPlan {
    params: AnalysisParams,
    sample_rate: f64,
    fft_len: usize,
    n_bins: usize,
    padding: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    windows: AnalysisWindows,
    gain_factors: Vec<f32>,
}

impl std::fmt::Debug for AnalysisPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPlan")
            .field("params", &self.params)
            .field("fft_len", &self.fft_len)
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

impl AnalysisPlan {
    pub fn new(params: AnalysisParams, sample_rate: f64) -> Result<Self, CacheError> {
        if params.window_size < 4 || params.window_size % 2 != 0 {
            return Err(CacheError::InvalidRequest("window size must be even and at least 4"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CacheError::InvalidRequest("sample rate must be positive"));
        }

        let fft_len = params.fft_len();
        let n_bins = fft_len / 2;
        let padding = params.window_size * (params.effective_zero_padding() - 1) / 2;
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(fft_len);

        let windows = match params.algorithm {
            Algorithm::Autocorrelation => AnalysisWindows {
                window: params.window.coefficients(params.window_size),
                derivative: Vec::new(),
                time: Vec::new(),
            },
            Algorithm::Reassignment => AnalysisWindows::new(params.window, params.window_size, true),
            Algorithm::Standard => AnalysisWindows::new(params.window, params.window_size, false),
        };

        let gain_factors = if params.uses_gain_factors() {
            gain_table(params.frequency_gain, sample_rate / fft_len as f64, n_bins)
        } else {
            Vec::new()
        };

        Ok(Self {
            params,
            sample_rate,
            fft_len,
            n_bins,
            padding,
            fft,
            windows,
            gain_factors,
        })
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn window_size(&self) -> usize {
        self.params.window_size
    }

    /// Per-bin dB offsets; empty when frequency gain is off.
    pub fn gain_factors(&self) -> &[f32] {
        &self.gain_factors
    }

    /// Convert accumulated linear power to dB in place, adding the gain table.
    pub fn finish_db(&self, column: &mut [f32]) {
        if self.gain_factors.is_empty() {
            for v in column.iter_mut() {
                *v = power_to_db(*v, DB_FLOOR);
            }
        } else {
            for (v, g) in column.iter_mut().zip(&self.gain_factors) {
                *v = (power_to_db(*v, DB_FLOOR) + g).max(DB_FLOOR);
            }
        }
    }

    /// Value written for columns that lie outside the signal.
    pub fn silence(&self) -> f32 {
        match self.params.algorithm {
            Algorithm::Autocorrelation => 0.0,
            _ => DB_FLOOR,
        }
    }
}

fn gain_table(gain: f32, bin_unit: f64, n_bins: usize) -> Vec<f32> {
    let mut table: Vec<f32> = (0..n_bins)
        .map(|k| {
            if k == 0 {
                0.0
            } else {
                (f64::from(gain) * (k as f64 * bin_unit / 1000.0).log10()) as f32
            }
        })
        .collect();
    if n_bins > 1 {
        table[0] = table[1];
    }
    table
}

/// Per-thread scratch state for computing columns against one plan.
pub struct ColumnWorker<'a, S: SampleSource + ?Sized> {
    plan: &'a AnalysisPlan,
    cursor: SampleCursor<'a, S>,
    raw: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    derivative_spectrum: Vec<Complex32>,
    time_spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    lags: Vec<f32>,
}

impl<S: SampleSource + ?Sized> std::fmt::Debug for ColumnWorker<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnWorker")
            .field("fft_len", &self.plan.fft_len)
            .finish_non_exhaustive()
    }
}

impl<'a, S: SampleSource + ?Sized> ColumnWorker<'a, S> {
    pub fn new(plan: &'a AnalysisPlan, source: &'a S) -> Self {
        let reassign = plan.params.algorithm == Algorithm::Reassignment;
        let side = |on: bool| {
            if on {
                plan.fft.make_output_vec()
            } else {
                Vec::new()
            }
        };
        Self {
            plan,
            cursor: SampleCursor::new(source),
            raw: vec![0.0; plan.params.window_size],
            input: plan.fft.make_input_vec(),
            spectrum: plan.fft.make_output_vec(),
            derivative_spectrum: side(reassign),
            time_spectrum: side(reassign),
            scratch: plan.fft.make_scratch_vec(),
            lags: Vec::new(),
        }
    }

    /// Read the window centred on `center`. Samples outside the signal read as zero.
    fn load(&mut self, center: i64) {
        let start = center - (self.plan.params.window_size / 2) as i64;
        self.cursor.read_into(start, &mut self.raw);
    }

    fn transform(&mut self, window: Which) -> bool {
        let plan = self.plan;
        let coeffs = match window {
            Which::Window => &plan.windows.window,
            Which::Derivative => &plan.windows.derivative,
            Which::Time => &plan.windows.time,
        };
        let size = plan.params.window_size;
        self.input.fill(0.0);
        let slot = &mut self.input[plan.padding..plan.padding + size];
        slot.copy_from_slice(&self.raw);
        apply_window(slot, coeffs);

        let output = match window {
            Which::Window => &mut self.spectrum,
            Which::Derivative => &mut self.derivative_spectrum,
            Which::Time => &mut self.time_spectrum,
        };
        plan.fft
            .process_with_scratch(&mut self.input, output, &mut self.scratch)
            .is_ok()
    }

    /// Linear power `|X[k]|^2` of the windowed column, `k < n_bins`.
    pub fn power_column(&mut self, center: i64, out: &mut [f32]) {
        self.load(center);
        if !self.transform(Which::Window) {
            out.fill(0.0);
            return;
        }
        for (o, c) in out.iter_mut().zip(&self.spectrum) {
            *o = c.norm_sqr();
        }
    }

    /// dB spectrum, floored at [`DB_FLOOR`], with the gain table applied.
    pub fn standard_column(&mut self, center: i64, out: &mut [f32]) {
        self.power_column(center, out);
        self.plan.finish_db(out);
    }

    /// Enhanced autocorrelation. `out[n_bins - 1 - lag]` holds the pruned strength at `lag`.
    pub fn autocorrelation_column(&mut self, center: i64, out: &mut [f32]) {
        let half = self.plan.n_bins;
        let n = self.plan.fft_len;
        self.load(center);
        if !self.transform(Which::Window) {
            out.fill(0.0);
            return;
        }

        // Cube root of the power spectrum, mirrored to full length.
        for k in 0..n {
            let c = self.spectrum[k.min(n - k)];
            self.input[k] = c.norm_sqr().cbrt();
        }
        if self
            .plan
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            out.fill(0.0);
            return;
        }

        // Peak pruning: clip, subtract the time-doubled signal, clip again.
        let scale = 1.0 / (self.plan.params.window_size / 4) as f32;
        self.lags.clear();
        self.lags.resize(half + 1, 0.0);
        for i in 0..half {
            let clipped = self.spectrum[i].re.max(0.0);
            self.lags[i] = clipped;
            let doubled = if i % 2 == 0 {
                self.lags[i / 2]
            } else {
                0.5 * (self.lags[i / 2] + self.lags[i / 2 + 1])
            };
            out[half - 1 - i] = (clipped - doubled).max(0.0) * scale;
        }
    }

    /// Standard or autocorrelation column, by the plan's algorithm.
    pub fn compute_column(&mut self, center: i64, out: &mut [f32]) {
        match self.plan.params.algorithm {
            Algorithm::Autocorrelation => self.autocorrelation_column(center, out),
            _ => self.standard_column(center, out),
        }
    }

    /// Reassign the column centred on `center`, drawn at pixel `xx`.
    ///
    /// Each bin's linear power goes to `sink(corrected_x, corrected_bin, power)`.
    /// Bins whose corrected frequency leaves `0..n_bins` are dropped here; the
    /// caller decides which pixel columns it keeps.
    pub fn reassign_column<F>(&mut self, center: i64, xx: i64, pixels_per_sample: f64, mut sink: F)
    where
        F: FnMut(i64, usize, f32),
    {
        self.load(center);
        if !(self.transform(Which::Window)
            && self.transform(Which::Derivative)
            && self.transform(Which::Time))
        {
            return;
        }

        let n_bins = self.plan.n_bins as i64;
        let bin_scale = self.plan.fft_len as f64 / TAU;
        for k in 0..self.plan.n_bins {
            let h = self.spectrum[k];
            let power = h.norm_sqr();
            if power < REASSIGN_POWER_FLOOR {
                continue;
            }
            let denom = f64::from(power);

            // Im(X_dh / X_h), in radians per sample.
            let dh = self.derivative_spectrum[k];
            let freq_ratio = (f64::from(dh.im) * f64::from(h.re) - f64::from(dh.re) * f64::from(h.im)) / denom;
            let bin = (k as f64 - freq_ratio * bin_scale + 0.5).floor();
            if !(bin >= 0.0 && (bin as i64) < n_bins) {
                continue;
            }

            // Re(X_th / X_h), in samples.
            let th = self.time_spectrum[k];
            let time_ratio = (f64::from(th.re) * f64::from(h.re) + f64::from(th.im) * f64::from(h.im)) / denom;
            let corrected_x = (0.5 + xx as f64 + time_ratio * pixels_per_sample).floor();
            if !corrected_x.is_finite() {
                continue;
            }
            sink(corrected_x as i64, bin as usize, power);
        }
    }
}

#[derive(Clone, Copy)]
enum Which {
    Window,
    Derivative,
    Time,
}
