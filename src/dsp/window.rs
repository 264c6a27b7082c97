//! Analysis windows and the derivative / time-weighted companions used by reassignment.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WindowKind {
    Rectangular,
    Bartlett,
    Hamming,
    #[default]
    Hann,
    Blackman,
    BlackmanHarris,
    Welch,
    Gaussian25,
    Gaussian35,
    Gaussian45,
}

impl WindowKind {
    pub const ALL: [WindowKind; 10] = [
        WindowKind::Rectangular,
        WindowKind::Bartlett,
        WindowKind::Hamming,
        WindowKind::Hann,
        WindowKind::Blackman,
        WindowKind::BlackmanHarris,
        WindowKind::Welch,
        WindowKind::Gaussian25,
        WindowKind::Gaussian35,
        WindowKind::Gaussian45,
    ];

    pub fn label(self) -> &'static str {
        match self {
            WindowKind::Rectangular => "Rectangular",
            WindowKind::Bartlett => "Bartlett",
            WindowKind::Hamming => "Hamming",
            WindowKind::Hann => "Hann",
            WindowKind::Blackman => "Blackman",
            WindowKind::BlackmanHarris => "Blackman-Harris",
            WindowKind::Welch => "Welch",
            WindowKind::Gaussian25 => "Gaussian (a=2.5)",
            WindowKind::Gaussian35 => "Gaussian (a=3.5)",
            WindowKind::Gaussian45 => "Gaussian (a=4.5)",
        }
    }

    // Alternating-sign cosine-sum terms: w(n) = a0 - a1 cos(p) + a2 cos(2p) - ...
    fn cosine_terms(self) -> Option<&'static [f64]> {
        match self {
            WindowKind::Rectangular => Some(&[1.0]),
            WindowKind::Hann => Some(&[0.5, 0.5]),
            WindowKind::Hamming => Some(&[0.54, 0.46]),
            WindowKind::Blackman => Some(&[0.42, 0.5, 0.08]),
            WindowKind::BlackmanHarris => Some(&[0.35875, 0.48829, 0.14128, 0.01168]),
            _ => None,
        }
    }

    fn value_at(self, n: f64, len: f64) -> f64 {
        if let Some(terms) = self.cosine_terms() {
            let phase = n * TAU / len;
            return terms
                .iter()
                .enumerate()
                .map(|(k, a)| {
                    let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                    sign * a * (k as f64 * phase).cos()
                })
                .sum();
        }

        // Position in [-1, 1] across the window.
        let x = 2.0 * n / len - 1.0;
        match self {
            WindowKind::Bartlett => 1.0 - x.abs(),
            WindowKind::Welch => 1.0 - x * x,
            WindowKind::Gaussian25 => gaussian(x, 2.5),
            WindowKind::Gaussian35 => gaussian(x, 3.5),
            WindowKind::Gaussian45 => gaussian(x, 4.5),
            _ => 1.0,
        }
    }

    pub fn coefficients(self, len: usize) -> Vec<f32> {
        let n_len = len as f64;
        (0..len)
            .map(|n| self.value_at(n as f64, n_len) as f32)
            .collect()
    }

    /// Derivative of the window with respect to the sample index.
    pub fn derivative(self, len: usize) -> Vec<f32> {
        let Some(terms) = self.cosine_terms() else {
            return numeric_derivative(&self.coefficients(len));
        };
        let n_len = len as f64;
        let omega = TAU / n_len;
        (0..len)
            .map(|n| {
                let phase = n as f64 * omega;
                terms
                    .iter()
                    .enumerate()
                    .skip(1)
                    .map(|(k, a)| {
                        let sign = if k % 2 == 0 { -1.0 } else { 1.0 };
                        sign * a * k as f64 * omega * (k as f64 * phase).sin()
                    })
                    .sum::<f64>() as f32
            })
            .collect()
    }
}

fn gaussian(x: f64, a: f64) -> f64 {
    (-0.5 * (a * x) * (a * x)).exp()
}

fn numeric_derivative(window: &[f32]) -> Vec<f32> {
    let len = window.len();
    if len < 2 {
        return vec![0.0; len];
    }
    (0..len)
        .map(|i| {
            let prev = window[i.saturating_sub(1)];
            let next = window[(i + 1).min(len - 1)];
            0.5 * (next - prev)
        })
        .collect()
}

/// The window triple for one analysis size, all scaled by `2 / sum(w)`.
#[derive(Debug, Clone)]
pub struct AnalysisWindows {
    pub window: Vec<f32>,
    /// Empty unless built for reassignment.
    pub derivative: Vec<f32>,
    /// `(n - size/2) * w[n]`; empty unless built for reassignment.
    pub time: Vec<f32>,
}

impl AnalysisWindows {
    pub fn new(kind: WindowKind, size: usize, reassignment: bool) -> Self {
        let mut window = kind.coefficients(size);
        let sum: f64 = window.iter().map(|&w| f64::from(w)).sum();
        let scale = if sum > 0.0 { (2.0 / sum) as f32 } else { 1.0 };

        let (derivative, time) = if reassignment {
            let half = (size / 2) as f32;
            let derivative = kind
                .derivative(size)
                .into_iter()
                .map(|d| d * scale)
                .collect();
            let time = window
                .iter()
                .enumerate()
                .map(|(n, &w)| (n as f32 - half) * w * scale)
                .collect();
            (derivative, time)
        } else {
            (Vec::new(), Vec::new())
        };

        for w in &mut window {
            *w *= scale;
        }

        Self {
            window,
            derivative,
            time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_symmetric_about_center() {
        let len = 64;
        for kind in WindowKind::ALL {
            let w = kind.coefficients(len);
            for i in 1..len / 2 {
                assert!(
                    (w[i] - w[len - i]).abs() < 1e-5,
                    "{} not symmetric at {i}",
                    kind.label()
                );
            }
            assert!(w[len / 2] >= w[1], "{} should peak mid-window", kind.label());
        }
    }

    #[test]
    fn analytic_derivative_matches_central_difference() {
        let len = 256;
        for kind in [WindowKind::Hann, WindowKind::Blackman, WindowKind::BlackmanHarris] {
            let analytic = kind.derivative(len);
            let numeric = numeric_derivative(&kind.coefficients(len));
            for i in 1..len - 1 {
                assert!(
                    (analytic[i] - numeric[i]).abs() < 1e-3,
                    "{} derivative mismatch at {i}: {} vs {}",
                    kind.label(),
                    analytic[i],
                    numeric[i]
                );
            }
        }
    }

    #[test]
    fn scaled_window_sums_to_two() {
        for kind in WindowKind::ALL {
            let windows = AnalysisWindows::new(kind, 512, false);
            let sum: f32 = windows.window.iter().sum();
            assert!((sum - 2.0).abs() < 1e-3, "{} sums to {sum}", kind.label());
            assert!(windows.derivative.is_empty());
        }
    }

    #[test]
    fn time_window_is_odd_about_center() {
        let windows = AnalysisWindows::new(WindowKind::Hann, 128, true);
        assert_eq!(windows.time.len(), 128);
        assert_eq!(windows.time[64], 0.0);
        assert!((windows.time[60] + windows.time[68]).abs() < 1e-6);
    }
}
