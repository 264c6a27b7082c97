//! Frequency scales mapping between display position and value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScaleKind {
    #[default]
    Linear,
    Logarithmic,
    Mel,
    Bark,
    Erb,
    /// Pitch period (reciprocal frequency).
    Period,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 6] = [
        ScaleKind::Linear,
        ScaleKind::Logarithmic,
        ScaleKind::Mel,
        ScaleKind::Bark,
        ScaleKind::Erb,
        ScaleKind::Period,
    ];

    fn forward(self, value: f64) -> f64 {
        match self {
            ScaleKind::Linear => value,
            ScaleKind::Logarithmic => value.max(f64::MIN_POSITIVE).ln(),
            ScaleKind::Mel => 1127.0 * (1.0 + value / 700.0).ln(),
            ScaleKind::Bark => {
                // Traunmueller, with the low and high end corrections.
                let z = 26.81 * value / (1960.0 + value) - 0.53;
                if z < 2.0 {
                    z + 0.15 * (2.0 - z)
                } else if z > 20.1 {
                    z + 0.22 * (z - 20.1)
                } else {
                    z
                }
            }
            ScaleKind::Erb => 11.17268 * (1.0 + 46.06538 * value / (value + 14678.49)).ln(),
            ScaleKind::Period => -1.0 / value.max(f64::EPSILON),
        }
    }

    fn inverse(self, unit: f64) -> f64 {
        match self {
            ScaleKind::Linear => unit,
            ScaleKind::Logarithmic => unit.exp(),
            ScaleKind::Mel => 700.0 * ((unit / 1127.0).exp() - 1.0),
            ScaleKind::Bark => {
                let z = if unit < 2.0 {
                    (unit - 0.3) / 0.85
                } else if unit > 20.1 {
                    (unit + 4.422) / 1.22
                } else {
                    unit
                };
                1960.0 * (z + 0.53) / (26.28 - z)
            }
            ScaleKind::Erb => {
                let e = (unit / 11.17268).exp();
                14678.49 * (e - 1.0) / (47.06538 - e)
            }
            ScaleKind::Period => -1.0 / unit,
        }
    }
}

/// A scale plus its two endpoint values, pre-transformed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberScale {
    kind: ScaleKind,
    value0: f64,
    value1: f64,
}

impl NumberScale {
    pub fn new(kind: ScaleKind, min: f64, max: f64) -> Self {
        Self {
            kind,
            value0: kind.forward(min),
            value1: kind.forward(max),
        }
    }

    pub fn kind(&self) -> ScaleKind {
        self.kind
    }

    /// Position in `[0, 1]` for values inside the endpoints; extrapolates outside them.
    pub fn value_to_position(&self, value: f64) -> f64 {
        let span = self.value1 - self.value0;
        if span == 0.0 {
            return 0.0;
        }
        (self.kind.forward(value) - self.value0) / span
    }

    pub fn position_to_value(&self, position: f64) -> f64 {
        self.kind
            .inverse(self.value0 + position * (self.value1 - self.value0))
    }

    /// `count` values at positions `0, 1/count, ..., (count-1)/count`.
    pub fn iter(&self, count: usize) -> ScaleIter {
        ScaleIter::new(*self, count, count)
    }

    /// `count + 1` values at positions `0, 1/count, ..., 1`.
    pub fn boundaries(&self, count: usize) -> ScaleIter {
        ScaleIter::new(*self, count, count + 1)
    }
}

/// Lazy walk over a [`NumberScale`] in equal position steps.
///
/// Additive scales step in the transformed domain; the logarithmic scale steps
/// multiplicatively on the value itself.
#[derive(Debug, Clone)]
pub struct ScaleIter {
    kind: ScaleKind,
    current: f64,
    step: f64,
    remaining: usize,
}

impl ScaleIter {
    fn new(scale: NumberScale, steps: usize, count: usize) -> Self {
        let delta = if steps == 0 {
            0.0
        } else {
            (scale.value1 - scale.value0) / steps as f64
        };
        let (current, step) = match scale.kind {
            ScaleKind::Logarithmic => (scale.value0.exp(), delta.exp()),
            _ => (scale.value0, delta),
        };
        Self {
            kind: scale.kind,
            current,
            step,
            remaining: count,
        }
    }
}

impl Iterator for ScaleIter {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(match self.kind {
            ScaleKind::Logarithmic => {
                let value = self.current;
                self.current *= self.step;
                value
            }
            kind => {
                let value = kind.inverse(self.current);
                self.current += self.step;
                value
            }
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ScaleIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_across_audible_range() {
        for kind in ScaleKind::ALL {
            let scale = NumberScale::new(kind, 20.0, 22_050.0);
            for freq in [1.0, 20.0, 100.0, 440.0, 1_000.0, 5_000.0, 15_000.0, 22_050.0] {
                let pos = scale.value_to_position(freq);
                let back = scale.position_to_value(pos);
                assert!(
                    (back - freq).abs() <= freq * 1e-9,
                    "{kind:?}: {freq} -> {pos} -> {back}"
                );
            }
        }
    }

    #[test]
    fn endpoints_map_to_unit_interval() {
        for kind in ScaleKind::ALL {
            let scale = NumberScale::new(kind, 100.0, 8_000.0);
            assert!(scale.value_to_position(100.0).abs() < 1e-12, "{kind:?}");
            assert!((scale.value_to_position(8_000.0) - 1.0).abs() < 1e-12, "{kind:?}");
            assert!(scale.value_to_position(1_000.0) > 0.0);
            assert!(scale.value_to_position(1_000.0) < 1.0);
        }
    }

    #[test]
    fn bark_corrections_are_continuous() {
        // 2 bark sits near 200 Hz, 20.1 bark near 6.4 kHz.
        let low = ScaleKind::Bark.inverse(2.0);
        let high = ScaleKind::Bark.inverse(20.1);
        for f in [low, high] {
            let below = ScaleKind::Bark.forward(f * 0.999_999);
            let above = ScaleKind::Bark.forward(f * 1.000_001);
            assert!((above - below).abs() < 1e-4, "discontinuity at {f}");
        }
    }

    #[test]
    fn iterator_matches_positions() {
        for kind in ScaleKind::ALL {
            let scale = NumberScale::new(kind, 50.0, 12_000.0);
            let values: Vec<f64> = scale.boundaries(16).collect();
            assert_eq!(values.len(), 17);
            for (i, v) in values.iter().enumerate() {
                let expected = scale.position_to_value(i as f64 / 16.0);
                assert!(
                    (v - expected).abs() <= expected.abs() * 1e-9,
                    "{kind:?} step {i}: {v} vs {expected}"
                );
            }
            assert_eq!(scale.iter(16).count(), 16);
            let restarted = scale.iter(4);
            assert_eq!(restarted.clone().collect::<Vec<_>>(), restarted.collect::<Vec<_>>());
        }
    }

    #[test]
    fn period_scale_is_monotonic() {
        let scale = NumberScale::new(ScaleKind::Period, 50.0, 5_000.0);
        let a = scale.value_to_position(100.0);
        let b = scale.value_to_position(1_000.0);
        assert!(a < b);
    }
}
