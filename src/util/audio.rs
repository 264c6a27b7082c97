// decibel conversion constants/utils

// Floor value (dB) reported for bins with no power.
pub const DB_FLOOR: f32 = -160.0;

// Natural log to decibel conversion factor: 10 / ln(10) ~= 4.342944819.
const LN_TO_DB: f32 = 4.342_944_8;

// Convert power (magnitude squared) to decibels with a custom floor.
#[inline(always)]
pub fn power_to_db(power: f32, floor: f32) -> f32 {
    if power > 0.0 {
        (power.ln() * LN_TO_DB).max(floor)
    } else {
        floor
    }
}

// Convert a linear amplitude to decibels (20 * log10 |v|); zero maps to the floor.
#[inline(always)]
pub fn amplitude_to_db(amplitude: f32, floor: f32) -> f32 {
    power_to_db(amplitude * amplitude, floor)
}

// Convert dB to linear power: 10^(db/10).
#[inline(always)]
pub fn db_to_power(db: f32) -> f32 {
    const DB_TO_LOG2: f32 = 0.1 * core::f32::consts::LOG2_10;
    (db * DB_TO_LOG2).exp2()
}

#[inline]
pub fn apply_window(buffer: &mut [f32], window: &[f32]) {
    debug_assert_eq!(buffer.len(), window.len());
    for (sample, coeff) in buffer.iter_mut().zip(window.iter()) {
        *sample *= *coeff;
    }
}

/// Running min / max / sum-of-squares over a span of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxSumsq {
    pub min: f32,
    pub max: f32,
    pub sumsq: f32,
}

impl Default for MinMaxSumsq {
    fn default() -> Self {
        Self {
            min: f32::MAX,
            max: -f32::MAX,
            sumsq: 0.0,
        }
    }
}

impl MinMaxSumsq {
    pub fn from_samples(samples: &[f32]) -> Self {
        samples.iter().fold(Self::default(), |mut acc, &v| {
            acc.min = acc.min.min(v);
            acc.max = acc.max.max(v);
            acc.sumsq += v * v;
            acc
        })
    }

    pub fn rms(&self, count: usize) -> f32 {
        if count == 0 {
            0.0
        } else {
            (self.sumsq / count as f32).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_to_db_matches_log10() {
        assert!((power_to_db(1.0, DB_FLOOR)).abs() < 1e-5);
        assert!((power_to_db(0.01, DB_FLOOR) + 20.0).abs() < 1e-4);
        assert_eq!(power_to_db(0.0, DB_FLOOR), DB_FLOOR);
        assert_eq!(power_to_db(1.0e-30, DB_FLOOR), DB_FLOOR);
    }

    #[test]
    fn db_round_trip() {
        for db in [-60.0f32, -6.0, 0.0, 12.0] {
            assert!((power_to_db(db_to_power(db), DB_FLOOR) - db).abs() < 1e-3);
        }
    }

    #[test]
    fn min_max_sumsq_over_span() {
        let stats = MinMaxSumsq::from_samples(&[0.5, -0.25, 0.0, 1.0]);
        assert_eq!(stats.min, -0.25);
        assert_eq!(stats.max, 1.0);
        assert!((stats.sumsq - 1.3125).abs() < 1e-6);
        assert!((stats.rms(4) - (1.3125f32 / 4.0).sqrt()).abs() < 1e-6);
    }
}
