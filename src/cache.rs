//! Incremental display caches and the pixel-to-sample mapping they share.
//!
//! Every cache keeps a `where` array of `width + 1` sample boundaries: pixel
//! column `x` covers samples `[where[x], where[x + 1])`. When a new request
//! overlaps the previous one at the same zoom, [`find_correction`] lines the
//! two mappings up so overlapping columns can be copied instead of recomputed.

pub mod pixels;
pub mod spectrum;
pub mod wave;

use crate::error::{CacheError, check_width};

pub use pixels::{PixelValues, SpecPixelParams, SpecPxCache, WavePixelParams, WavePxCache};
pub use spectrum::{SpecCache, Spectrogram};
pub use wave::{WaveCache, WaveDisplay};

/// Geometry of one display request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRequest {
    /// Pixel columns.
    pub width: usize,
    /// Time of the left edge of column 0, in seconds from the clip start.
    pub t0: f64,
    pub pixels_per_second: f64,
}

impl DisplayRequest {
    pub fn new(width: usize, t0: f64, pixels_per_second: f64) -> Self {
        Self {
            width,
            t0,
            pixels_per_second,
        }
    }

    pub(crate) fn validate(&self, sample_rate: f64) -> Result<(), CacheError> {
        check_width(self.width)?;
        if !(self.pixels_per_second.is_finite() && self.pixels_per_second > 0.0) {
            return Err(CacheError::InvalidRequest(
                "pixels per second must be finite and positive",
            ));
        }
        if !self.t0.is_finite() {
            return Err(CacheError::InvalidRequest("time origin must be finite"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CacheError::InvalidRequest("sample rate must be positive"));
        }
        Ok(())
    }

    pub fn samples_per_pixel(&self, sample_rate: f64) -> f64 {
        sample_rate / self.pixels_per_second
    }
}

/// Tolerant pixels-per-second equality: the accumulated timing difference
/// over `width` columns stays under one sample period.
pub(crate) fn pps_matches(old_pps: f64, new_pps: f64, width: usize, sample_rate: f64) -> bool {
    (1.0 / new_pps - 1.0 / old_pps).abs() * width as f64 * sample_rate < 1.0
}

/// Fill `where_` (`len + 1` entries) and return the exact floating origin used.
///
/// The origin carries a half-sample rounding offset so that `floor` rounds to
/// the nearest sample.
pub(crate) fn fill_where(
    where_: &mut [i64],
    correction: f64,
    t0: f64,
    sample_rate: f64,
    samples_per_pixel: f64,
) -> f64 {
    let w0 = 0.5 + correction + t0 * sample_rate;
    for (x, w) in where_.iter_mut().enumerate() {
        *w = (w0 + x as f64 * samples_per_pixel).floor() as i64;
    }
    w0
}

/// Alignment of a new request against an old mapping: new column `i` equals
/// old column `i + old_x0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Overlap {
    pub old_x0: i64,
    /// Sub-pixel shift (in samples) applied to the new origin.
    pub correction: f64,
}

pub(crate) fn find_correction(
    old_origin: f64,
    old_len: usize,
    new_len: usize,
    t0: f64,
    sample_rate: f64,
    samples_per_pixel: f64,
) -> Overlap {
    let none = Overlap {
        old_x0: old_len as i64,
        correction: 0.0,
    };
    let guess = 0.5 + t0 * sample_rate;
    let old_end = old_origin + old_len as f64 * samples_per_pixel;
    let new_end = guess + new_len as f64 * samples_per_pixel;
    if old_len == 0 || samples_per_pixel <= 0.0 || old_end <= guess || new_end <= old_origin {
        return none;
    }

    let old_x0 = (0.5 + (guess - old_origin) / samples_per_pixel).floor();
    let correction = (old_origin + old_x0 * samples_per_pixel - guess)
        .clamp(-samples_per_pixel, samples_per_pixel);
    Overlap {
        old_x0: old_x0 as i64,
        correction,
    }
}

/// New-cache column range `[begin, end)` that can be copied from the old cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct CopyRange {
    pub begin: usize,
    pub end: usize,
}

impl CopyRange {
    pub fn new(overlap: Overlap, old_len: usize, new_len: usize) -> Self {
        let n = new_len as i64;
        let begin = (-overlap.old_x0).clamp(0, n) as usize;
        let end = (old_len as i64 - overlap.old_x0).clamp(0, n) as usize;
        if end > begin {
            Self { begin, end }
        } else {
            Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// The single span `[p0, p1)` still to compute; it may cover copied columns
    /// when the copy sits strictly inside the new range.
    pub fn dirty_span(&self, new_len: usize) -> (usize, usize) {
        if self.is_empty() {
            return (0, new_len);
        }
        let p0 = if self.begin > 0 { 0 } else { self.end };
        let p1 = if self.end >= new_len { self.begin } else { new_len };
        (p0, p1)
    }
}

/// Sample position a spectral column is centred on. Columns left of the view
/// or right of it extrapolate from the nearest boundary.
pub(crate) fn column_center(where_: &[i64], xx: i64, samples_per_pixel: f64) -> i64 {
    let len = where_.len() as i64 - 1;
    if xx < 0 {
        (where_[0] as f64 + xx as f64 * samples_per_pixel).floor() as i64
    } else if xx > len {
        (where_[len as usize] as f64 + (xx - len) as f64 * samples_per_pixel).floor() as i64
    } else {
        where_[xx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_is_monotonic_and_starts_at_zero() {
        let mut where_ = vec![0i64; 501];
        let origin = fill_where(&mut where_, 0.0, 0.0, 44_100.0, 44_100.0 / 200.0);
        assert_eq!(origin, 0.5);
        assert_eq!(where_[0], 0);
        assert_eq!(where_[500], 110_250);
        assert!(where_.windows(2).all(|w| w[0] <= w[1]));

        // Zoomed in, several pixels share a sample; still monotonic.
        let mut fine = vec![0i64; 65];
        fill_where(&mut fine, 0.0, -0.001, 8_000.0, 0.3);
        assert!(fine.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn correction_aligns_pixel_shift() {
        let rate = 44_100.0;
        let spp = rate / 200.0;
        let mut old = vec![0i64; 501];
        let origin = fill_where(&mut old, 0.0, 0.0, rate, spp);

        let overlap = find_correction(origin, 500, 500, 0.1, rate, spp);
        assert_eq!(overlap.old_x0, 20);
        assert_eq!(overlap.correction, 0.0);

        let mut new = vec![0i64; 501];
        fill_where(&mut new, overlap.correction, 0.1, rate, spp);
        for i in 0..=480 {
            assert_eq!(new[i], old[i + 20], "boundary {i}");
        }

        let range = CopyRange::new(overlap, 500, 500);
        assert_eq!(range, CopyRange { begin: 0, end: 480 });
        assert_eq!(range.dirty_span(500), (480, 500));
    }

    #[test]
    fn sub_pixel_shift_snaps_to_old_grid() {
        let rate = 8_000.0;
        let spp = 80.0;
        let mut old = vec![0i64; 101];
        let origin = fill_where(&mut old, 0.0, 0.0, rate, spp);
        // 0.3 pixel to the right of a 5-pixel shift.
        let t0 = 5.3 * spp / rate;
        let overlap = find_correction(origin, 100, 100, t0, rate, spp);
        assert_eq!(overlap.old_x0, 5);
        assert!((overlap.correction + 0.3 * spp).abs() < 1e-9);

        let mut new = vec![0i64; 101];
        fill_where(&mut new, overlap.correction, t0, rate, spp);
        assert_eq!(new[0], old[5]);
    }

    #[test]
    fn disjoint_requests_copy_nothing() {
        let overlap = find_correction(0.5, 100, 100, 10.0, 8_000.0, 80.0);
        assert_eq!(overlap.old_x0, 100);
        let range = CopyRange::new(overlap, 100, 100);
        assert!(range.is_empty());
        assert_eq!(range.dirty_span(100), (0, 100));
    }

    #[test]
    fn scrolling_left_copies_the_tail() {
        let overlap = Overlap {
            old_x0: -30,
            correction: 0.0,
        };
        let range = CopyRange::new(overlap, 100, 100);
        assert_eq!(range, CopyRange { begin: 30, end: 100 });
        assert_eq!(range.dirty_span(100), (0, 30));
    }

    #[test]
    fn pps_tolerance_scales_with_width() {
        assert!(pps_matches(200.0, 200.0, 1000, 44_100.0));
        assert!(pps_matches(200.0, 200.000_000_1, 1000, 44_100.0));
        assert!(!pps_matches(200.0, 201.0, 1000, 44_100.0));
    }

    #[test]
    fn column_center_extrapolates_outside_view() {
        let where_ = [100, 200, 300];
        assert_eq!(column_center(&where_, 1, 100.0), 200);
        assert_eq!(column_center(&where_, -2, 100.0), -100);
        assert_eq!(column_center(&where_, 4, 100.0), 500);
    }

    #[test]
    fn request_validation() {
        assert!(DisplayRequest::new(10, 0.0, 100.0).validate(8_000.0).is_ok());
        assert!(DisplayRequest::new(0, 0.0, 100.0).validate(8_000.0).is_err());
        assert!(DisplayRequest::new(10, 0.0, 0.0).validate(8_000.0).is_err());
        assert!(DisplayRequest::new(10, f64::NAN, 100.0).validate(8_000.0).is_err());
        assert!(DisplayRequest::new(10, 0.0, 100.0).validate(0.0).is_err());
    }
}
