//! Per-pixel min / max / rms summaries read from a block sequence.
//!
//! Each block is read at most once, at the coarsest resolution (raw samples,
//! 256:1 or 65536:1 summaries) that still resolves the pixels it feeds. A pixel
//! straddling two blocks gets the tail of the first block and the head of the
//! second combined into one running aggregate.

use crate::error::{CacheError, SourceError};
use crate::source::{BlockSequence, SummaryLevel, SummaryTriple};
use crate::util::audio::MinMaxSumsq;
use tracing::trace;

/// Output columns for one summary read. All four slices share one length.
#[derive(Debug)]
pub struct WaveColumns<'a> {
    pub min: &'a mut [f32],
    pub max: &'a mut [f32],
    pub rms: &'a mut [f32],
    /// Index of the block that fed the pixel, or `-1 - block` when its summary was unavailable.
    pub block_status: &'a mut [i32],
}

impl WaveColumns<'_> {
    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    fn clear(&mut self) {
        self.min.fill(0.0);
        self.max.fill(0.0);
        self.rms.fill(0.0);
        self.block_status.fill(0);
    }

    fn assign(&mut self, pixels: std::ops::Range<usize>, values: &MinMaxSumsq, count: usize, status: i32) {
        let (lo, hi) = clamp_extrema(values.min, values.max);
        let rms = values.rms(count);
        self.min[pixels.clone()].fill(lo);
        self.max[pixels.clone()].fill(hi);
        self.rms[pixels.clone()].fill(rms);
        self.block_status[pixels].fill(status);
    }
}

/// Converts sentinel extrema values to zero for display.
#[inline]
fn clamp_extrema(min: f32, max: f32) -> (f32, f32) {
    (
        if min == f32::MAX { 0.0 } else { min },
        if max == f32::MIN { 0.0 } else { max },
    )
}

fn divisor_for(samples_per_pixel: f64) -> (i64, Option<SummaryLevel>) {
    if samples_per_pixel >= 65_536.0 {
        (65_536, Some(SummaryLevel::Summary64k))
    } else if samples_per_pixel >= 256.0 {
        (256, Some(SummaryLevel::Summary256))
    } else {
        (1, None)
    }
}

fn fold_triples(triples: &[SummaryTriple]) -> MinMaxSumsq {
    triples.iter().fold(MinMaxSumsq::default(), |mut acc, t| {
        acc.min = acc.min.min(t.min);
        acc.max = acc.max.max(t.max);
        acc.sumsq += t.rms * t.rms;
        acc
    })
}

/// Fill `out` so pixel `i` summarises samples `[where_[i], where_[i + 1])` of the sequence.
///
/// `where_` holds `out.len() + 1` non-decreasing boundaries. Unreadable blocks
/// are zero-filled. Fails only when the first boundary lies past the end.
pub fn read_wave_display<S>(
    seq: &S,
    where_: &[i64],
    out: &mut WaveColumns<'_>,
) -> Result<(), CacheError>
where
    S: BlockSequence + ?Sized,
{
    let len = out.len();
    if len == 0 || where_.len() != len + 1 {
        return Err(CacheError::InvalidRequest(
            "boundary array must hold one more entry than the pixel count",
        ));
    }

    let n_blocks = seq.block_count();
    let num_samples = match n_blocks {
        0 => 0,
        n => seq.block(n - 1).end() as i64,
    };
    let s0 = where_[0].max(0);
    if s0 >= num_samples {
        return Err(CacheError::OutOfRange {
            first: where_[0],
            len: num_samples as u64,
        });
    }
    let s1 = num_samples.min((1 + where_[len - 1]).max(where_[len]));

    out.clear();
    if s1 <= s0 {
        return Ok(());
    }

    let mut samples: Vec<f32> = Vec::new();
    let mut triples: Vec<SummaryTriple> = Vec::new();

    let mut pixel = 0usize;
    let mut src = s0;
    let mut next_src = 0i64;
    let mut last_rms_denom = 0usize;
    let mut last_divisor = 0i64;
    let mut where_now = (s1 - 1).min(where_[0]);
    let mut where_next = 0i64;

    let block0 = seq.find_block(s0 as u64);
    for b in block0..n_blocks {
        if b > block0 {
            src = next_src;
        }
        if src >= s1 {
            break;
        }

        let info = seq.block(b);
        let start = info.start as i64;
        next_src = s1.min(start + info.len as i64);

        // Pixels whose first sample lies in this block.
        let next_pixel = if next_src >= s1 {
            len
        } else {
            let mut np = pixel;
            while np < len {
                where_next = (s1 - 1).min(where_[np]);
                if where_next >= next_src {
                    break;
                }
                np += 1;
            }
            np
        };

        // The whole block falls inside one pixel column. Its samples are left
        // out of that column's aggregate.
        if next_pixel == pixel {
            continue;
        }
        if next_pixel == len {
            where_next = s1;
        }

        let samples_per_pixel = (where_next - where_now) as f64 / (next_pixel - pixel) as f64;
        let (divisor, level) = divisor_for(samples_per_pixel);
        let mut status = b as i32;

        let start_pos = ((src - start).max(0) / divisor) as usize;
        let incl_end = (info.len.div_ceil(divisor as usize).saturating_sub(1))
            .min(((next_src - 1 - start).max(0) / divisor) as usize);
        if incl_end < start_pos {
            continue;
        }
        let num = 1 + incl_end - start_pos;

        match level {
            None => {
                samples.resize(num, 0.0);
                if let Err(err) = seq.read_block(b, start_pos, &mut samples[..num]) {
                    trace!("[summary] block {b} read failed, zero-filling: {err}");
                    samples[..num].fill(0.0);
                }
            }
            Some(level) => {
                triples.resize(num, SummaryTriple::default());
                match seq.read_summary(b, level, start_pos, &mut triples[..num]) {
                    Ok(()) => {}
                    Err(SourceError::SummaryUnavailable { .. }) => {
                        status = -1 - b as i32;
                        triples[..num].fill(SummaryTriple::default());
                    }
                    Err(err) => {
                        trace!("[summary] block {b} summary read failed, zero-filling: {err}");
                        triples[..num].fill(SummaryTriple::default());
                    }
                }
            }
        }

        let stats = |from: usize, count: usize| -> MinMaxSumsq {
            let lo = from - start_pos;
            match level {
                None => MinMaxSumsq::from_samples(&samples[lo..lo + count]),
                Some(_) => fold_triples(&triples[lo..lo + count]),
            }
        };

        let mut file_pos = start_pos;

        // The previous pixel may straddle into this block; impute its share.
        if b > block0 && pixel > 0 {
            let mid = ((where_now - start).max(0) / divisor) as usize;
            if mid > file_pos {
                let diff = mid - file_pos;
                let values = stats(file_pos, diff);
                let last = pixel - 1;
                out.min[last] = out.min[last].min(values.min);
                out.max[last] = out.max[last].max(values.max);
                let last_count = (last_rms_denom as i64 * last_divisor) as f32;
                let rms = out.rms[last];
                out.rms[last] = ((rms * rms * last_count + values.sumsq * divisor as f32)
                    / (last_count + (diff as i64 * divisor) as f32))
                    .sqrt();
                file_pos = mid;
            }
        }

        let mut rms_denom = 0usize;
        while file_pos <= incl_end {
            // Pixels sharing this file position (zoomed in) get the same value.
            let mut pixel_x = pixel + 1;
            let mut position_x = 0usize;
            while pixel_x < next_pixel {
                position_x = (((s1 - 1).min(where_[pixel_x]) - start).max(0) / divisor) as usize;
                if position_x > file_pos {
                    break;
                }
                pixel_x += 1;
            }
            if pixel_x >= next_pixel {
                position_x = 1 + incl_end;
            }

            rms_denom = position_x - file_pos;
            let values = stats(file_pos, rms_denom);
            out.assign(pixel..pixel_x, &values, rms_denom, status);

            pixel = pixel_x;
            file_pos = position_x;
        }

        where_now = where_next;
        pixel = next_pixel;
        last_divisor = divisor;
        last_rms_denom = rms_denom;
    }

    Ok(())
}
