//! Waveform min / max / rms cache, one entry per pixel column.

use super::{CopyRange, DisplayRequest, fill_where, find_correction, pps_matches};
use crate::dsp::waveform::{WaveColumns, read_wave_display};
use crate::error::CacheError;
use crate::source::{BlockSequence, Revision, SampleSource};
use crate::util::audio::MinMaxSumsq;
use tracing::debug;

/// Block status reported for columns summarised from the append buffer.
pub const APPEND_BUFFER_STATUS: i32 = 1;

#[derive(Debug, Clone)]
struct WaveCacheData {
    revision: Revision,
    sample_rate: f64,
    pixels_per_second: f64,
    t0: f64,
    origin: f64,
    where_: Vec<i64>,
    min: Vec<f32>,
    max: Vec<f32>,
    rms: Vec<f32>,
    block_status: Vec<i32>,
}

impl WaveCacheData {
    fn new(request: &DisplayRequest, sample_rate: f64, revision: Revision) -> Self {
        let len = request.width;
        Self {
            revision,
            sample_rate,
            pixels_per_second: request.pixels_per_second,
            t0: request.t0,
            origin: 0.0,
            where_: vec![0; len + 1],
            min: vec![0.0; len],
            max: vec![0.0; len],
            rms: vec![0.0; len],
            block_status: vec![0; len],
        }
    }

    fn len(&self) -> usize {
        self.min.len()
    }

    fn copy_from(&mut self, old: &WaveCacheData, range: CopyRange, old_x0: i64) {
        let src = (range.begin as i64 + old_x0) as usize;
        let src = src..src + range.len();
        let dst = range.begin..range.end;
        self.min[dst.clone()].copy_from_slice(&old.min[src.clone()]);
        self.max[dst.clone()].copy_from_slice(&old.max[src.clone()]);
        self.rms[dst.clone()].copy_from_slice(&old.rms[src.clone()]);
        self.block_status[dst].copy_from_slice(&old.block_status[src]);
    }

    fn columns(&mut self, span: std::ops::Range<usize>) -> WaveColumns<'_> {
        WaveColumns {
            min: &mut self.min[span.clone()],
            max: &mut self.max[span.clone()],
            rms: &mut self.rms[span.clone()],
            block_status: &mut self.block_status[span],
        }
    }

    fn view(&self, width: usize, updated: bool) -> WaveDisplay<'_> {
        WaveDisplay {
            min: &self.min[..width],
            max: &self.max[..width],
            rms: &self.rms[..width],
            block_status: &self.block_status[..width],
            where_: &self.where_[..=width],
            updated,
        }
    }
}

/// Read-only view of a waveform display, valid until the next call on the cache.
#[derive(Debug, Clone, Copy)]
pub struct WaveDisplay<'a> {
    pub min: &'a [f32],
    pub max: &'a [f32],
    pub rms: &'a [f32],
    pub block_status: &'a [i32],
    /// `width + 1` sample boundaries.
    pub where_: &'a [i64],
    /// `false` when the request was served entirely from the cache.
    pub updated: bool,
}

impl WaveDisplay<'_> {
    pub fn width(&self) -> usize {
        self.min.len()
    }
}

#[derive(Debug, Default)]
pub struct WaveCache {
    data: Option<WaveCacheData>,
}

impl WaveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.data = None;
    }

    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    /// Same revision, same rate and tolerantly equal pixels per second.
    pub fn matches(&self, revision: Revision, pixels_per_second: f64, sample_rate: f64) -> bool {
        self.data.as_ref().is_some_and(|d| {
            d.len() > 0
                && d.revision == revision
                && d.sample_rate == sample_rate
                && pps_matches(d.pixels_per_second, pixels_per_second, d.len(), sample_rate)
        })
    }

    pub fn get_display<S>(
        &mut self,
        source: &S,
        request: &DisplayRequest,
    ) -> Result<WaveDisplay<'_>, CacheError>
    where
        S: SampleSource + BlockSequence + ?Sized,
    {
        let rate = source.sample_rate();
        request.validate(rate)?;
        let width = request.width;
        let revision = source.revision();

        let matched = self.matches(revision, request.pixels_per_second, rate);
        if matched
            && let Some(data) = &self.data
            && data.t0 == request.t0
            && data.len() >= width
        {
            return Ok(self.view(width, false));
        }

        let spp = request.samples_per_pixel(rate);
        let old = self.data.take();
        let mut fresh = WaveCacheData::new(request, rate, revision);

        let mut overlap = None;
        if matched && let Some(old) = &old {
            let found = find_correction(old.origin, old.len(), width, request.t0, rate, spp);
            // The old last column was rounded out to a whole summary triple.
            let range = CopyRange::new(found, old.len().saturating_sub(1), width);
            if !range.is_empty() {
                overlap = Some((found, range));
            }
        }
        let correction = overlap.map_or(0.0, |(found, _)| found.correction);
        fresh.origin = fill_where(&mut fresh.where_, correction, request.t0, rate, spp);

        let total = source.len() as i64;
        let first = fresh.where_[0];
        if first.max(0) >= total {
            debug!("[wave-cache] request starts at sample {first}, clip holds {total}");
            return Err(CacheError::OutOfRange {
                first,
                len: total.max(0) as u64,
            });
        }

        let range = match (overlap, &old) {
            (Some((found, range)), Some(old)) => {
                fresh.copy_from(old, range, found.old_x0);
                debug!(
                    "[wave-cache] reusing columns {}..{} of {width}",
                    range.begin, range.end
                );
                range
            }
            _ => {
                debug!("[wave-cache] full rebuild of {width} columns");
                CopyRange::default()
            }
        };
        drop(old);

        let (p0, p1) = range.dirty_span(width);
        fill_columns(source, &mut fresh, p0, p1)?;

        self.data = Some(fresh);
        Ok(self.view(width, true))
    }

    fn view(&self, width: usize, updated: bool) -> WaveDisplay<'_> {
        match &self.data {
            Some(data) => data.view(width, updated),
            None => WaveDisplay {
                min: &[],
                max: &[],
                rms: &[],
                block_status: &[],
                where_: &[],
                updated,
            },
        }
    }
}

/// Compute columns `[p0, p1)`. Columns before the clip stay zero, columns in the
/// append buffer are summarised from it directly, the rest go to the summary reader.
fn fill_columns<S>(source: &S, data: &mut WaveCacheData, mut p0: usize, mut p1: usize) -> Result<(), CacheError>
where
    S: SampleSource + BlockSequence + ?Sized,
{
    let where_ = &data.where_;
    while p0 < p1 && where_[p0] < 0 && where_[p0 + 1] <= 0 {
        p0 += 1;
    }

    let seq_len = source.sequence_len() as i64;
    let mut a = p0;
    while a < p1 && where_[a + 1] <= seq_len {
        a += 1;
    }
    if a < p1 {
        let append = source.append_buffer();
        for i in a..p1 {
            let left = (data.where_[i] - seq_len).max(0);
            let right = (data.where_[i + 1] - seq_len).min(append.len() as i64);
            if right > left {
                let span = &append[left as usize..right as usize];
                let stats = MinMaxSumsq::from_samples(span);
                data.min[i] = stats.min;
                data.max[i] = stats.max;
                data.rms[i] = stats.rms(span.len());
                data.block_status[i] = APPEND_BUFFER_STATUS;
            }
        }
        p1 = a;
    }

    if p1 > p0 && data.where_[p0].max(0) < seq_len {
        let bounds = data.where_[p0..=p1].to_vec();
        let mut columns = data.columns(p0..p1);
        read_wave_display(source, &bounds, &mut columns)?;
    }
    Ok(())
}
