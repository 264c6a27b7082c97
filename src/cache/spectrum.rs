//! Spectrogram cache: `width x n_bins` column-major values plus the `where` mapping.

use super::{CopyRange, DisplayRequest, column_center, fill_where, find_correction, pps_matches};
use crate::dsp::spectrogram::{Algorithm, AnalysisParams, AnalysisPlan, ColumnWorker};
use crate::error::{CacheError, check_elements};
use crate::source::{Revision, SampleSource};
use rayon::prelude::*;
use tracing::debug;

/// Upper bound on extra columns probed on each side for reassignment.
pub const MAX_REASSIGN_PROBES: usize = 100;

/// Capacity slack tolerated before the value buffer is released.
const SHRINK_SLACK: f64 = 2.1;

#[derive(Debug, Clone)]
struct SpecCacheData {
    revision: Revision,
    sample_rate: f64,
    pixels_per_second: f64,
    t0: f64,
    origin: f64,
    len: usize,
    params: AnalysisParams,
    n_bins: usize,
    where_: Vec<i64>,
    freq: Vec<f32>,
}

impl SpecCacheData {
    fn empty() -> Self {
        Self {
            revision: Revision::INITIAL,
            sample_rate: 0.0,
            pixels_per_second: 0.0,
            t0: 0.0,
            origin: 0.0,
            len: 0,
            params: AnalysisParams::default(),
            n_bins: 0,
            where_: Vec::new(),
            freq: Vec::new(),
        }
    }

    fn view(&self, width: usize, updated: bool) -> Spectrogram<'_> {
        Spectrogram {
            values: &self.freq[..width * self.n_bins],
            n_bins: self.n_bins,
            where_: &self.where_[..=width],
            updated,
        }
    }
}

/// Read-only view of a spectrogram, valid until the next call on the cache.
#[derive(Debug, Clone, Copy)]
pub struct Spectrogram<'a> {
    /// Column `x` occupies `values[x * n_bins..(x + 1) * n_bins]`.
    pub values: &'a [f32],
    pub n_bins: usize,
    pub where_: &'a [i64],
    /// `false` when the request was served entirely from the cache.
    pub updated: bool,
}

impl<'a> Spectrogram<'a> {
    pub fn width(&self) -> usize {
        self.where_.len().saturating_sub(1)
    }

    pub fn column(&self, x: usize) -> &'a [f32] {
        &self.values[x * self.n_bins..(x + 1) * self.n_bins]
    }
}

/// Per-clip spectral cache.
///
/// Not safe for concurrent mutating calls; the owning clip serialises access.
#[derive(Debug)]
pub struct SpecCache {
    data: Option<SpecCacheData>,
    plan: Option<AnalysisPlan>,
    parallel: bool,
}

impl Default for SpecCache {
    fn default() -> Self {
        Self {
            data: None,
            plan: None,
            parallel: true,
        }
    }
}

impl SpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spread fresh columns over the rayon pool.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn invalidate(&mut self) {
        self.data = None;
    }

    pub fn is_valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.len > 0)
    }

    /// Capacity of the value buffer, in floats.
    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.freq.capacity())
    }

    pub fn matches(
        &self,
        revision: Revision,
        pixels_per_second: f64,
        params: &AnalysisParams,
        sample_rate: f64,
    ) -> bool {
        self.data.as_ref().is_some_and(|d| {
            d.len > 0
                && d.revision == revision
                && d.sample_rate == sample_rate
                && d.params == *params
                && pps_matches(d.pixels_per_second, pixels_per_second, d.len, sample_rate)
        })
    }

    fn plan_for(&mut self, params: &AnalysisParams, sample_rate: f64) -> Result<(), CacheError> {
        let stale = self
            .plan
            .as_ref()
            .is_none_or(|p| p.params() != params || p.sample_rate() != sample_rate);
        if stale {
            self.plan = Some(AnalysisPlan::new(*params, sample_rate)?);
        }
        Ok(())
    }

    pub fn get_spectrogram<S>(
        &mut self,
        source: &S,
        params: &AnalysisParams,
        request: &DisplayRequest,
    ) -> Result<Spectrogram<'_>, CacheError>
    where
        S: SampleSource + ?Sized,
    {
        let rate = source.sample_rate();
        request.validate(rate)?;
        let width = request.width;
        let n_bins = params.n_bins();
        let elements = check_elements(width, n_bins)?;
        let revision = source.revision();

        let mut matched = self.matches(revision, request.pixels_per_second, params, rate);
        let hit = matched
            && self
                .data
                .as_ref()
                .is_some_and(|d| d.t0 == request.t0 && d.len >= width);
        if hit {
            return Ok(data_view(&self.data, width, false));
        }
        self.plan_for(params, rate)?;

        // Reassigned energy crosses columns, so only a full hit is reused.
        if params.algorithm == Algorithm::Reassignment {
            matched = false;
        }

        let mut data = match self.data.take() {
            Some(old) if old.revision != revision => {
                debug!("[spec-cache] clip revision changed, discarding cache");
                SpecCacheData::empty()
            }
            Some(old)
                if old.freq.capacity() as f64 > SHRINK_SLACK * old.freq.len() as f64
                    || old.params.fft_len() < params.fft_len() =>
            {
                debug!(
                    "[spec-cache] releasing {} floats of capacity for {elements} needed",
                    old.freq.capacity()
                );
                matched = false;
                SpecCacheData::empty()
            }
            Some(old) => old,
            None => SpecCacheData::empty(),
        };

        let spp = request.samples_per_pixel(rate);
        let mut overlap = None;
        if matched {
            let found = find_correction(data.origin, data.len, width, request.t0, rate, spp);
            let range = CopyRange::new(found, data.len, width);
            if !range.is_empty() {
                overlap = Some((found, range));
            }
        }

        // Grow, keeping reusable columns.
        let old_elements = data.freq.len();
        match overlap {
            Some((found, range)) => {
                data.freq.resize(old_elements.max(elements), 0.0);
                let src = (range.begin as i64 + found.old_x0) as usize * n_bins;
                data.freq
                    .copy_within(src..src + range.len() * n_bins, range.begin * n_bins);
                data.freq.resize(elements, 0.0);
                debug!(
                    "[spec-cache] reusing columns {}..{} of {width}",
                    range.begin, range.end
                );
            }
            None => {
                data.freq.clear();
                data.freq.resize(elements, 0.0);
                debug!("[spec-cache] full rebuild of {width} columns, {n_bins} bins");
            }
        }
        let range = overlap.map(|(_, r)| r).unwrap_or_default();
        let correction = overlap.map_or(0.0, |(found, _)| found.correction);

        data.revision = revision;
        data.sample_rate = rate;
        data.pixels_per_second = request.pixels_per_second;
        data.t0 = request.t0;
        data.len = width;
        data.params = *params;
        data.n_bins = n_bins;
        data.where_.resize(width + 1, 0);
        data.origin = fill_where(&mut data.where_, correction, request.t0, rate, spp);

        let total = source.len() as i64;
        let first = data.where_[0];
        if first.max(0) >= total {
            debug!("[spec-cache] request starts at sample {first}, clip holds {total}");
            return Err(CacheError::OutOfRange {
                first,
                len: total.max(0) as u64,
            });
        }

        let Some(plan) = self.plan.as_ref() else {
            return Err(CacheError::InvalidRequest("analysis plan unavailable"));
        };
        let populate = Populate {
            plan,
            source,
            where_: &data.where_,
            num_samples: total,
            samples_per_pixel: spp,
            pixels_per_sample: request.pixels_per_second / rate,
            parallel: self.parallel,
        };
        for (lower, upper) in [(0, range.begin), (range.end, width)] {
            populate.run(&mut data.freq, lower, upper);
        }

        self.data = Some(data);
        Ok(data_view(&self.data, width, true))
    }
}

fn data_view(data: &Option<SpecCacheData>, width: usize, updated: bool) -> Spectrogram<'_> {
    match data {
        Some(d) => d.view(width, updated),
        None => Spectrogram {
            values: &[],
            n_bins: 0,
            where_: &[],
            updated,
        },
    }
}

/// Fills fresh column ranges of one request.
struct Populate<'a, S: SampleSource + ?Sized> {
    plan: &'a AnalysisPlan,
    source: &'a S,
    where_: &'a [i64],
    num_samples: i64,
    samples_per_pixel: f64,
    pixels_per_sample: f64,
    parallel: bool,
}

impl<S: SampleSource + ?Sized> Populate<'_, S> {
    fn center(&self, xx: i64) -> Option<i64> {
        let from = column_center(self.where_, xx, self.samples_per_pixel);
        (from >= 0 && from < self.num_samples).then_some(from)
    }

    fn run(&self, freq: &mut [f32], lower: usize, upper: usize) {
        if upper <= lower {
            return;
        }
        match self.plan.params().algorithm {
            Algorithm::Reassignment => self.reassign(freq, lower, upper),
            _ => self.direct(freq, lower, upper),
        }
    }

    fn direct(&self, freq: &mut [f32], lower: usize, upper: usize) {
        let n_bins = self.plan.n_bins();
        let silence = self.plan.silence();
        let region = &mut freq[lower * n_bins..upper * n_bins];
        let compute = |worker: &mut ColumnWorker<'_, S>, (i, column): (usize, &mut [f32])| {
            match self.center((lower + i) as i64) {
                Some(from) => worker.compute_column(from, column),
                None => column.fill(silence),
            }
        };

        if self.parallel {
            region
                .par_chunks_mut(n_bins)
                .enumerate()
                .for_each_init(|| ColumnWorker::new(self.plan, self.source), compute);
        } else {
            let mut worker = ColumnWorker::new(self.plan, self.source);
            region
                .chunks_mut(n_bins)
                .enumerate()
                .for_each(|item| compute(&mut worker, item));
        }
    }

    /// Analyse one column, keeping contributions that land in `[lower, upper)`.
    fn contributions(
        &self,
        worker: &mut ColumnWorker<'_, S>,
        xx: i64,
        lower: usize,
        upper: usize,
    ) -> Vec<(usize, usize, f32)> {
        let mut hits = Vec::new();
        if let Some(from) = self.center(xx) {
            worker.reassign_column(from, xx, self.pixels_per_sample, |x, bin, power| {
                if x >= lower as i64 && x < upper as i64 {
                    hits.push((x as usize, bin, power));
                }
            });
        }
        hits
    }

    fn reassign(&self, freq: &mut [f32], lower: usize, upper: usize) {
        let n_bins = self.plan.n_bins();
        freq[lower * n_bins..upper * n_bins].fill(0.0);

        let per_column: Vec<Vec<(usize, usize, f32)>> = if self.parallel {
            (lower..upper)
                .into_par_iter()
                .map_init(
                    || ColumnWorker::new(self.plan, self.source),
                    |worker, xx| self.contributions(worker, xx as i64, lower, upper),
                )
                .collect()
        } else {
            let mut worker = ColumnWorker::new(self.plan, self.source);
            (lower..upper)
                .map(|xx| self.contributions(&mut worker, xx as i64, lower, upper))
                .collect()
        };
        // Accumulate in column order so the sum does not depend on scheduling.
        for (x, bin, power) in per_column.into_iter().flatten() {
            freq[x * n_bins + bin] += power;
        }

        // Columns outside the range can still reassign energy into it.
        let limit = ((self.plan.fft_len() as f64 * self.pixels_per_sample).round() as usize)
            .min(MAX_REASSIGN_PROBES);
        let mut worker = ColumnWorker::new(self.plan, self.source);
        let mut probe = |xx: i64, freq: &mut [f32]| {
            let hits = self.contributions(&mut worker, xx, lower, upper);
            for &(x, bin, power) in &hits {
                freq[x * n_bins + bin] += power;
            }
            !hits.is_empty()
        };
        for step in 1..=limit as i64 {
            if !probe(lower as i64 - step, freq) {
                break;
            }
        }
        for step in 0..limit as i64 {
            if !probe(upper as i64 + step, freq) {
                break;
            }
        }

        for column in freq[lower * n_bins..upper * n_bins].chunks_mut(n_bins) {
            self.plan.finish_db(column);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySequence;
    use crate::util::audio::DB_FLOOR;

    fn tone(rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (std::f64::consts::TAU * 1_000.0 * n as f64 / rate).sin() as f32 * 0.5)
            .collect()
    }

    fn params(algorithm: Algorithm) -> AnalysisParams {
        AnalysisParams {
            algorithm,
            window_size: 256,
            ..AnalysisParams::default()
        }
    }

    #[test]
    fn full_hit_reports_no_update() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 16_000));
        let mut cache = SpecCache::new();
        let request = DisplayRequest::new(64, 0.0, 100.0);
        let p = params(Algorithm::Standard);

        let first = cache.get_spectrogram(&seq, &p, &request).unwrap();
        assert!(first.updated);
        assert_eq!(first.n_bins, 128);
        let snapshot = first.values.to_vec();

        let second = cache.get_spectrogram(&seq, &p, &request).unwrap();
        assert!(!second.updated);
        assert_eq!(second.values, snapshot.as_slice());
    }

    #[test]
    fn parameter_change_rebuilds() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 16_000));
        let mut cache = SpecCache::new();
        let request = DisplayRequest::new(32, 0.0, 100.0);
        cache
            .get_spectrogram(&seq, &params(Algorithm::Standard), &request)
            .unwrap();
        let mut p = params(Algorithm::Standard);
        p.window = crate::dsp::WindowKind::Blackman;
        let again = cache.get_spectrogram(&seq, &p, &request).unwrap();
        assert!(again.updated);
    }

    #[test]
    fn scrolling_reuses_columns_exactly() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 40_000));
        let p = params(Algorithm::Standard);
        let mut cache = SpecCache::new();
        let old = cache
            .get_spectrogram(&seq, &p, &DisplayRequest::new(100, 0.0, 100.0))
            .unwrap()
            .values
            .to_vec();

        let shifted = DisplayRequest::new(100, 0.2, 100.0);
        let new = cache.get_spectrogram(&seq, &p, &shifted).unwrap();
        let n_bins = new.n_bins;
        for x in 0..80 {
            assert_eq!(new.column(x), &old[(x + 20) * n_bins..(x + 21) * n_bins], "column {x}");
        }
        let reused = new.values.to_vec();

        let mut fresh = SpecCache::new();
        let expected = fresh.get_spectrogram(&seq, &p, &shifted).unwrap();
        assert_eq!(reused, expected.values);
    }

    #[test]
    fn serial_and_parallel_agree() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 16_000));
        let request = DisplayRequest::new(48, 0.1, 150.0);
        for algorithm in [Algorithm::Standard, Algorithm::Reassignment, Algorithm::Autocorrelation] {
            let p = params(algorithm);
            let mut serial = SpecCache::new();
            serial.set_parallel(false);
            let a = serial
                .get_spectrogram(&seq, &p, &request)
                .unwrap()
                .values
                .to_vec();
            let mut parallel = SpecCache::new();
            let b = parallel.get_spectrogram(&seq, &p, &request).unwrap();
            assert_eq!(a, b.values, "{algorithm:?}");
        }
    }

    #[test]
    fn columns_past_the_end_are_silent() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 800));
        let mut cache = SpecCache::new();
        // 80 samples per pixel: columns 10.. start past the last sample.
        let spec = cache
            .get_spectrogram(&seq, &params(Algorithm::Standard), &DisplayRequest::new(20, 0.0, 100.0))
            .unwrap();
        assert!(spec.column(15).iter().all(|&v| v == DB_FLOOR));
        assert!(spec.column(5).iter().any(|&v| v > -20.0));
    }

    #[test]
    fn zoom_out_releases_oversized_buffer() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 40_000));
        let p = params(Algorithm::Standard);
        let mut cache = SpecCache::new();
        cache
            .get_spectrogram(&seq, &p, &DisplayRequest::new(300, 0.0, 100.0))
            .unwrap();
        cache
            .get_spectrogram(&seq, &p, &DisplayRequest::new(100, 0.0, 60.0))
            .unwrap();
        assert!(cache.capacity() >= 300 * 128);
        // The next request sees capacity far above need and starts over.
        cache
            .get_spectrogram(&seq, &p, &DisplayRequest::new(100, 0.0, 50.0))
            .unwrap();
        assert!(cache.capacity() < 300 * 128);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let seq = MemorySequence::from_samples(8_000.0, &tone(8_000.0, 800));
        let mut cache = SpecCache::new();
        let p = AnalysisParams {
            window_size: 32_768,
            zero_padding: 8,
            ..AnalysisParams::default()
        };
        let err = cache
            .get_spectrogram(&seq, &p, &DisplayRequest::new(10_000, 0.0, 100.0))
            .unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { .. }));
    }
}
