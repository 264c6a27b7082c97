//! Sample-source seams consumed by the display caches.
//!
//! A clip exposes its samples twice: as a flat, randomly readable signal
//! ([`SampleSource`]) for spectral analysis, and as an ordered list of blocks
//! with precomputed summaries ([`BlockSequence`]) for waveform display.

pub mod memory;

use crate::error::SourceError;
use tracing::trace;

/// Monotonic content revision. Any edit to the samples bumps it; caches compare by equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    pub const INITIAL: Revision = Revision(0);

    #[must_use]
    pub fn next(self) -> Self {
        Revision(self.0.wrapping_add(1))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// What to do with the part of a read that falls outside the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Out-of-range samples read as silence.
    Zero,
    /// Out-of-range samples fail the read.
    Strict,
}

/// Flat view of a clip's samples: committed blocks followed by the append buffer.
pub trait SampleSource: Sync {
    fn sample_rate(&self) -> f64;

    fn revision(&self) -> Revision;

    /// Total readable samples, append buffer included.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples committed to the block sequence.
    fn sequence_len(&self) -> u64;

    /// Uncommitted tail samples, logically following `sequence_len()`.
    fn append_buffer(&self) -> &[f32];

    /// Read `buffer.len()` samples starting at `start`. The span is guaranteed to be in bounds.
    fn read_range(&self, buffer: &mut [f32], start: u64) -> Result<(), SourceError>;

    /// Read `buffer.len()` samples starting at `start`, applying `fill` outside the signal.
    fn get_floats(&self, buffer: &mut [f32], start: i64, fill: FillPolicy) -> Result<(), SourceError> {
        let len = self.len();
        let end = start.saturating_add(buffer.len() as i64);
        let len_i = i64::try_from(len).unwrap_or(i64::MAX);
        if fill == FillPolicy::Strict && (start < 0 || end > len_i) {
            return Err(SourceError::OutOfBounds { start, end, len });
        }

        let lo = start.clamp(0, len_i);
        let hi = end.clamp(0, len_i);
        if hi <= lo {
            buffer.fill(0.0);
            return Ok(());
        }
        let head = (lo - start) as usize;
        let body = (hi - lo) as usize;

        buffer[..head].fill(0.0);
        buffer[head + body..].fill(0.0);
        self.read_range(&mut buffer[head..head + body], lo as u64)
    }
}

/// Summary resolutions stored alongside each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryLevel {
    /// One triple per 256 samples.
    Summary256,
    /// One triple per 65536 samples.
    Summary64k,
}

impl SummaryLevel {
    pub const fn divisor(self) -> usize {
        match self {
            SummaryLevel::Summary256 => 256,
            SummaryLevel::Summary64k => 65_536,
        }
    }
}

/// Precomputed min / max / rms over one summary span.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SummaryTriple {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// First sample of the block within the sequence.
    pub start: u64,
    pub len: usize,
}

impl BlockInfo {
    pub fn end(&self) -> u64 {
        self.start + self.len as u64
    }
}

/// Block-organised view of the committed samples.
pub trait BlockSequence {
    fn block_count(&self) -> usize;

    fn block(&self, index: usize) -> BlockInfo;

    fn read_block(&self, block: usize, offset: usize, out: &mut [f32]) -> Result<(), SourceError>;

    /// Read `out.len()` summary triples starting at triple index `first`.
    fn read_summary(
        &self,
        block: usize,
        level: SummaryLevel,
        first: usize,
        out: &mut [SummaryTriple],
    ) -> Result<(), SourceError>;

    /// Index of the block containing `sample`, or the last block when past the end.
    fn find_block(&self, sample: u64) -> usize {
        let (mut lo, mut hi) = (0usize, self.block_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.block(mid).end() <= sample {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.min(self.block_count().saturating_sub(1))
    }
}

/// Smallest span a [`SampleCursor`] fetches on a miss.
pub const CURSOR_SPAN: usize = 16_384;

/// Read cursor that keeps one contiguous span of samples around.
///
/// Neighbouring spectrogram columns read heavily overlapping windows, so most
/// reads are served from the held span. Each worker thread owns its own cursor.
#[derive(Debug)]
pub struct SampleCursor<'a, S: SampleSource + ?Sized> {
    source: &'a S,
    start: i64,
    data: Vec<f32>,
    valid: usize,
}

impl<'a, S: SampleSource + ?Sized> SampleCursor<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            start: 0,
            data: Vec::new(),
            valid: 0,
        }
    }

    /// Copy samples starting at `start` into `out`, zero-filling outside the signal.
    ///
    /// Returns `false` when the source failed and `out` was zero-filled instead.
    pub fn read_into(&mut self, start: i64, out: &mut [f32]) -> bool {
        if out.is_empty() {
            return true;
        }
        let end = start + out.len() as i64;
        let held_end = self.start + self.valid as i64;
        if !(self.valid > 0 && start >= self.start && end <= held_end) {
            let span = out.len().max(CURSOR_SPAN);
            self.data.resize(span, 0.0);
            match self
                .source
                .get_floats(&mut self.data[..span], start, FillPolicy::Zero)
            {
                Ok(()) => {
                    self.start = start;
                    self.valid = span;
                }
                Err(err) => {
                    trace!("[cursor] read at {start} failed, zero-filling: {err}");
                    self.valid = 0;
                    out.fill(0.0);
                    return false;
                }
            }
        }
        let offset = (start - self.start) as usize;
        out.copy_from_slice(&self.data[offset..offset + out.len()]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySequence;
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn revision_is_monotonic() {
        let r = Revision::INITIAL;
        assert!(r.next() > r);
        assert_eq!(r.next().get(), 1);
    }

    #[test]
    fn get_floats_zero_fills_outside_signal() {
        let seq = MemorySequence::from_samples(8_000.0, &ramp(10));
        let mut buf = [9.0f32; 6];
        seq.get_floats(&mut buf, -2, FillPolicy::Zero).unwrap();
        assert_eq!(buf, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);

        seq.get_floats(&mut buf, 7, FillPolicy::Zero).unwrap();
        assert_eq!(buf, [7.0, 8.0, 9.0, 0.0, 0.0, 0.0]);

        assert!(matches!(
            seq.get_floats(&mut buf, 7, FillPolicy::Strict),
            Err(SourceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn reads_wholly_outside_the_signal_are_silent() {
        let seq = MemorySequence::from_samples(8_000.0, &ramp(10));
        let mut buf = [9.0f32; 6];
        seq.get_floats(&mut buf, 100, FillPolicy::Zero).unwrap();
        assert_eq!(buf, [0.0; 6]);

        buf.fill(9.0);
        seq.get_floats(&mut buf, -100, FillPolicy::Zero).unwrap();
        assert_eq!(buf, [0.0; 6]);

        // Ends exactly at sample 0.
        buf.fill(9.0);
        seq.get_floats(&mut buf, -6, FillPolicy::Zero).unwrap();
        assert_eq!(buf, [0.0; 6]);

        let mut cursor = SampleCursor::new(&seq);
        buf.fill(9.0);
        assert!(cursor.read_into(50_000, &mut buf));
        assert_eq!(buf, [0.0; 6]);
    }

    #[test]
    fn find_block_binary_searches() {
        let seq = MemorySequence::new(8_000.0)
            .with_max_block_samples(100)
            .with_samples(&ramp(350));
        assert_eq!(seq.block_count(), 4);
        assert_eq!(seq.find_block(0), 0);
        assert_eq!(seq.find_block(99), 0);
        assert_eq!(seq.find_block(100), 1);
        assert_eq!(seq.find_block(349), 3);
        assert_eq!(seq.find_block(10_000), 3);
    }

    #[test]
    fn cursor_serves_overlapping_reads_from_held_span() {
        let seq = MemorySequence::from_samples(8_000.0, &ramp(40_000));
        let mut cursor = SampleCursor::new(&seq);
        let mut a = [0.0f32; 4];
        assert!(cursor.read_into(100, &mut a));
        assert_eq!(a, [100.0, 101.0, 102.0, 103.0]);
        assert!(cursor.read_into(102, &mut a));
        assert_eq!(a, [102.0, 103.0, 104.0, 105.0]);
        assert!(cursor.read_into(39_998, &mut a));
        assert_eq!(a, [39_998.0, 39_999.0, 0.0, 0.0]);
    }
}
