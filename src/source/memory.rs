//! In-memory block sequence with 256:1 and 65536:1 summaries and an append buffer.

use super::{
    BlockInfo, BlockSequence, Revision, SampleSource, SummaryLevel, SummaryTriple,
};
use crate::error::SourceError;
use crate::util::audio::MinMaxSumsq;
use tracing::debug;

pub const DEFAULT_MAX_BLOCK_SAMPLES: usize = 262_144;

#[derive(Debug, Clone)]
struct MemoryBlock {
    start: u64,
    samples: Vec<f32>,
    summary_256: Option<Vec<SummaryTriple>>,
    summary_64k: Option<Vec<SummaryTriple>>,
}

impl MemoryBlock {
    fn new(start: u64, samples: Vec<f32>, with_summaries: bool) -> Self {
        let mut block = Self {
            start,
            samples,
            summary_256: None,
            summary_64k: None,
        };
        if with_summaries {
            block.build_summaries();
        }
        block
    }

    fn has_summaries(&self) -> bool {
        self.summary_256.is_some() && self.summary_64k.is_some()
    }

    fn build_summaries(&mut self) {
        self.summary_256 = Some(summarize(&self.samples, SummaryLevel::Summary256));
        self.summary_64k = Some(summarize(&self.samples, SummaryLevel::Summary64k));
    }

    fn summary(&self, level: SummaryLevel) -> Option<&[SummaryTriple]> {
        match level {
            SummaryLevel::Summary256 => self.summary_256.as_deref(),
            SummaryLevel::Summary64k => self.summary_64k.as_deref(),
        }
    }
}

fn summarize(samples: &[f32], level: SummaryLevel) -> Vec<SummaryTriple> {
    samples
        .chunks(level.divisor())
        .map(|chunk| {
            let stats = MinMaxSumsq::from_samples(chunk);
            SummaryTriple {
                min: stats.min,
                max: stats.max,
                rms: stats.rms(chunk.len()),
            }
        })
        .collect()
}

/// A mono clip held entirely in memory.
///
/// Committed samples live in blocks of at most `max_block_samples`; newly
/// appended samples wait in the append buffer until a block fills up or
/// [`flush`](Self::flush) is called. Every content change bumps the revision.
#[derive(Debug, Clone)]
pub struct MemorySequence {
    sample_rate: f64,
    blocks: Vec<MemoryBlock>,
    append_buffer: Vec<f32>,
    max_block_samples: usize,
    deferred_summaries: bool,
    revision: Revision,
}

impl MemorySequence {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            blocks: Vec::new(),
            append_buffer: Vec::new(),
            max_block_samples: DEFAULT_MAX_BLOCK_SAMPLES,
            deferred_summaries: false,
            revision: Revision::INITIAL,
        }
    }

    pub fn from_samples(sample_rate: f64, samples: &[f32]) -> Self {
        Self::new(sample_rate).with_samples(samples)
    }

    /// Change the block size. Existing content is re-blocked.
    #[must_use]
    pub fn with_max_block_samples(mut self, max_block_samples: usize) -> Self {
        self.max_block_samples = max_block_samples.max(1);
        let committed = self.committed_samples();
        self.blocks.clear();
        self.commit(&committed);
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: &[f32]) -> Self {
        self.replace(samples);
        self
    }

    /// Leave summaries of newly committed blocks unbuilt until [`build_summaries`](Self::build_summaries).
    pub fn set_deferred_summaries(&mut self, deferred: bool) {
        self.deferred_summaries = deferred;
    }

    /// Replace the whole content with `samples`, committed to blocks.
    pub fn replace(&mut self, samples: &[f32]) {
        self.blocks.clear();
        self.append_buffer.clear();
        self.commit(samples);
        self.revision = self.revision.next();
    }

    /// Add samples to the append buffer, committing whole blocks as they fill.
    pub fn append(&mut self, samples: &[f32]) {
        self.append_buffer.extend_from_slice(samples);
        let full = self.append_buffer.len() / self.max_block_samples * self.max_block_samples;
        if full > 0 {
            let committed: Vec<f32> = self.append_buffer.drain(..full).collect();
            self.commit(&committed);
        }
        self.revision = self.revision.next();
    }

    /// Commit the append buffer into blocks.
    pub fn flush(&mut self) {
        if self.append_buffer.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.append_buffer);
        self.commit(&pending);
        self.revision = self.revision.next();
    }

    /// Compute every summary that was deferred. Returns the number of blocks touched.
    pub fn build_summaries(&mut self) -> usize {
        let mut built = 0;
        for block in self.blocks.iter_mut().filter(|b| !b.has_summaries()) {
            block.build_summaries();
            built += 1;
        }
        if built > 0 {
            debug!("[sequence] built deferred summaries for {built} blocks");
            self.revision = self.revision.next();
        }
        built
    }

    /// Overwrite samples in place starting at `start`, clipped to the committed length.
    pub fn write(&mut self, start: u64, samples: &[f32]) {
        let with_summaries = !self.deferred_summaries;
        let mut touched = false;
        for block in &mut self.blocks {
            let b_end = block.start + block.samples.len() as u64;
            let w_end = start + samples.len() as u64;
            if b_end <= start || w_end <= block.start {
                continue;
            }
            let lo = start.max(block.start);
            let hi = w_end.min(b_end);
            let dst = (lo - block.start) as usize..(hi - block.start) as usize;
            let src = (lo - start) as usize..(hi - start) as usize;
            block.samples[dst].copy_from_slice(&samples[src]);
            block.summary_256 = None;
            block.summary_64k = None;
            if with_summaries {
                block.build_summaries();
            }
            touched = true;
        }
        if touched {
            self.revision = self.revision.next();
        }
    }

    fn commit(&mut self, samples: &[f32]) {
        let with_summaries = !self.deferred_summaries;
        let mut start = self.sequence_len();
        for chunk in samples.chunks(self.max_block_samples) {
            self.blocks
                .push(MemoryBlock::new(start, chunk.to_vec(), with_summaries));
            start += chunk.len() as u64;
        }
    }

    fn committed_samples(&self) -> Vec<f32> {
        self.blocks
            .iter()
            .flat_map(|b| b.samples.iter().copied())
            .collect()
    }

    fn checked_block(&self, block: usize) -> Result<&MemoryBlock, SourceError> {
        self.blocks
            .get(block)
            .ok_or(SourceError::Unreadable { block })
    }
}

impl SampleSource for MemorySequence {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn len(&self) -> u64 {
        self.sequence_len() + self.append_buffer.len() as u64
    }

    fn sequence_len(&self) -> u64 {
        self.blocks
            .last()
            .map_or(0, |b| b.start + b.samples.len() as u64)
    }

    fn append_buffer(&self) -> &[f32] {
        &self.append_buffer
    }

    fn read_range(&self, buffer: &mut [f32], start: u64) -> Result<(), SourceError> {
        let end = start + buffer.len() as u64;
        if end > self.len() {
            return Err(SourceError::OutOfBounds {
                start: start as i64,
                end: end as i64,
                len: self.len(),
            });
        }

        let seq_len = self.sequence_len();
        let mut pos = start;
        let mut written = 0;
        if pos < seq_len {
            let mut b = self.find_block(pos);
            while pos < end.min(seq_len) {
                let block = &self.blocks[b];
                let offset = (pos - block.start) as usize;
                let take = (block.samples.len() - offset).min((end.min(seq_len) - pos) as usize);
                buffer[written..written + take]
                    .copy_from_slice(&block.samples[offset..offset + take]);
                written += take;
                pos += take as u64;
                b += 1;
            }
        }
        if pos < end {
            let offset = (pos - seq_len) as usize;
            let take = (end - pos) as usize;
            buffer[written..].copy_from_slice(&self.append_buffer[offset..offset + take]);
        }
        Ok(())
    }
}

impl BlockSequence for MemorySequence {
    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block(&self, index: usize) -> BlockInfo {
        let block = &self.blocks[index];
        BlockInfo {
            start: block.start,
            len: block.samples.len(),
        }
    }

    fn read_block(&self, block: usize, offset: usize, out: &mut [f32]) -> Result<(), SourceError> {
        let data = &self.checked_block(block)?.samples;
        let src = data
            .get(offset..offset + out.len())
            .ok_or(SourceError::Unreadable { block })?;
        out.copy_from_slice(src);
        Ok(())
    }

    fn read_summary(
        &self,
        block: usize,
        level: SummaryLevel,
        first: usize,
        out: &mut [SummaryTriple],
    ) -> Result<(), SourceError> {
        let summary = self
            .checked_block(block)?
            .summary(level)
            .ok_or(SourceError::SummaryUnavailable { block })?;
        let src = summary
            .get(first..first + out.len())
            .ok_or(SourceError::Unreadable { block })?;
        out.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FillPolicy;

    #[test]
    fn append_commits_full_blocks_and_keeps_tail() {
        let mut seq = MemorySequence::new(1_000.0).with_max_block_samples(64);
        let before = seq.revision();
        seq.append(&vec![0.25; 150]);
        assert!(seq.revision() > before);
        assert_eq!(seq.block_count(), 2);
        assert_eq!(seq.sequence_len(), 128);
        assert_eq!(seq.append_buffer().len(), 22);
        assert_eq!(seq.len(), 150);

        seq.flush();
        assert_eq!(seq.block_count(), 3);
        assert!(seq.append_buffer().is_empty());
        assert_eq!(seq.sequence_len(), 150);
    }

    #[test]
    fn reads_span_blocks_and_append_buffer() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut seq = MemorySequence::new(1_000.0).with_max_block_samples(30);
        seq.append(&samples);
        assert_eq!(seq.sequence_len(), 90);

        let mut buf = vec![0.0; 20];
        seq.get_floats(&mut buf, 80, FillPolicy::Strict).unwrap();
        let expected: Vec<f32> = (80..100).map(|i| i as f32).collect();
        assert_eq!(buf, expected);
    }

    #[test]
    fn summaries_hold_min_max_rms() {
        let samples: Vec<f32> = (0..512).map(|i| if i < 256 { 0.5 } else { -1.0 }).collect();
        let seq = MemorySequence::from_samples(1_000.0, &samples);
        let mut out = [SummaryTriple::default(); 2];
        seq.read_summary(0, SummaryLevel::Summary256, 0, &mut out).unwrap();
        assert_eq!(out[0].min, 0.5);
        assert_eq!(out[0].max, 0.5);
        assert!((out[0].rms - 0.5).abs() < 1e-6);
        assert_eq!(out[1].min, -1.0);
        assert!((out[1].rms - 1.0).abs() < 1e-6);

        let mut coarse = [SummaryTriple::default(); 1];
        seq.read_summary(0, SummaryLevel::Summary64k, 0, &mut coarse)
            .unwrap();
        assert_eq!(coarse[0].min, -1.0);
        assert_eq!(coarse[0].max, 0.5);
    }

    #[test]
    fn deferred_summaries_are_unavailable_until_built() {
        let mut seq = MemorySequence::new(1_000.0);
        seq.set_deferred_summaries(true);
        seq.replace(&vec![0.1; 1024]);
        let mut out = [SummaryTriple::default(); 1];
        assert_eq!(
            seq.read_summary(0, SummaryLevel::Summary256, 0, &mut out),
            Err(SourceError::SummaryUnavailable { block: 0 })
        );

        let before = seq.revision();
        assert_eq!(seq.build_summaries(), 1);
        assert!(seq.revision() > before);
        assert!(seq.read_summary(0, SummaryLevel::Summary256, 0, &mut out).is_ok());
    }

    #[test]
    fn write_bumps_revision_and_refreshes_summaries() {
        let mut seq = MemorySequence::from_samples(1_000.0, &vec![0.0; 512]);
        let before = seq.revision();
        seq.write(256, &[0.75; 4]);
        assert!(seq.revision() > before);
        let mut out = [SummaryTriple::default(); 1];
        seq.read_summary(0, SummaryLevel::Summary256, 1, &mut out).unwrap();
        assert_eq!(out[0].max, 0.75);
    }
}
