use thiserror::Error;

/// Upper bound on pixel columns a single display request may ask for.
pub const MAX_PIXEL_COLUMNS: usize = 1 << 20;

/// Upper bound on floats held by one spectral cache (`columns * bins`).
pub const MAX_CACHE_ELEMENTS: usize = 1 << 28;

/// Failures surfaced by display requests.
///
/// Read failures inside a request never show up here: they are zero-filled on
/// the drawing path. Only a request that cannot be satisfied at all fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("first requested sample {first} lies beyond the sequence length {len}")]
    OutOfRange { first: i64, len: u64 },
    #[error("request needs {requested} elements, limit is {limit}")]
    TooLarge { requested: usize, limit: usize },
    #[error("invalid display request: {0}")]
    InvalidRequest(&'static str),
}

/// Failures reported by a sample source. Callers on the drawing path swallow them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("samples {start}..{end} are outside 0..{len}")]
    OutOfBounds { start: i64, end: i64, len: u64 },
    #[error("summary for block {block} is not available yet")]
    SummaryUnavailable { block: usize },
    #[error("block {block} could not be read")]
    Unreadable { block: usize },
}

/// Clamp a requested pixel width to the platform ceiling.
pub fn clamp_width(width: usize) -> usize {
    width.min(MAX_PIXEL_COLUMNS)
}

pub(crate) fn check_width(width: usize) -> Result<(), CacheError> {
    if width == 0 {
        return Err(CacheError::InvalidRequest("zero pixel width"));
    }
    if width > MAX_PIXEL_COLUMNS {
        return Err(CacheError::TooLarge {
            requested: width,
            limit: MAX_PIXEL_COLUMNS,
        });
    }
    Ok(())
}

pub(crate) fn check_elements(columns: usize, rows: usize) -> Result<usize, CacheError> {
    match columns.checked_mul(rows) {
        Some(total) if total <= MAX_CACHE_ELEMENTS => Ok(total),
        Some(total) => Err(CacheError::TooLarge {
            requested: total,
            limit: MAX_CACHE_ELEMENTS,
        }),
        None => Err(CacheError::TooLarge {
            requested: usize::MAX,
            limit: MAX_CACHE_ELEMENTS,
        }),
    }
}
