use std::fmt::Display;

use crate::domain::errors::UplinkError;

/// The storage backend rejects non-final chunks whose length is not a
/// multiple of this boundary.
pub const CHUNK_ALIGNMENT_BYTES: usize = 256 * 1024;

/// Value of the `Content-Range` header sent with one chunk PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes {start}-{end}/{total}`, `total` is `*` until the size is known.
    Bytes {
        start: u64,
        end: u64,
        total: Option<u64>,
    },
    /// `bytes */{total}`, an empty finalize request.
    Finalize { total: u64 },
}

impl ContentRange {
    /// Range for a chunk of `len` bytes starting at the confirmed `offset`.
    /// A zero-length chunk can only be the final one and becomes a finalize.
    pub fn for_chunk(offset: u64, len: u64, is_final: bool) -> Self {
        if len == 0 {
            return ContentRange::Finalize { total: offset };
        }
        ContentRange::Bytes {
            start: offset,
            end: offset + len - 1,
            total: is_final.then_some(offset + len),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let spec = raw.trim().strip_prefix("bytes ")?;
        let (range, total) = spec.split_once('/')?;

        if range == "*" {
            return Some(ContentRange::Finalize {
                total: total.parse().ok()?,
            });
        }

        let (start, end) = range.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        let total = match total {
            "*" => None,
            value => Some(value.parse().ok()?),
        };

        Some(ContentRange::Bytes { start, end, total })
    }

    /// Number of body bytes this range covers.
    pub fn len(&self) -> u64 {
        match self {
            ContentRange::Bytes { start, end, .. } => end - start + 1,
            ContentRange::Finalize { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_final(&self) -> bool {
        match self {
            ContentRange::Bytes { total, .. } => total.is_some(),
            ContentRange::Finalize { .. } => true,
        }
    }
}

impl Display for ContentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentRange::Bytes {
                start,
                end,
                total: Some(total),
            } => write!(f, "bytes {}-{}/{}", start, end, total),
            ContentRange::Bytes {
                start,
                end,
                total: None,
            } => write!(f, "bytes {}-{}/*", start, end),
            ContentRange::Finalize { total } => write!(f, "bytes */{}", total),
        }
    }
}

pub fn validate_chunk_len(len: usize, is_final: bool, alignment: usize) -> Result<(), UplinkError> {
    if alignment == 0 {
        return Err(UplinkError::InvalidPayload(
            "chunk alignment must be >= 1".to_string(),
        ));
    }
    if is_final {
        return Ok(());
    }
    if len == 0 || len % alignment != 0 {
        return Err(UplinkError::InvalidPayload(format!(
            "non-final chunk of {} bytes is not a multiple of {}",
            len, alignment
        )));
    }
    Ok(())
}
