//! One contiguous received byte range.

use crate::error::CacheError;

/// New fragments are allocated with spare room up to the next 16 KiB
/// boundary so that streamed appends rarely reallocate.
pub const FRAGMENT_PAD: usize = 0x4000;

/// Capacity for a new fragment holding `len` bytes.
pub fn cache_pad(len: usize) -> usize {
    (len | (FRAGMENT_PAD - 1)) + 1
}

/// Allocate a buffer with exactly `capacity` bytes reserved, reporting
/// allocation failure instead of aborting.
pub(crate) fn try_alloc(capacity: usize) -> Result<Vec<u8>, CacheError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity)
        .map_err(|_| CacheError::OutOfMemory {
            requested: capacity,
        })?;
    Ok(buf)
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub(super) offset: u64,
    pub(super) data: Vec<u8>,
    /// Bytes the fragment may hold before it has to be reallocated.
    pub(super) real_length: usize,
}

impl Fragment {
    pub(super) fn new(offset: u64, bytes: &[u8], capacity: usize) -> Result<Self, CacheError> {
        let capacity = capacity.max(bytes.len());
        let mut data = try_alloc(capacity)?;
        data.extend_from_slice(bytes);
        Ok(Self {
            offset,
            data,
            real_length: capacity,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    pub fn capacity(&self) -> usize {
        self.real_length
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
