//! Ordered run-list of received byte ranges for one resource.
//!
//! Fragments are kept sorted by offset and never overlap once an operation
//! returns. `data_size` always equals the sum of fragment lengths; the entry
//! table reads it before and after each mutation to keep the global cache
//! size in step.

use super::fragment::{cache_pad, try_alloc, Fragment};
use crate::error::CacheError;

/// Outcome of [`FragmentStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// The stored data grew.
    Enlarged,
    /// Only existing bytes were overwritten.
    Overwritten,
}

#[derive(Debug, Clone)]
pub struct FragmentStore {
    frags: Vec<Fragment>,
    /// Expected (logical) length of the resource.
    length: u64,
    data_size: u64,
    incomplete: bool,
}

impl Default for FragmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentStore {
    pub fn new() -> Self {
        Self {
            frags: Vec::new(),
            length: 0,
            data_size: 0,
            incomplete: true,
        }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.frags
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn set_incomplete(&mut self, incomplete: bool) {
        self.incomplete = incomplete;
    }

    /// Length of the fragment starting at offset 0, if any.
    pub fn prefix_len(&self) -> Option<u64> {
        self.frags
            .first()
            .filter(|f| f.offset == 0)
            .map(|f| f.len() as u64)
    }

    /// Store `data` at `offset`.
    ///
    /// Anything stored past `offset + data.len()` is dropped when the new data
    /// lands inside an existing fragment (even if the bytes are identical), or
    /// when it contradicts bytes stored downstream: a document parsed while
    /// still incomplete must not keep a stale tail from an earlier guess.
    pub fn add(&mut self, offset: u64, data: &[u8]) -> Result<Growth, CacheError> {
        self.add_with_capacity(offset, data, cache_pad(data.len()))
    }

    /// [`FragmentStore::add`] with the capacity a new fragment would get.
    fn add_with_capacity(
        &mut self,
        offset: u64,
        data: &[u8],
        capacity: usize,
    ) -> Result<Growth, CacheError> {
        if data.is_empty() {
            return Ok(Growth::Overwritten);
        }

        let end = offset + data.len() as u64;
        let old_length = self.length;
        if self.length < end {
            self.length = end;
        }

        let mut insert_at = self.frags.len();
        let mut split = false;
        for i in 0..self.frags.len() {
            let f_offset = self.frags[i].offset;
            let f_end = self.frags[i].end();

            if f_offset > offset {
                insert_at = i;
                break;
            }
            if f_end < offset {
                continue;
            }

            let mut growth = Growth::Overwritten;
            if end > f_end {
                let needed = (end - f_offset) as usize;
                if needed <= self.frags[i].real_length {
                    self.frags[i].data.resize(needed, 0);
                    self.data_size += end - f_end;
                    growth = Growth::Enlarged;
                } else {
                    // No room: keep the prefix before `offset` and put the
                    // new data into its own fragment right after it.
                    let keep = (offset - f_offset) as usize;
                    let dropped = self.frags[i].len() - keep;
                    self.frags[i].data.truncate(keep);
                    self.data_size -= dropped as u64;
                    split = dropped > 0;
                    if keep == 0 {
                        self.frags.remove(i);
                        insert_at = i;
                    } else {
                        insert_at = i + 1;
                    }
                    break;
                }
            }

            let start = (offset - f_offset) as usize;
            self.frags[i].data[start..start + data.len()].copy_from_slice(data);

            let mut changed = false;
            let merged = self.remove_overlaps(i, &mut changed);
            self.truncate(end, false);
            merged?;
            return Ok(growth);
        }

        let frag = match Fragment::new(offset, data, capacity) {
            Ok(frag) => frag,
            Err(e) => {
                self.length = old_length;
                if split {
                    self.incomplete = true;
                }
                return Err(e);
            }
        };
        self.frags.insert(insert_at, frag);
        self.data_size += data.len() as u64;

        let mut changed = false;
        let merged = self.remove_overlaps(insert_at, &mut changed);
        if changed {
            self.truncate(end, false);
        }
        merged?;
        Ok(Growth::Enlarged)
    }

    /// Merge every successor that fragment `i` now overlaps into it. Sets
    /// `changed` when an overlapping region holds different bytes.
    fn remove_overlaps(&mut self, i: usize, changed: &mut bool) -> Result<(), CacheError> {
        let mut result = Ok(());

        while i + 1 < self.frags.len() {
            let f_offset = self.frags[i].offset;
            let f_end = self.frags[i].end();
            let next_offset = self.frags[i + 1].offset;
            if f_end <= next_offset {
                break;
            }

            let next = self.frags.remove(i + 1);
            self.data_size -= next.len() as u64;
            let at = (next_offset - f_offset) as usize;

            if f_end < next.end() {
                // We end inside the successor: append its remainder to us.
                let overlap = (f_end - next_offset) as usize;
                if self.frags[i].data[at..] != next.data[..overlap] {
                    *changed = true;
                }
                let tail = &next.data[overlap..];
                let f = &mut self.frags[i];
                match f.data.try_reserve_exact(tail.len()) {
                    Ok(()) => {
                        f.data.extend_from_slice(tail);
                        f.real_length = f.data.len();
                        self.data_size += tail.len() as u64;
                    }
                    Err(_) => {
                        // The successor's tail is lost; the gap is refetched later.
                        self.incomplete = true;
                        result = Err(CacheError::OutOfMemory {
                            requested: f.data.len() + tail.len(),
                        });
                    }
                }
            } else if self.frags[i].data[at..at + next.len()] != next.data[..] {
                *changed = true;
            }
        }

        result
    }

    /// Merge the fragments reachable from offset 0 without a gap into one and
    /// return it. Returns `None` if nothing starts at offset 0.
    pub fn get_cache_fragment(&mut self) -> Option<&Fragment> {
        if self.frags.first()?.offset != 0 {
            return None;
        }
        if self.frags.len() == 1 {
            return self.frags.first();
        }

        let mut contiguous = self.frags.len();
        for k in 1..self.frags.len() {
            let prev_end = self.frags[k - 1].end();
            let offset = self.frags[k].offset;
            if offset > prev_end {
                contiguous = k;
                break;
            }
            if offset < prev_end {
                tracing::error!(offset, prev_end, "fragments overlap");
                return None;
            }
        }

        if contiguous == 1 {
            return self.frags.first();
        }

        let total: usize = self.frags[..contiguous].iter().map(Fragment::len).sum();
        let mut merged = match try_alloc(total) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!("defragmentation failed: {}", e);
                return self.frags.first().filter(|f| !f.is_empty());
            }
        };
        for f in self.frags.drain(..contiguous) {
            merged.extend_from_slice(&f.data);
        }
        self.frags.insert(
            0,
            Fragment {
                offset: 0,
                data: merged,
                real_length: total,
            },
        );
        self.frags.first()
    }

    /// Drop everything from `offset` on. With `final_size`, the retained tail
    /// gives back its spare capacity since no more appends are expected.
    pub fn truncate(&mut self, offset: u64, final_size: bool) {
        if self.length > offset {
            self.length = offset;
            self.incomplete = true;
        }

        let mut first_dropped = self.frags.len();
        for i in 0..self.frags.len() {
            let f_offset = self.frags[i].offset;
            let f_len = self.frags[i].len() as u64;
            if offset >= f_offset && offset - f_offset >= f_len {
                continue;
            }

            first_dropped = i;
            if offset > f_offset {
                let size = offset - f_offset;
                self.data_size -= f_len - size;
                self.frags[i].data.truncate(size as usize);
                first_dropped = i + 1;
            }
            break;
        }

        let removed: u64 = self
            .frags
            .drain(first_dropped..)
            .map(|f| f.len() as u64)
            .sum();
        self.data_size -= removed;

        if final_size {
            if let Some(last) = self.frags.last_mut() {
                last.data.shrink_to_fit();
                last.real_length = last.data.len();
            }
        }
    }

    /// Drop everything before `offset`. Used for detached entries that are
    /// consumed as a stream.
    pub fn free_to(&mut self, offset: u64) {
        while let Some(f) = self.frags.first_mut() {
            if f.end() <= offset {
                let len = f.len() as u64;
                self.frags.remove(0);
                self.data_size -= len;
            } else if f.offset < offset {
                let size = (offset - f.offset) as usize;
                f.data.drain(..size);
                f.offset = offset;
                self.data_size -= size as u64;
                break;
            } else {
                break;
            }
        }
    }

    /// Drop all content and start over.
    pub fn clear(&mut self) {
        self.frags.clear();
        self.data_size = 0;
        self.length = 0;
        self.incomplete = true;
    }
}
