//! Memory-bounded eviction of unused cache entries.

use super::entry::EntryId;
use super::table::CacheTable;

/// What a collection pass freed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GcReport {
    pub freed_bytes: u64,
    pub freed_entries: usize,
}

impl CacheTable {
    /// Evict unused entries, least recently used first.
    ///
    /// A bounded pass (`force_all == false`) does nothing until unused data
    /// exceeds `memory_size`, then frees down to the `gc_percent` low-water
    /// mark. Once enough is marked, newer marked entries that still fit under
    /// the mark are spared again, so one big old entry goes before many small
    /// recent ones. `force_all` evicts every unused entry.
    pub fn collect(&mut self, force_all: bool) -> GcReport {
        let ceiling = self.cfg.memory_size;
        let target = self.cfg.gc_target();

        if !force_all && self.size <= ceiling {
            return GcReport::default();
        }

        let mut actual = 0u64;
        let mut reclaimable = 0u64;
        for (_, entry) in self.entries.iter() {
            actual += entry.data_size();
            if !entry.is_used() {
                reclaimable += entry.data_size();
            }
        }
        if actual != self.size {
            tracing::error!(
                counted = actual,
                stored = self.size,
                "cache size out of sync, repairing"
            );
            self.size = actual;
        }

        if !force_all && reclaimable <= ceiling {
            return GcReport::default();
        }

        // Oldest first; stop once the low-water mark is reached.
        let mut marked: Vec<(EntryId, u64)> = Vec::new();
        for &id in &self.lru {
            if !force_all && reclaimable <= target {
                break;
            }
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            if entry.is_used() {
                continue;
            }
            let size = entry.data_size();
            reclaimable -= size;
            marked.push((id, size));
        }

        if marked.is_empty() {
            return GcReport::default();
        }

        let mut spared = vec![false; marked.len()];
        if !force_all {
            for (i, &(_, size)) in marked.iter().enumerate().rev() {
                if reclaimable + size > target {
                    continue;
                }
                reclaimable += size;
                spared[i] = true;
            }
        }

        let mut report = GcReport::default();
        for (&(id, _), spared) in marked.iter().zip(spared) {
            if spared {
                continue;
            }
            report.freed_bytes += self.remove_unchecked(id);
            report.freed_entries += 1;
        }

        tracing::debug!(
            force_all,
            freed_bytes = report.freed_bytes,
            freed_entries = report.freed_entries,
            remaining = self.size,
            "cache garbage collected"
        );
        report
    }
}
