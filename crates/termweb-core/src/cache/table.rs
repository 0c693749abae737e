//! The cache entry table: one entry per resource, LRU ordered.
//!
//! Lookups go through two maps keyed by [`Uri::cache_key`], one for the
//! target URI and one for the URI as requested through a proxy. Only valid
//! entries are mapped, so an invalidated entry can linger (pinned or still
//! loading) next to a fresh one for the same resource.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexSet;

use super::entry::{CacheEntry, EntryId, EntryPin};
use super::fragment::Fragment;
use super::mode::CacheMode;
use super::store::{FragmentStore, Growth};
use crate::arena::Arena;
use crate::config::CacheConfig;
use crate::error::{CacheError, ConnError};
use crate::uri::Uri;

#[derive(Debug)]
pub struct CacheTable {
    pub(super) entries: Arena<CacheEntry>,
    /// Recency order: front is least recently used.
    pub(super) lru: IndexSet<EntryId>,
    by_uri: HashMap<String, EntryId>,
    by_proxy_uri: HashMap<String, EntryId>,
    /// Sum of all entries' `data_size`, maintained incrementally.
    pub(super) size: u64,
    next_cache_id: u64,
    pub(super) cfg: CacheConfig,
}

impl CacheTable {
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            entries: Arena::new(),
            lru: IndexSet::new(),
            by_uri: HashMap::new(),
            by_proxy_uri: HashMap::new(),
            size: 0,
            next_cache_id: 1,
            cfg,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn get(&self, id: EntryId) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    /// Mutable access to an entry's metadata. Content changes go through the
    /// table so the size counter stays correct.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains(id)
    }

    /// Total bytes stored.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries held by at least one pin.
    pub fn used_count(&self) -> usize {
        self.entries.iter().filter(|(_, e)| e.is_pinned()).count()
    }

    /// Entries a connection is currently writing into.
    pub fn loading_count(&self) -> usize {
        self.entries.iter().filter(|(_, e)| e.loaders > 0).count()
    }

    /// Entry ids from most to least recently used.
    pub fn ids_by_recency(&self) -> Vec<EntryId> {
        self.lru.iter().rev().copied().collect()
    }

    fn next_cache_id(&mut self) -> u64 {
        let id = self.next_cache_id;
        self.next_cache_id += 1;
        id
    }

    fn touch(&mut self, id: EntryId) {
        if self.entries.contains(id) {
            self.lru.shift_remove(&id);
            self.lru.insert(id);
        }
    }

    fn unmap(&mut self, id: EntryId) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        let key = entry.uri.cache_key();
        let proxy_key = entry.proxy_uri.cache_key();
        if self.by_uri.get(&key) == Some(&id) {
            self.by_uri.remove(&key);
        }
        if self.by_proxy_uri.get(&proxy_key) == Some(&id) {
            self.by_proxy_uri.remove(&proxy_key);
        }
    }

    /// Look up the valid entry for `uri` and mark it most recently used.
    /// Proxy URIs are matched against the URI the entry was fetched through.
    pub fn find(&mut self, uri: &Uri) -> Option<EntryId> {
        let key = uri.cache_key();
        let id = if uri.is_proxy() {
            self.by_proxy_uri.get(&key)
        } else {
            self.by_uri.get(&key)
        }
        .copied()?;

        if !self.entries.get(id).is_some_and(|e| e.valid) {
            return None;
        }
        self.touch(id);
        Some(id)
    }

    /// Return the entry for `uri`, creating an empty incomplete one if there
    /// is none. `proxied` is the target URI when `uri` goes through a proxy
    /// (for direct requests both are the same).
    pub fn get_or_create(&mut self, uri: &Uri, proxied: &Uri, now: Instant) -> EntryId {
        if let Some(id) = self.find(uri) {
            return id;
        }

        self.collect(false);

        let cache_id = self.next_cache_id();
        let entry = CacheEntry::new(proxied.clone(), uri.clone(), cache_id, now);
        let key = entry.uri.cache_key();
        let proxy_key = entry.proxy_uri.cache_key();
        let id = self.entries.insert(entry);
        self.by_uri.insert(key, id);
        self.by_proxy_uri.insert(proxy_key, id);
        self.touch(id);

        tracing::trace!(entry = %id, uri = %proxied, "cache entry created");
        id
    }

    /// Return a complete entry for `uri` that may be used as-is under
    /// `mode`. Entries that must never be served again are deleted (unless
    /// in use); entries that are merely due for revalidation are kept.
    pub fn get_validated(&mut self, uri: &Uri, mode: CacheMode, now: Instant) -> Option<EntryId> {
        if mode > CacheMode::Normal {
            return None;
        }
        let id = self.find(uri)?;
        let entry = self.entries.get(id)?;
        if entry.is_incomplete() {
            return None;
        }

        let drop_entry = (entry.cache_mode == CacheMode::Never && mode != CacheMode::Always)
            || (entry.redirect.is_some() && !self.cfg.cache_redirects)
            || entry.has_expired(now);
        if drop_entry {
            if !entry.is_used() {
                self.delete(id);
            }
            return None;
        }

        if entry.cache_mode <= CacheMode::CheckIfModified
            && mode <= CacheMode::CheckIfModified
            && entry.has_validator()
        {
            if let Some(interval) = self.cfg.revalidation_interval_secs {
                let due = entry.refreshed_at + Duration::from_secs(interval);
                if due < now {
                    return None;
                }
            }
        }

        Some(id)
    }

    /// Follow cached redirects from `id` to the final entry. Gives up after
    /// `max_redirects` hops or when a hop is not cached.
    pub fn follow_redirects(&mut self, id: EntryId) -> Option<EntryId> {
        let mut current = id;
        let mut hops = 0usize;
        loop {
            let target = self.entries.get(current)?.redirect.clone();
            let Some(target) = target else {
                return Some(current);
            };
            hops += 1;
            if hops > self.cfg.max_redirects {
                tracing::debug!(entry = %id, hops, "redirect chain too long");
                return None;
            }
            current = self.find(&target)?;
        }
    }

    /// Record that `id` redirects to `location` and return the resolved
    /// target. The POST data of the original request is carried over unless
    /// the redirect switches to GET. `incomplete`, when given, overrides the
    /// entry's incomplete flag.
    pub fn redirect(
        &mut self,
        id: EntryId,
        location: &str,
        get: bool,
        incomplete: Option<bool>,
    ) -> Result<Uri, ConnError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(ConnError::from(CacheError::StaleEntry))?;

        // A bare "/" on a finished entry only adds the directory separator.
        let mut target = if location == "/" && incomplete == Some(false) {
            entry.uri.without_post().append(location)?
        } else {
            entry.uri.join(location)?
        };

        if let Some(post) = entry.uri.post() {
            if !entry.redirect_get && !get {
                target = target.with_post(post);
            }
        }

        tracing::debug!(
            entry = %id,
            from = %entry.uri,
            to = %target,
            post = target.has_post(),
            "redirect recorded"
        );
        entry.redirect = Some(target.clone());
        entry.redirect_get = get;
        if let Some(incomplete) = incomplete {
            entry.store.set_incomplete(incomplete);
        }
        Ok(target)
    }

    /// Run `f` on the entry's store and account for the size change.
    fn with_store<R>(&mut self, id: EntryId, f: impl FnOnce(&mut FragmentStore) -> R) -> Option<R> {
        let entry = self.entries.get_mut(id)?;
        let before = entry.store.data_size();
        let result = f(&mut entry.store);
        let after = entry.store.data_size();
        self.size = self.size.saturating_add(after).saturating_sub(before);
        Some(result)
    }

    /// Store `data` at `offset` in the entry. On allocation failure the entry
    /// is kept, marked incomplete, and the error is returned.
    pub fn add_fragment(
        &mut self,
        id: EntryId,
        offset: u64,
        data: &[u8],
    ) -> Result<Growth, CacheError> {
        let cache_id = self.next_cache_id();
        let result = self
            .with_store(id, |store| store.add(offset, data))
            .ok_or(CacheError::StaleEntry)?;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.cache_id = cache_id;
            if result.is_err() {
                entry.store.set_incomplete(true);
            }
        }
        result
    }

    /// Defragment the entry's leading bytes, see
    /// [`FragmentStore::get_cache_fragment`].
    pub fn get_cache_fragment(&mut self, id: EntryId) -> Option<&Fragment> {
        self.entries.get_mut(id)?.store.get_cache_fragment()
    }

    pub fn truncate(&mut self, id: EntryId, offset: u64, final_size: bool) {
        self.with_store(id, |store| store.truncate(offset, final_size));
    }

    pub fn free_to(&mut self, id: EntryId, offset: u64) {
        self.with_store(id, |store| store.free_to(offset));
    }

    /// Drop all stored content and validators, keeping the entry itself.
    pub fn clear_content(&mut self, id: EntryId) {
        let cache_id = self.next_cache_id();
        self.with_store(id, FragmentStore::clear);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.cache_id = cache_id;
            entry.last_modified = None;
            entry.etag = None;
        }
    }

    /// The entry finished loading with `length` bytes.
    pub fn normalize(&mut self, id: EntryId, length: u64, now: Instant) {
        self.with_store(id, |store| {
            store.truncate(length, true);
            store.set_incomplete(false);
        });
        if let Some(entry) = self.entries.get_mut(id) {
            entry.preformatted = false;
            entry.refreshed_at = now;
        }
    }

    /// Stop matching the entry in lookups. It stays alive until unused.
    pub fn invalidate(&mut self, id: EntryId) {
        self.unmap(id);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.valid = false;
        }
    }

    /// Delete the entry and its content. Refuses (returning false) while the
    /// entry is pinned or loading.
    pub fn delete(&mut self, id: EntryId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if entry.is_used() {
            tracing::error!(entry = %id, uri = %entry.uri, "refusing to delete cache entry in use");
            return false;
        }
        self.remove_unchecked(id);
        true
    }

    /// Remove an entry already known to be unused. Returns the freed bytes.
    pub(super) fn remove_unchecked(&mut self, id: EntryId) -> u64 {
        self.unmap(id);
        let Some(entry) = self.entries.remove(id) else {
            return 0;
        };
        self.lru.shift_remove(&id);
        let freed = entry.store.data_size();
        self.size = self.size.saturating_sub(freed);
        tracing::trace!(entry = %id, uri = %entry.uri, freed, "cache entry deleted");
        freed
    }

    pub fn pin(&self, id: EntryId) -> Option<EntryPin> {
        self.entries.get(id).map(|e| e.pin(id))
    }

    pub fn is_used(&self, id: EntryId) -> bool {
        self.entries.get(id).is_some_and(CacheEntry::is_used)
    }

    pub(crate) fn attach_loader(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.loaders += 1;
        }
    }

    pub(crate) fn detach_loader(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.loaders == 0 {
                tracing::error!(entry = %id, "cache entry loader count underflow");
            } else {
                entry.loaders -= 1;
            }
        }
    }
}
