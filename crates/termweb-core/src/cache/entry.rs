//! A cached response and its metadata.

use std::rc::Rc;
use std::time::Instant;

use super::fragment::Fragment;
use super::mode::CacheMode;
use super::store::FragmentStore;
use crate::arena::Id;
use crate::uri::Uri;

pub type EntryId = Id<CacheEntry>;

#[derive(Debug)]
pub struct CacheEntry {
    pub(super) uri: Uri,
    pub(super) proxy_uri: Uri,
    pub(super) redirect: Option<Uri>,
    pub(super) redirect_get: bool,
    pub(super) store: FragmentStore,
    pub(super) valid: bool,
    pub(super) cache_id: u64,
    pub(super) refreshed_at: Instant,
    pub(super) loaders: usize,
    pin: Rc<()>,

    /// Raw response head as received by the protocol handler.
    pub head: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    /// Content encoding of the stored bytes, if any.
    pub encoding_info: Option<String>,
    /// The entry must not be served once this instant has passed.
    pub expires_at: Option<Instant>,
    /// A rendered form derived from this entry is current.
    pub preformatted: bool,
    /// Produced by a local CGI program.
    pub cgi: bool,
    pub cache_mode: CacheMode,
}

impl CacheEntry {
    pub(super) fn new(uri: Uri, proxy_uri: Uri, cache_id: u64, now: Instant) -> Self {
        Self {
            uri,
            proxy_uri,
            redirect: None,
            redirect_get: false,
            store: FragmentStore::new(),
            valid: true,
            cache_id,
            refreshed_at: now,
            loaders: 0,
            pin: Rc::new(()),
            head: None,
            content_type: None,
            last_modified: None,
            etag: None,
            encoding_info: None,
            expires_at: None,
            preformatted: false,
            cgi: false,
            cache_mode: CacheMode::Normal,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn proxy_uri(&self) -> &Uri {
        &self.proxy_uri
    }

    pub fn redirect(&self) -> Option<&Uri> {
        self.redirect.as_ref()
    }

    pub fn redirect_get(&self) -> bool {
        self.redirect_get
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    pub fn fragments(&self) -> &[Fragment] {
        self.store.fragments()
    }

    pub fn length(&self) -> u64 {
        self.store.length()
    }

    pub fn data_size(&self) -> u64 {
        self.store.data_size()
    }

    pub fn is_incomplete(&self) -> bool {
        self.store.is_incomplete()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Changes every time the stored content changes.
    pub fn cache_id(&self) -> u64 {
        self.cache_id
    }

    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn has_validator(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }

    /// Held by at least one [`EntryPin`].
    pub fn is_pinned(&self) -> bool {
        Rc::strong_count(&self.pin) > 1
    }

    /// Number of live connections writing into this entry.
    pub fn loaders(&self) -> usize {
        self.loaders
    }

    /// Pinned or referenced by a connection; such entries are never deleted.
    pub fn is_used(&self) -> bool {
        self.is_pinned() || self.loaders > 0
    }

    pub(super) fn pin(&self, id: EntryId) -> EntryPin {
        EntryPin {
            id,
            _pin: Rc::clone(&self.pin),
        }
    }
}

/// Keeps a cache entry alive while a client reads it. Dropping the guard
/// unpins the entry.
#[derive(Debug, Clone)]
pub struct EntryPin {
    id: EntryId,
    _pin: Rc<()>,
}

impl EntryPin {
    pub fn id(&self) -> EntryId {
        self.id
    }
}
