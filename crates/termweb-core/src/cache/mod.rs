//! In-memory fragment cache.
//!
//! Each resource is a [`CacheEntry`] holding a [`FragmentStore`] of received
//! byte ranges. The [`CacheTable`] owns all entries, keeps them in LRU order
//! and evicts unused ones when the memory budget is exceeded.

mod entry;
mod fragment;
mod gc;
mod mode;
mod store;
mod table;

pub use entry::{CacheEntry, EntryId, EntryPin};
pub use fragment::{cache_pad, Fragment, FRAGMENT_PAD};
pub use gc::GcReport;
pub use mode::CacheMode;
pub use store::{FragmentStore, Growth};
pub use table::CacheTable;
