use serde::{Deserialize, Serialize};

/// How much a request trusts the cache. Ordered from most to least trusting,
/// so policy checks compare with `<` / `>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Incremental reload of a document that is still being rendered.
    Increment,
    /// Use any cached copy, even one marked never-cache.
    Always,
    #[default]
    Normal,
    /// Revalidate with the server before use.
    CheckIfModified,
    /// Ignore the cached copy and refetch from scratch.
    ForceReload,
    /// The response must not be served from the cache.
    Never,
}
