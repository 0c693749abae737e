//! Request URIs.
//!
//! A [`Uri`] is a parsed URL plus optional POST data. Requests carrying POST
//! data are distinct cache keys and are never retried or suspended casually.
//! In string form the POST data follows the URL after a newline, which is
//! never a legal URL character.

use std::fmt;

use url::Url;

use crate::error::ConnError;

/// Separator between the URL and the POST data in the string form.
pub const POST_CHAR: char = '\n';

/// Scheme used for URIs that are fetched through a proxy
/// (`proxy://proxyhost:port/<target>`).
pub const PROXY_SCHEME: &str = "proxy";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    url: Url,
    post: Option<String>,
}

impl Uri {
    /// Parse `url[\npost-data]`.
    pub fn parse(s: &str) -> Result<Self, ConnError> {
        let (url, post) = match s.split_once(POST_CHAR) {
            Some((url, post)) => (url, Some(post.to_string())),
            None => (s, None),
        };
        let url = Url::parse(url.trim())?;
        Ok(Self { url, post })
    }

    pub fn from_url(url: Url) -> Self {
        Self { url, post: None }
    }

    pub fn with_post(mut self, post: impl Into<String>) -> Self {
        self.post = Some(post.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn post(&self) -> Option<&str> {
        self.post.as_deref()
    }

    pub fn has_post(&self) -> bool {
        self.post.is_some()
    }

    pub fn is_proxy(&self) -> bool {
        self.url.scheme() == PROXY_SCHEME
    }

    /// Schemes whose URIs are meaningless without a host part.
    pub fn requires_host(&self) -> bool {
        matches!(
            self.scheme(),
            "http" | "https" | "ftp" | "gopher" | "finger" | PROXY_SCHEME
        )
    }

    /// Key identifying the resource: the URL without its fragment, plus the
    /// POST data if any.
    pub fn cache_key(&self) -> String {
        let mut base = self.url.clone();
        base.set_fragment(None);
        match &self.post {
            Some(post) => format!("{}{}{}", base.as_str(), POST_CHAR, post),
            None => base.as_str().to_string(),
        }
    }

    pub fn without_post(&self) -> Uri {
        Uri {
            url: self.url.clone(),
            post: None,
        }
    }

    /// Resolve `location` relative to this URI. The result carries no POST data.
    pub fn join(&self, location: &str) -> Result<Uri, ConnError> {
        let url = self.url.join(location.trim())?;
        Ok(Uri::from_url(url))
    }

    /// Append `suffix` verbatim to the URL string (e.g. a trailing directory
    /// separator). The result carries no POST data.
    pub fn append(&self, suffix: &str) -> Result<Uri, ConnError> {
        let mut s = self.url.as_str().to_string();
        s.push_str(suffix);
        Ok(Uri::from_url(Url::parse(&s)?))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
