pub mod config;
pub mod logging;

// Building blocks
pub mod arena;
pub mod clock;
pub mod error;
pub mod timer;
pub mod uri;

// Cache and connection management
pub mod cache;
pub mod engine;
pub mod host_limit;
pub mod keepalive;
pub mod scheduler;

pub use engine::{Engine, ReclaimHook};
pub use error::{CacheError, ConnError};
pub use uri::Uri;
