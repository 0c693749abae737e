//! Connection scheduling primitives.
//!
//! Connections are queued by [`Priority`], admitted under global and
//! per-host limits, and report to their downloads through queued
//! [`DownloadEvent`]s. The admission loop itself lives in the engine.

mod budget;
mod connection;
mod download;
mod handler;
mod priority;
mod progress;
pub(crate) mod queue;
mod retry;
mod state;

pub use budget::ActiveBudget;
pub use connection::{ConnId, Connection};
pub use download::{Download, DownloadEvent, DownloadId};
pub use handler::{DirectProxy, ProtocolHandler, ProxyResolver, ProxyRoute};
pub use priority::{Priority, PriorityCounts, PRIORITIES};
pub use progress::{Progress, SAMPLE_INTERVAL, SPEED_WINDOW};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{ConnectPhase, ConnectionState};
