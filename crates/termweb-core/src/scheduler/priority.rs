//! Request urgency classes and per-connection counts of requesters.

use serde::{Deserialize, Serialize};

/// Urgency of a request, most urgent first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// The document being viewed (also used for explicit downloads).
    Main,
    Frame,
    Css,
    /// An image the layout needs before it can render.
    NeedImg,
    Img,
    Preload,
    /// Nobody waits for this any more; aborted when not yet running.
    Cancel,
}

pub const PRIORITIES: usize = 7;

impl Priority {
    /// Explicit downloads share the most urgent class.
    pub const DOWNLOAD: Priority = Priority::Main;

    pub const ALL: [Priority; PRIORITIES] = [
        Priority::Main,
        Priority::Frame,
        Priority::Css,
        Priority::NeedImg,
        Priority::Img,
        Priority::Preload,
        Priority::Cancel,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// How many requesters of each class a connection serves. The connection's
/// priority is the most urgent class with a nonzero count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityCounts([u32; PRIORITIES]);

impl PriorityCounts {
    pub fn single(pri: Priority) -> Self {
        let mut counts = Self::default();
        counts.add(pri);
        counts
    }

    pub fn get(&self, pri: Priority) -> u32 {
        self.0[pri.index()]
    }

    pub fn add(&mut self, pri: Priority) {
        self.0[pri.index()] += 1;
    }

    /// Decrement, clamping at zero.
    pub fn remove(&mut self, pri: Priority) {
        let count = &mut self.0[pri.index()];
        if *count == 0 {
            tracing::error!(?pri, "priority counter underflow");
        } else {
            *count -= 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    pub fn highest(&self) -> Option<Priority> {
        Priority::ALL.into_iter().find(|&p| self.get(p) > 0)
    }

    /// Requesters that still care about the result.
    pub fn total_below_cancel(&self) -> u32 {
        self.0[..Priority::Cancel.index()].iter().sum()
    }

    /// One bit per class with a nonzero count.
    pub fn bits(&self) -> u8 {
        Priority::ALL
            .into_iter()
            .filter(|&p| self.get(p) > 0)
            .fold(0, |bits, p| bits | (1 << p.index()))
    }
}
