//! Deadline set driven by the external event loop.
//!
//! A [`TimerId`] is removed from the set before its payload is handed back by
//! [`Timers::expire`], so a fired handle is already dead: cancelling it later
//! is a no-op and it can never cancel a newer timer.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct Timers<E> {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, u64), E>,
    deadlines: HashMap<u64, Instant>,
}

impl<E> Default for Timers<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<E> Timers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, at: Instant, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.by_deadline.insert((at, id), event);
        self.deadlines.insert(id, at);
        TimerId(id)
    }

    /// Cancel a pending timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id.0) {
            Some(at) => self.by_deadline.remove(&(at, id.0)).is_some(),
            None => false,
        }
    }

    /// Cancel the timer in `slot`, if any, and clear the slot.
    pub fn kill(&mut self, slot: &mut Option<TimerId>) {
        if let Some(id) = slot.take() {
            self.cancel(id);
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id.0)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return all timers due at `now`, earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<(TimerId, E)> {
        let mut fired = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), event) = entry.remove_entry();
            self.deadlines.remove(&id);
            fired.push((TimerId(id), event));
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expire_returns_due_timers_in_order() {
        let base = Instant::now();
        let mut timers = Timers::new();
        let late = timers.install(base + Duration::from_secs(2), "late");
        let early = timers.install(base + Duration::from_secs(1), "early");

        assert!(timers.expire(base).is_empty());
        let fired = timers.expire(base + Duration::from_secs(5));
        assert_eq!(fired, vec![(early, "early"), (late, "late")]);
        assert!(timers.is_empty());
    }

    #[test]
    fn fired_timer_is_invalidated() {
        let base = Instant::now();
        let mut timers = Timers::new();
        let id = timers.install(base, ());
        let mut slot = Some(id);
        assert_eq!(timers.expire(base).len(), 1);
        assert!(!timers.is_pending(id));
        timers.kill(&mut slot);
        assert!(slot.is_none());
        assert!(!timers.cancel(id));
    }

    #[test]
    fn cancel_removes_pending_timer() {
        let base = Instant::now();
        let mut timers = Timers::new();
        let id = timers.install(base, 7);
        assert_eq!(timers.next_deadline(), Some(base));
        assert!(timers.cancel(id));
        assert!(timers.expire(base).is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
