//! Connections ordered by priority, FIFO within a class.

use crate::arena::Arena;

use super::connection::{ConnId, Connection};
use super::priority::Priority;

#[derive(Debug, Default)]
pub(crate) struct ConnQueue {
    ids: Vec<ConnId>,
}

fn priority_of(conns: &Arena<Connection>, id: ConnId) -> Priority {
    conns.get(id).map_or(Priority::Cancel, Connection::priority)
}

impl ConnQueue {
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn as_slice(&self) -> &[ConnId] {
        &self.ids
    }

    pub(crate) fn snapshot(&self) -> Vec<ConnId> {
        self.ids.clone()
    }

    /// Insert behind every connection of the same or more urgent priority.
    pub(crate) fn enqueue(&mut self, id: ConnId, conns: &Arena<Connection>) {
        let pri = priority_of(conns, id);
        let pos = self
            .ids
            .iter()
            .position(|&c| priority_of(conns, c) > pri)
            .unwrap_or(self.ids.len());
        self.ids.insert(pos, id);
    }

    pub(crate) fn remove(&mut self, id: ConnId) -> bool {
        match self.ids.iter().position(|&c| c == id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move `id` to its place after its priority changed.
    pub(crate) fn requeue(&mut self, id: ConnId, conns: &Arena<Connection>) {
        if self.remove(id) {
            self.enqueue(id, conns);
        }
    }

    /// Restore ordering after priorities changed; stable, so FIFO order
    /// within a class is kept.
    pub(crate) fn sort(&mut self, conns: &Arena<Connection>) {
        self.ids.sort_by_key(|&c| priority_of(conns, c));
    }

    pub(crate) fn is_sorted(&self, conns: &Arena<Connection>) -> bool {
        self.ids
            .windows(2)
            .all(|w| priority_of(conns, w[0]) <= priority_of(conns, w[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMode;
    use crate::scheduler::priority::PriorityCounts;
    use crate::uri::Uri;

    fn add(conns: &mut Arena<Connection>, pri: Priority) -> ConnId {
        let u = Uri::parse("http://example.com/").unwrap();
        let conn = Connection::new(
            u.clone(),
            u,
            None,
            0,
            CacheMode::Normal,
            PriorityCounts::single(pri),
        )
        .unwrap();
        conns.insert(conn)
    }

    #[test]
    fn enqueue_is_fifo_within_priority() {
        let mut conns = Arena::new();
        let mut q = ConnQueue::default();
        let img1 = add(&mut conns, Priority::Img);
        let main = add(&mut conns, Priority::Main);
        let img2 = add(&mut conns, Priority::Img);
        let css = add(&mut conns, Priority::Css);
        for id in [img1, main, img2, css] {
            q.enqueue(id, &conns);
        }
        assert_eq!(q.as_slice(), &[main, css, img1, img2]);
        assert!(q.is_sorted(&conns));
    }

    #[test]
    fn sort_after_priority_change() {
        let mut conns = Arena::new();
        let mut q = ConnQueue::default();
        let a = add(&mut conns, Priority::Main);
        let b = add(&mut conns, Priority::Img);
        q.enqueue(a, &conns);
        q.enqueue(b, &conns);

        let conn = conns.get_mut(a).unwrap();
        conn.counts.remove(Priority::Main);
        conn.counts.add(Priority::Cancel);
        assert!(!q.is_sorted(&conns));
        q.sort(&conns);
        assert_eq!(q.as_slice(), &[b, a]);

        conns.get_mut(a).unwrap().counts.add(Priority::Frame);
        q.requeue(a, &conns);
        assert_eq!(q.as_slice(), &[a, b]);
        assert!(q.remove(a));
        assert!(!q.remove(a));
        assert_eq!(q.len(), 1);
    }
}
