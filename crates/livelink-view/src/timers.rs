//! Deadline queue driven by the engine clock

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use livelink_core::ViewId;

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Show the loading state of a view that has not joined yet
    Loader(ViewId),
    /// Retry the join of a view, unless it joined since scheduling
    Reconnect { view: ViewId, join_count: u32 },
}

impl TimerKind {
    pub fn view(&self) -> &ViewId {
        match self {
            TimerKind::Loader(view) | TimerKind::Reconnect { view, .. } => view,
        }
    }
}

/// Timers ordered by deadline
#[derive(Debug, Default)]
pub struct TimerQueue {
    next: u64,
    entries: BTreeMap<(Instant, TimerId), TimerKind>,
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) -> TimerId {
        let id = TimerId(self.next);
        self.next += 1;
        self.entries.insert((at, id), kind);
        self.deadlines.insert(id, at);
        id
    }

    /// Cancel a timer; returns false if it already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(at) => self.entries.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    /// Cancel every timer of `view`
    pub fn cancel_view(&mut self, view: &ViewId) {
        let ids: Vec<(Instant, TimerId)> = self
            .entries
            .iter()
            .filter(|(_, kind)| kind.view() == view)
            .map(|(key, _)| *key)
            .collect();
        for key in ids {
            self.entries.remove(&key);
            self.deadlines.remove(&key.1);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), kind) = entry.remove_entry();
            self.deadlines.remove(&id);
            due.push(kind);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        let a = ViewId::new("a");
        let b = ViewId::new("b");
        timers.schedule(start + Duration::from_secs(2), TimerKind::Loader(a.clone()));
        timers.schedule(start + Duration::from_secs(1), TimerKind::Loader(b.clone()));

        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(1)));
        assert!(timers.pop_due(start).is_empty());
        assert_eq!(
            timers.pop_due(start + Duration::from_secs(5)),
            vec![TimerKind::Loader(b), TimerKind::Loader(a)]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        let view = ViewId::new("a");
        let id = timers.schedule(start, TimerKind::Loader(view.clone()));
        timers.schedule(start, TimerKind::Reconnect { view: view.clone(), join_count: 1 });

        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert_eq!(timers.len(), 1);

        timers.cancel_view(&view);
        assert!(timers.is_empty());
    }
}
