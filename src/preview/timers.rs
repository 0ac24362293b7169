//! Cancellable deadlines keyed by what they act on and why.

use std::collections::HashMap;
use std::time::Instant;

use crate::dom::NodeId;

use super::popup::PopupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerTarget {
    Link(NodeId),
    Popup(PopupId),
    Forest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    Show,
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub target: TimerTarget,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    pub fn show_link(link: NodeId) -> Self {
        Self {
            target: TimerTarget::Link(link),
            purpose: TimerPurpose::Show,
        }
    }

    pub fn hide_popup(popup: PopupId) -> Self {
        Self {
            target: TimerTarget::Popup(popup),
            purpose: TimerPurpose::Hide,
        }
    }

    pub fn hide_forest() -> Self {
        Self {
            target: TimerTarget::Forest,
            purpose: TimerPurpose::Hide,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerQueue {
    /// Replaces any pending deadline for the same key.
    pub fn schedule(&mut self, key: TimerKey, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    /// Keeps an existing deadline; returns whether a new one was set.
    pub fn schedule_if_absent(&mut self, key: TimerKey, deadline: Instant) -> bool {
        if self.deadlines.contains_key(&key) {
            return false;
        }
        self.deadlines.insert(key, deadline);
        true
    }

    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn cancel_where(&mut self, predicate: impl Fn(&TimerKey) -> bool) {
        self.deadlines.retain(|key, _| !predicate(key));
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the earliest timer due at `now`, if any.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        let (key, _) = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(key, deadline)| (*key, *deadline))?;
        self.deadlines.remove(&key);
        Some(key)
    }
}
