//! Lifecycle states of a prefetching index iterator
//!
//! Active states are derived from the iterator's queues after each step; terminal
//! states are entered explicitly and never left.

use std::fmt;

/// Represents where an iterator is in its crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    // ===== Active States =====
    /// Shard x target pairs are queued, no page fetch has been issued yet
    Seeding,

    /// Page fetches are in flight and no record is buffered
    Prefetching,

    /// Records are buffered and being handed to the consumer
    Draining,

    // ===== Terminal States =====
    /// Work queue, in-flight set and buffer are all empty
    Exhausted,

    /// Iteration was stopped early (limit reached or owner closed)
    Cancelled,
}

impl SchedulerState {
    /// Returns true if no further records will be produced
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Cancelled)
    }

    /// Returns true if the iterator may still produce records
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks whether moving from `self` to `next` is allowed
    ///
    /// Active states move freely between each other and into either terminal
    /// state. Terminal states only "transition" to themselves.
    pub fn can_transition_to(&self, next: SchedulerState) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        true
    }

    /// Derives the active state from the iterator's queue sizes
    pub fn derive(queued: usize, in_flight: usize, buffered: usize) -> Self {
        if buffered > 0 {
            Self::Draining
        } else if in_flight > 0 {
            Self::Prefetching
        } else if queued > 0 {
            Self::Seeding
        } else {
            Self::Exhausted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seeding => "seeding",
            Self::Prefetching => "prefetching",
            Self::Draining => "draining",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
