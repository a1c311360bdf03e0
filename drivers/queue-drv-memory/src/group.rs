//! Consumer group state: the competing consumers within one named
//! group, a round-robin cursor, and the set of job ids this group has
//! already dispatched.

use queue_api::{Handler, JobId};
use std::collections::HashSet;

#[derive(Clone)]
pub struct Consumer {
    pub handler: Handler,
    pub max_retries: u32,
}

#[derive(Default)]
pub struct ConsumerGroupState {
    pub consumers: Vec<Consumer>,
    pub cursor: usize,
    pub processed: HashSet<JobId>,
}

impl ConsumerGroupState {
    /// Picks the next consumer via round-robin and advances the
    /// cursor. Panics if called on a group with no consumers -- the
    /// dispatch sweep never calls this on such a group.
    pub fn next_consumer(&mut self) -> Consumer {
        let idx = self.cursor % self.consumers.len();

        self.cursor = self.cursor.wrapping_add(1);
        self.consumers[idx].clone()
    }
}
