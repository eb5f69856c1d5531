//! Threads sleeping until a tick deadline.

use crate::Thread;
use alloc::collections::BinaryHeap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Ordering;

struct Sleeper {
    wake_at: u64,
    seq: u64,
    thread: Arc<Thread>,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for Sleeper {}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest deadline must surface.
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct SleepQueue {
    heap: BinaryHeap<Sleeper>,
    seq: u64,
}

impl SleepQueue {
    pub fn push(&mut self, wake_at: u64, thread: Arc<Thread>) {
        self.seq += 1;
        self.heap.push(Sleeper {
            wake_at,
            seq: self.seq,
            thread,
        });
    }

    /// Removes every thread whose deadline is at or before `now`, earliest first.
    pub fn expire(&mut self, now: u64) -> Vec<Arc<Thread>> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|s| s.wake_at <= now) {
            if let Some(s) = self.heap.pop() {
                due.push(s.thread);
            }
        }
        due
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Thread) -> bool) {
        self.heap.retain(|s| keep(&s.thread));
    }
}

impl core::fmt::Debug for SleepQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SleepQueue")
            .field("sleepers", &self.heap.len())
            .finish()
    }
}
