use crate::Thread;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// Threads blocked on one event, woken in arrival order.
///
/// Owned by whatever the threads wait for (a pipe, a child, a lock). Blocking
/// and waking go through [`Scheduler::wait`](crate::Scheduler::wait) and
/// [`Scheduler::wake_one`](crate::Scheduler::wake_one) /
/// [`Scheduler::wake_all`](crate::Scheduler::wake_all).
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: VecDeque<Arc<Thread>>,
}

impl WaitQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, thread: Arc<Thread>) {
        self.waiters.push_back(thread);
    }

    pub(crate) fn pop(&mut self) -> Option<Arc<Thread>> {
        self.waiters.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
