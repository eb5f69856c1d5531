use crate::{Pid, Thread, ThreadId};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_info::sched::PRIORITY_LEVELS;

/// One FIFO ready queue per priority level.
///
/// Selection always takes the highest non-empty level, so low levels can
/// starve; there is no aging.
#[derive(Debug, Default)]
pub struct RunQueues {
    levels: [VecDeque<Arc<Thread>>; PRIORITY_LEVELS],
}

impl RunQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends at the tail of the thread's own level.
    pub fn push(&mut self, thread: Arc<Thread>) {
        self.levels[thread.priority().index()].push_back(thread);
    }

    /// Head of the highest non-empty level.
    pub fn pop(&mut self) -> Option<Arc<Thread>> {
        self.levels.iter_mut().rev().find_map(VecDeque::pop_front)
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Arc<Thread>> {
        self.levels.iter_mut().find_map(|q| {
            let pos = q.iter().position(|t| t.id() == id)?;
            q.remove(pos)
        })
    }

    /// Removes every queued thread of `pid`.
    pub fn remove_process(&mut self, pid: Pid) -> Vec<Arc<Thread>> {
        let mut removed = Vec::new();
        for q in &mut self.levels {
            q.retain(|t| {
                if t.pid() == pid {
                    removed.push(Arc::clone(t));
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: ThreadId) -> bool {
        self.levels.iter().flatten().any(|t| t.id() == id)
    }

    /// Whether nothing above the idle level is ready.
    #[must_use]
    pub fn only_idle_ready(&self) -> bool {
        self.levels[1..].iter().all(VecDeque::is_empty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }
}
