use crate::{Pid, Signal, ThreadId};
use kernel_info::errno::Errno;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedError {
    #[error("{0:?} is not on a run queue")]
    NotQueued(ThreadId),
    #[error("no thread is running")]
    NoCurrentThread,
    #[error("{0:?} is dead")]
    ThreadDead(ThreadId),
    #[error("unknown process {0:?}")]
    UnknownProcess(Pid),
    #[error("priority {0} is out of range")]
    InvalidPriority(u8),
    #[error("process {0:?} is locked")]
    ProcessLocked(Pid),
    #[error("{0:?} cannot be caught or ignored")]
    Uncatchable(Signal),
}

impl SchedError {
    /// The error number reported to user space.
    #[must_use]
    pub const fn errno(self) -> Errno {
        match self {
            Self::NotQueued(_)
            | Self::NoCurrentThread
            | Self::ThreadDead(_)
            | Self::UnknownProcess(_) => Errno::ESRCH,
            Self::InvalidPriority(_) | Self::Uncatchable(_) => Errno::EINVAL,
            Self::ProcessLocked(_) => Errno::EBUSY,
        }
    }
}
