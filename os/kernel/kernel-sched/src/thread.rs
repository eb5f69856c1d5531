use crate::Pid;
use crate::error::SchedError;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use core::fmt;
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_info::sched::{DEFAULT_PRIORITY, IDLE_PRIORITY, MAX_PRIORITY};
use kernel_sync::IrqLock;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// One of the fixed scheduling levels; higher runs first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const IDLE: Self = Self(IDLE_PRIORITY);
    pub const DEFAULT: Self = Self(DEFAULT_PRIORITY);
    pub const MAX: Self = Self(MAX_PRIORITY);

    /// # Errors
    /// [`SchedError::InvalidPriority`] above [`MAX_PRIORITY`].
    pub const fn new(level: u8) -> Result<Self, SchedError> {
        if level > MAX_PRIORITY {
            return Err(SchedError::InvalidPriority(level));
        }
        Ok(Self(level))
    }

    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Lifecycle of a thread.
///
/// ```text
/// Ready -> Running -> Ready        (preempted, yielded)
///                  -> Blocked      (wait queue)  -> Ready
///                  -> Sleeping     (timer)       -> Ready
///                  -> Dead         (terminal, handed to the reaper)
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Dead,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadKind {
    /// Runs kernel code only; preemptible anywhere.
    Kernel,
    /// Runs user code; not preemptible while trapped into the kernel.
    User,
}

/// Privilege level the saved context was executing at.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum Ring {
    #[default]
    Ring0 = 0,
    Ring3 = 3,
}

/// Register file saved on trap entry and restored on trap return.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct CpuContext {
    pub pc: u64,
    pub sp: u64,
    /// Argument / scratch registers; `args[0]` carries the first argument.
    pub args: [u64; 6],
    pub flags: u64,
    pub ring: Ring,
}

impl CpuContext {
    /// Entry context for a kernel thread.
    #[must_use]
    pub const fn kernel(pc: u64, sp: u64) -> Self {
        Self {
            pc,
            sp,
            args: [0; 6],
            flags: 0,
            ring: Ring::Ring0,
        }
    }

    /// Entry context for a user thread.
    #[must_use]
    pub const fn user(pc: u64, sp: u64) -> Self {
        Self {
            pc,
            sp,
            args: [0; 6],
            flags: 0,
            ring: Ring::Ring3,
        }
    }
}

#[derive(Debug)]
struct ThreadInner {
    state: ThreadState,
    context: CpuContext,
    ticks_left: u32,
}

/// A schedulable thread.
///
/// Shared as `Arc<Thread>`: run queues, wait queues, the sleep queue, the
/// current-thread slot and the reaper each hold one strong reference, the owning
/// process only a weak one. Mutable state sits behind an [`IrqLock`].
pub struct Thread {
    id: ThreadId,
    pid: Pid,
    name: String,
    priority: Priority,
    kind: ThreadKind,
    kernel_stack: Box<[u8]>,
    inner: IrqLock<ThreadInner>,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        pid: Pid,
        name: impl Into<String>,
        priority: Priority,
        kind: ThreadKind,
        context: CpuContext,
    ) -> Self {
        Self {
            id,
            pid,
            name: name.into(),
            priority,
            kind,
            kernel_stack: vec![0; KERNEL_STACK_SIZE].into_boxed_slice(),
            inner: IrqLock::new(ThreadInner {
                state: ThreadState::Ready,
                context,
                ticks_left: 0,
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    /// The owning process.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub const fn kind(&self) -> ThreadKind {
        self.kind
    }

    /// Address one past the end of the kernel stack.
    #[must_use]
    pub fn kernel_stack_top(&self) -> u64 {
        self.kernel_stack.as_ptr_range().end.addr() as u64
    }

    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.inner.lock().state = state;
    }

    /// The saved register file.
    #[must_use]
    pub fn context(&self) -> CpuContext {
        self.inner.lock().context
    }

    pub fn set_context(&self, context: CpuContext) {
        self.inner.lock().context = context;
    }

    #[must_use]
    pub fn ticks_left(&self) -> u32 {
        self.inner.lock().ticks_left
    }

    /// Marks the thread running with a fresh quantum.
    pub(crate) fn start_quantum(&self, ticks: u32) {
        let mut inner = self.inner.lock();
        inner.state = ThreadState::Running;
        inner.ticks_left = ticks;
    }

    pub(crate) fn consume_tick(&self) {
        let mut inner = self.inner.lock();
        inner.ticks_left = inner.ticks_left.saturating_sub(1);
    }

    /// Whether a timer tick may switch away from this thread while it executes
    /// `frame`: kernel threads always, user threads only in user mode.
    #[must_use]
    pub fn is_preemptible(&self, frame: &CpuContext) -> bool {
        self.kind == ThreadKind::Kernel || frame.ring == Ring::Ring3
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("priority", &self.priority.level())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
