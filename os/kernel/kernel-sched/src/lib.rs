//! # Kernel Scheduler
//!
//! Threads, processes and the uniprocessor priority scheduler.
//!
//! * [`Scheduler`] keeps five FIFO run queues ([`RunQueues`]) and always runs
//!   the head of the highest non-empty one. A timer tick
//!   ([`Scheduler::time_tick`] then [`Scheduler::schedule`]) preempts the
//!   running thread once its per-level quantum is used up, unless it is a user
//!   thread executing in kernel mode.
//! * Blocking goes through [`WaitQueue`]s and the sleep timer; a thread that
//!   exits becomes `Dead` and is destroyed by [`Scheduler::reap`] once nothing
//!   references it.
//! * [`context_switch`] activates the incoming thread's address space before
//!   its registers are loaded into the trap frame.
//!
//! All state is meant to live behind one interrupt-masking lock; there is no
//! internal locking beyond the per-thread [`IrqLock`](kernel_sync::IrqLock).

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod context;
mod error;
mod process;
mod run_queue;
mod scheduler;
pub mod signal;
mod sleep;
mod thread;
mod wait_queue;

pub use context::{AddressSpaceSwitch, context_switch};
pub use error::SchedError;
pub use process::{Pid, Process, ProcessTable};
pub use run_queue::RunQueues;
pub use scheduler::{Reaped, Scheduler, SchedulerConfig};
pub use signal::{Delivery, Disposition, Signal, SignalSet};
pub use thread::{CpuContext, Priority, Ring, Thread, ThreadId, ThreadKind, ThreadState};
pub use wait_queue::WaitQueue;
