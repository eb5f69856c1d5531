//! # Kernel
//!
//! The root context tying memory management and scheduling together.
//!
//! [`Kernel`] owns the frame allocator, the [`MemoryManager`] and the
//! [`Scheduler`], each behind an interrupt-masking lock, and exposes the entry
//! points the architecture layer calls into:
//!
//! * [`Kernel::timer_tick`] from the timer interrupt,
//! * [`Kernel::page_fault`] from the page-fault trap (decoded with
//!   [`interrupts::page_fault`]),
//! * process glue for the syscall layer: [`Kernel::fork`],
//!   [`Kernel::replace_address_space`], [`Kernel::exit_current`],
//!   [`Kernel::reap`], and the user-memory helpers ([`Kernel::copy_to_user`]
//!   and friends).
//!
//! Locks are always taken scheduler first, memory manager second.
//!
//! On hosted targets [`Kernel::hosted`] boots on the software MMU over
//! simulated RAM.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod error;
pub mod interrupts;
mod kernel;
mod process;
mod uaccess;

pub use config::KernelConfig;
pub use error::KernelError;
pub use kernel::Kernel;

pub use kernel_alloc::MemoryManager;
pub use kernel_sched::Scheduler;
