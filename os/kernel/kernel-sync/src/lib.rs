//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core, so every critical section is protected by
//! masking interrupts rather than by blocking locks:
//!
//! * [`IrqGuard`] saves the interrupt state, disables interrupts and restores the
//!   previous state on drop. Guards nest.
//! * [`IrqLock`] pairs an [`IrqGuard`] with a spin flag. On one core the flag is
//!   never contended by another context while interrupts are off; it still catches
//!   re-entrant locking from an interrupt handler and keeps the type `Sync` for
//!   hosted test runs that use real threads.
//! * [`OnceSlot`] is written exactly once (logger registration and similar boot-time
//!   singletons); a second write is reported to the caller.
//!
//! On bare-metal `x86_64` the guard uses `cli`/`sti`. On every other target the
//! interrupt flag is simulated with an atomic so that the same code runs in host
//! tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_lock;
mod once_slot;

pub use irq::{IrqGuard, interrupts_enabled};
pub use irq_lock::{IrqLock, IrqLockGuard};
pub use once_slot::OnceSlot;
