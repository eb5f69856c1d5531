//! # Kernel Configuration Constants
//!
//! Compile-time layout and policy constants shared by the memory manager, the
//! scheduler and the architecture backends. Every crate reads these values from
//! here so that the user/kernel split, the page size and the scheduler policy
//! cannot drift apart between components.
//!
//! ## Modules
//!
//! * [`memory`]: virtual address-space split and kernel stack size.
//! * [`sched`]: number of priority levels, default quanta and the tick period.
//! * [`errno`]: POSIX-style error numbers handed back to the syscall layer.
//!
//! ## Virtual Memory Layout
//!
//! The kernel uses a 3 GiB / 1 GiB split. User mappings live below
//! [`USERSPACE_END`](memory::USERSPACE_END); everything above it is kernel space
//! and is shared by every address space.
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │        Null guard page          │
//! USER_BASE   ├─────────────────────────────────┤ 0x0000_1000
//!             │          User Space             │
//!             │  (per-process, copy-on-write)   │
//! USERSPACE_END ──────────────────────────────────┤ 0xC000_0000
//!             │          Kernel Space           │
//!             │ (global, synced to every space) │
//! KERNEL_END  └─────────────────────────────────┘ 0x1_0000_0000
//! ```
//!
//! All values are `const` and checked by `const` assertions at compile time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod errno;
pub mod memory;
pub mod sched;
