//! # Virtual Memory Architecture Boundary
//!
//! Everything the architecture-neutral memory manager needs from the hardware,
//! and nothing more:
//!
//! - [`Protection`] bits for mappings and [`FaultFlags`] describing a page fault.
//! - The [`VmmInterface`] trait: one implementation per paging scheme, registered
//!   once at boot. It creates and destroys page-table roots, installs and removes
//!   single 4 KiB translations, installs copy-on-write clones and switches the
//!   active address space. Descriptor bit layouts stay behind this trait.
//! - [`FrameAlloc`] (frames for page-table roots) and [`PhysMapper`] (access to
//!   physical memory from the kernel's own address space).
//! - A software reference backend, [`soft::SoftMmu`], with [`soft::HostedRam`] as
//!   simulated physical memory. It keeps per-space translation maps instead of
//!   hardware tables and is what host tests run against.
//!
//! ## Kernel and user halves
//!
//! ```text
//! | 0x0000_0000 .. USERSPACE_END | USERSPACE_END .. KERNEL_END |
//! |  per address space (user)    |  global (kernel)            |
//! ```
//!
//! Kernel translations are logically global. A backend installs a new kernel
//! page into the active space and keeps a master copy; the memory manager then
//! calls [`VmmInterface::sync_kernel_space`] for every other live space with a
//! [`KernelSyncToken`] naming the changed range.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

mod interface;
mod phys;
mod protection;
pub mod soft;

pub use crate::interface::{ArchError, ArchHandle, KernelSyncToken, PageInfo, VmmInterface};
pub use crate::phys::{FrameAlloc, PhysMapper, copy_frame, read_phys, write_phys, zero_frame};
pub use crate::protection::{FaultFlags, Protection};
pub use kernel_info::memory as info;
