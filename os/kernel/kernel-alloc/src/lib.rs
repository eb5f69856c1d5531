//! # Physical Frames and Address Spaces
//!
//! Architecture-neutral memory management on top of the
//! [`VmmInterface`](kernel_vmem::VmmInterface) boundary.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  MemoryManager                      │
//! │  • live address spaces (Vmm) and the active one     │
//! │  • kernel mappings, synced into every space         │
//! │  • page-fault fixup (copy-on-write)                 │
//! └───────────────┬───────────────────────┬─────────────┘
//!                 │                       │
//! ┌───────────────▼──────────┐  ┌─────────▼─────────────┐
//! │ Vmm → Mapping → Region   │  │ VmmInterface backend  │
//! │ ordered by start address │  │ (page tables)         │
//! └───────────────┬──────────┘  └───────────────────────┘
//!                 │
//! ┌───────────────▼─────────────────────────────────────┐
//! │               FrameAllocator                        │
//! │  • one descriptor per 4 KiB frame                   │
//! │  • O(1) alloc/free over index-linked free/used lists│
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! * A [`Region`] owns its frames and returns them to the [`FrameAllocator`] when
//!   the last `Arc<Region>` is dropped. Mappings share Regions after a fork until a
//!   write fault gives the writer a private copy.
//! * A [`Mapping`] belongs to exactly one [`Vmm`]; destroying it drops its Region
//!   reference.
//! * A [`Vmm`] is reference counted by the processes and threads using it;
//!   [`MemoryManager::vmm_unref`] is the single path that tears one down.
//!
//! ## Errors
//!
//! Fallible operations return [`VmmError`]. Multi-page operations are
//! all-or-nothing: on failure every frame and translation created so far is
//! released before the error is returned. The only panics are the unrecoverable
//! cases: a kernel mapping that cannot be propagated to every address space.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod frame_alloc;
mod manager;
mod mapping;
mod region;
mod vmm;

pub use crate::frame_alloc::{FrameAllocator, FrameError, FrameState, MemoryArea, PhysicalLayout};
pub use crate::manager::MemoryManager;
pub use crate::mapping::{Mapping, MappingFlags};
pub use crate::region::Region;
pub use crate::vmm::{Vmm, VmmError, VmmId};
