//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses used by the frame
//! allocator, the address-space manager and the architecture backends.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw address, either physical or virtual. |
//! | [`PhysicalAddress`] | A physical address (RAM frame or MMIO). |
//! | [`VirtualAddress`] | An address translated by the page tables. |
//! | [`VirtualRange`] | A half-open `[start, start + size)` virtual range. |
//!
//! The kernel only ever maps 4 KiB pages, so page helpers are fixed to
//! [`PAGE_SIZE`] rather than being generic over a page-size marker.
//!
//! All arithmetic that can leave the address space is offered in a `checked_`
//! flavor returning `None` on wraparound; callers turn that into an
//! `Overflow` error instead of silently producing a bogus address.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! assert_eq!(va.align_down().as_u64(), 0x4000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//! assert!(!va.is_page_aligned());
//!
//! let range = VirtualRange::new(VirtualAddress::new(0x4000_0000), 2 * PAGE_SIZE).unwrap();
//! assert!(range.contains(va));
//! assert_eq!(range.pages(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod physical_address;
mod range;
mod virtual_address;

pub use crate::memory_address::MemoryAddress;
pub use crate::physical_address::PhysicalAddress;
pub use crate::range::VirtualRange;
pub use crate::virtual_address::VirtualAddress;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Number of pages needed to hold `bytes`, rounding up.
///
/// Returns `None` if rounding up overflows.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> Option<u64> {
    match bytes.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v >> PAGE_SHIFT),
        None => None,
    }
}
