use crate::Protection;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Opaque identity of one architecture address space (a page-table root).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ArchHandle(u64);

impl ArchHandle {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ArchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchHandle(0x{:X})", self.0)
    }
}

/// One translation as seen by a page-table walk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageInfo {
    /// Base of the mapped physical frame.
    pub frame: PhysicalAddress,
    pub prot: Protection,
}

/// Range of kernel pages to propagate from the master kernel tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelSyncToken {
    pub start: VirtualAddress,
    pub pages: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ArchError {
    #[error("no memory for page tables")]
    OutOfMemory,
    #[error("a translation already exists at {0}")]
    AlreadyMapped(VirtualAddress),
    #[error("no translation at {0}")]
    NotMapped(VirtualAddress),
    #[error("address {0} is in the wrong half of the address space")]
    InvalidAddress(VirtualAddress),
    #[error("unknown address space {0:?}")]
    UnknownSpace(ArchHandle),
    #[error("address space {0:?} is active")]
    Busy(ArchHandle),
    #[error("physical address {0} is not accessible")]
    Fault(PhysicalAddress),
}

/// Page-table primitives of one paging scheme.
///
/// All addresses are page aligned; implementations may reject unaligned input
/// with [`ArchError::InvalidAddress`]. Kernel-page operations act on the master
/// kernel tables and the active space; user-page operations name their space.
pub trait VmmInterface: Send {
    /// Allocates a new page-table root with the current kernel half installed.
    fn create(&mut self) -> Result<ArchHandle, ArchError>;

    /// Releases a page-table root. The active root cannot be destroyed.
    fn destroy(&mut self, handle: ArchHandle) -> Result<(), ArchError>;

    /// Loads `handle` as the active root.
    fn switch_to(&mut self, handle: ArchHandle) -> Result<(), ArchError>;

    /// The active root, if any has been loaded.
    fn current(&self) -> Option<ArchHandle>;

    /// Shares every present user translation of `src` with `dst`, read-only in both.
    fn clone_current(&mut self, dst: ArchHandle, src: ArchHandle) -> Result<(), ArchError>;

    /// Copies the master kernel translations in `token` into `handle`.
    fn sync_kernel_space(
        &mut self,
        handle: ArchHandle,
        token: &KernelSyncToken,
    ) -> Result<(), ArchError>;

    fn is_userspace_address(&self, va: VirtualAddress) -> bool;

    /// Copies the page mapped at `src` in the active space into frame `dst`.
    fn copy_page(&mut self, src: VirtualAddress, dst: PhysicalAddress) -> Result<(), ArchError>;

    fn map_kernel_page(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError>;

    fn unmap_kernel_page(&mut self, va: VirtualAddress) -> Result<(), ArchError>;

    fn update_kernel_page_prot(
        &mut self,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError>;

    /// Installs a user translation, replacing any existing one at `va`.
    fn map_user_page(
        &mut self,
        handle: ArchHandle,
        pa: PhysicalAddress,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError>;

    fn unmap_user_page(&mut self, handle: ArchHandle, va: VirtualAddress) -> Result<(), ArchError>;

    fn update_user_page_prot(
        &mut self,
        handle: ArchHandle,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError>;

    /// Walks `handle`'s tables for the page containing `va`.
    fn query(&self, handle: ArchHandle, va: VirtualAddress) -> Option<PageInfo>;
}
