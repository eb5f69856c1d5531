//! One address space: an ordered mapping list plus an architecture root.

use crate::{FrameError, Mapping};
use alloc::collections::BTreeMap;
use core::fmt;
use kernel_info::errno::Errno;
use kernel_memory_addresses::{VirtualAddress, VirtualRange};
use kernel_vmem::{ArchError, ArchHandle};

/// Identity of a live [`Vmm`] inside the [`MemoryManager`](crate::MemoryManager).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VmmId(u64);

impl VmmId {
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

impl fmt::Debug for VmmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vmm#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("address range at {0} is already in use")]
    AddressInUse(VirtualAddress),
    #[error("no mapping at {0}")]
    NotMapped(VirtualAddress),
    #[error("address arithmetic overflow")]
    Overflow,
    #[error("address space is busy")]
    Busy,
    #[error("unknown address space")]
    UnknownSpace,
    #[error("physical memory is not accessible")]
    Fault,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl VmmError {
    /// The error number reported to user space.
    #[must_use]
    pub const fn errno(self) -> Errno {
        match self {
            Self::OutOfMemory => Errno::ENOMEM,
            Self::InvalidArgument | Self::NotMapped(_) => Errno::EINVAL,
            Self::AddressInUse(_) => Errno::EEXIST,
            Self::Overflow => Errno::EOVERFLOW,
            Self::Busy => Errno::EBUSY,
            Self::UnknownSpace => Errno::ESRCH,
            Self::Fault => Errno::EFAULT,
            Self::Frame(e) => e.errno(),
        }
    }
}

impl From<ArchError> for VmmError {
    fn from(value: ArchError) -> Self {
        match value {
            ArchError::OutOfMemory => Self::OutOfMemory,
            ArchError::AlreadyMapped(va) => Self::AddressInUse(va),
            ArchError::NotMapped(va) => Self::NotMapped(va),
            ArchError::InvalidAddress(_) => Self::InvalidArgument,
            ArchError::UnknownSpace(_) => Self::UnknownSpace,
            ArchError::Busy(_) => Self::Busy,
            ArchError::Fault(_) => Self::Fault,
        }
    }
}

/// Whether no mapping in a non-overlapping, start-keyed list overlaps `range`.
pub(crate) fn range_is_free(mappings: &BTreeMap<VirtualAddress, Mapping>, range: &VirtualRange) -> bool {
    // Only the last mapping starting below the end can reach into the range.
    mappings
        .range(..range.end())
        .next_back()
        .is_none_or(|(_, m)| !m.range().overlaps(range))
}

/// An address space.
///
/// Mappings are keyed by start address and never overlap, so the only mapping
/// that can contain an address is the last one starting at or below it.
#[derive(Debug)]
pub struct Vmm {
    id: VmmId,
    handle: ArchHandle,
    mappings: BTreeMap<VirtualAddress, Mapping>,
    refcount: usize,
}

impl Vmm {
    pub(crate) const fn new(id: VmmId, handle: ArchHandle) -> Self {
        Self {
            id,
            handle,
            mappings: BTreeMap::new(),
            refcount: 1,
        }
    }

    #[must_use]
    pub const fn id(&self) -> VmmId {
        self.id
    }

    #[must_use]
    pub const fn handle(&self) -> ArchHandle {
        self.handle
    }

    /// Processes and threads holding this address space.
    #[must_use]
    pub const fn refcount(&self) -> usize {
        self.refcount
    }

    pub(crate) const fn inc_ref(&mut self) {
        self.refcount += 1;
    }

    /// Returns the remaining count.
    pub(crate) const fn dec_ref(&mut self) -> usize {
        self.refcount -= 1;
        self.refcount
    }

    /// The mapping whose `[start, start + size)` contains `addr`.
    #[must_use]
    pub fn find_mapping(&self, addr: VirtualAddress) -> Option<&Mapping> {
        self.mappings
            .range(..=addr)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(addr))
    }

    pub(crate) fn find_mapping_mut(&mut self, addr: VirtualAddress) -> Option<&mut Mapping> {
        self.mappings
            .range_mut(..=addr)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(addr))
    }

    /// Whether no mapping overlaps `range`.
    #[must_use]
    pub fn is_range_free(&self, range: &VirtualRange) -> bool {
        range_is_free(&self.mappings, range)
    }

    /// Mappings in ascending address order.
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    pub(crate) fn insert(&mut self, mapping: Mapping) -> Result<(), VmmError> {
        if !self.is_range_free(&mapping.range()) {
            return Err(VmmError::AddressInUse(mapping.start()));
        }
        self.mappings.insert(mapping.start(), mapping);
        Ok(())
    }

    pub(crate) fn remove(&mut self, start: VirtualAddress) -> Option<Mapping> {
        self.mappings.remove(&start)
    }

    pub(crate) fn take_mappings(&mut self) -> BTreeMap<VirtualAddress, Mapping> {
        core::mem::take(&mut self.mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameAllocator, MappingFlags, PhysicalLayout};
    use alloc::sync::Arc;
    use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
    use kernel_vmem::Protection;

    fn fixture(ranges: &[(u64, u64)]) -> (Arc<FrameAllocator>, Vmm) {
        let fa = Arc::new(FrameAllocator::new(&PhysicalLayout::new(
            PhysicalAddress::new(0x0010_0000),
            64 * PAGE_SIZE,
        )));
        let mut vmm = Vmm::new(VmmId::new(1), ArchHandle::from_raw(0x1000));
        for &(start, pages) in ranges {
            let m = Mapping::create(
                &fa,
                VirtualAddress::new(start),
                pages * PAGE_SIZE,
                Protection::WRITE,
                MappingFlags::empty(),
            )
            .unwrap();
            vmm.insert(m).unwrap();
        }
        (fa, vmm)
    }

    #[test]
    fn find_mapping_returns_the_unique_container() {
        let ranges = [(0x0040_0000, 2), (0x0040_3000, 1), (0x0080_0000, 4)];
        let (_fa, vmm) = fixture(&ranges);

        for &(start, pages) in &ranges {
            let end = start + pages * PAGE_SIZE;
            for addr in [start, start + 1, start + PAGE_SIZE / 2, end - 1] {
                let m = vmm.find_mapping(VirtualAddress::new(addr)).unwrap();
                assert_eq!(m.start().as_u64(), start, "lookup of {addr:#x}");
            }
        }

        for addr in [0, 0x003F_FFFF, 0x0040_2000, 0x0040_2FFF, 0x0040_4000, 0x0080_4000, u64::MAX] {
            assert!(vmm.find_mapping(VirtualAddress::new(addr)).is_none(), "{addr:#x}");
        }
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let (fa, mut vmm) = fixture(&[(0x0040_0000, 2)]);
        let overlapping = Mapping::create(
            &fa,
            VirtualAddress::new(0x0040_1000),
            2 * PAGE_SIZE,
            Protection::WRITE,
            MappingFlags::empty(),
        )
        .unwrap();
        assert_eq!(
            vmm.insert(overlapping),
            Err(VmmError::AddressInUse(VirtualAddress::new(0x0040_1000)))
        );
        assert_eq!(vmm.mapping_count(), 1);
    }

    #[test]
    fn range_free_checks_neighbours() {
        let (_fa, vmm) = fixture(&[(0x0040_0000, 2), (0x0040_4000, 1)]);
        let range = |s: u64, pages: u64| VirtualRange::new(VirtualAddress::new(s), pages * PAGE_SIZE).unwrap();

        assert!(vmm.is_range_free(&range(0x0040_2000, 2)));
        assert!(!vmm.is_range_free(&range(0x0040_2000, 3)));
        assert!(!vmm.is_range_free(&range(0x003F_F000, 2)));
        assert!(vmm.is_range_free(&range(0x003F_F000, 1)));
        assert!(vmm.is_range_free(&range(0x0040_5000, 16)));
    }

    #[test]
    fn errno_of_each_kind() {
        assert_eq!(VmmError::OutOfMemory.errno(), Errno::ENOMEM);
        assert_eq!(VmmError::AddressInUse(VirtualAddress::zero()).errno(), Errno::EEXIST);
        assert_eq!(VmmError::NotMapped(VirtualAddress::zero()).errno(), Errno::EINVAL);
        assert_eq!(VmmError::Overflow.errno(), Errno::EOVERFLOW);
        assert_eq!(VmmError::Busy.errno(), Errno::EBUSY);
        assert_eq!(
            VmmError::from(FrameError::Reserved(PhysicalAddress::zero())).errno(),
            Errno::EBUSY
        );
    }
}
