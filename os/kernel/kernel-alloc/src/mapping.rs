use crate::{FrameAllocator, Region, VmmError};
use alloc::sync::Arc;
use bitflags::bitflags;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualRange, pages_for};
use kernel_vmem::Protection;

bitflags! {
    /// Behavior flags of a mapping.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct MappingFlags: u32 {
        /// Stack-like: extensions are added below the start address.
        const GROWS_DOWN = 1 << 0;
    }
}

/// One contiguous virtual range `[start, start + size)` backed by a [`Region`].
#[derive(Debug)]
pub struct Mapping {
    range: VirtualRange,
    flags: MappingFlags,
    region: Arc<Region>,
}

impl Mapping {
    /// Creates a mapping with a freshly allocated region. `size` is rounded up
    /// to whole pages.
    ///
    /// # Errors
    /// [`VmmError::InvalidArgument`] for an empty or unaligned range,
    /// [`VmmError::Overflow`] if the range wraps, [`VmmError::OutOfMemory`].
    pub fn create(
        allocator: &Arc<FrameAllocator>,
        start: VirtualAddress,
        size: u64,
        prot: Protection,
        flags: MappingFlags,
    ) -> Result<Self, VmmError> {
        let range = page_range(start, size)?;
        let pages = usize::try_from(range.pages()).map_err(|_| VmmError::Overflow)?;
        let region = Region::create(allocator, pages, prot)?;
        Ok(Self::with_region(range, flags, region))
    }

    pub(crate) fn with_region(range: VirtualRange, flags: MappingFlags, region: Arc<Region>) -> Self {
        debug_assert_eq!(region.len() as u64, range.pages());
        Self {
            range,
            flags,
            region,
        }
    }

    /// A mapping over the same range sharing `src`'s region (copy-on-write).
    #[must_use]
    pub fn copy_create(src: &Self) -> Self {
        Self {
            range: src.range,
            flags: src.flags,
            region: Arc::clone(&src.region),
        }
    }

    /// Half-open containment test.
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        self.range.contains(addr)
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.range.start()
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size()
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.range.end()
    }

    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[must_use]
    pub const fn flags(&self) -> MappingFlags {
        self.flags
    }

    #[must_use]
    pub fn prot(&self) -> Protection {
        self.region.prot()
    }

    #[must_use]
    pub const fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// `(virtual page, backing frame)` pairs in address order.
    pub fn pages(&self) -> impl Iterator<Item = (VirtualAddress, PhysicalAddress)> + '_ {
        let start = self.start().as_u64();
        self.region
            .frames()
            .iter()
            .enumerate()
            .map(move |(i, &frame)| (VirtualAddress::new(start + i as u64 * PAGE_SIZE), frame))
    }

    /// Swaps in a private region, dropping this mapping's reference to the old one.
    pub(crate) fn replace_region(&mut self, region: Arc<Region>) {
        debug_assert_eq!(region.len(), self.region.len());
        self.region = region;
    }
}

/// Validates `start` and rounds `size` up to pages.
pub(crate) fn page_range(start: VirtualAddress, size: u64) -> Result<VirtualRange, VmmError> {
    if size == 0 || !start.is_page_aligned() {
        return Err(VmmError::InvalidArgument);
    }
    let pages = pages_for(size).ok_or(VmmError::Overflow)?;
    let size = pages.checked_mul(PAGE_SIZE).ok_or(VmmError::Overflow)?;
    VirtualRange::new(start, size).ok_or(VmmError::Overflow)
}
