use crate::{FrameAllocator, VmmError};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::Protection;
use log::{error, trace};

/// The physical frames backing one mapping.
///
/// Shared as `Arc<Region>`: every mapping using the frames holds one strong
/// reference. Dropping the last reference returns every frame to the allocator.
/// The frame count is fixed at creation.
pub struct Region {
    prot: Protection,
    frames: Vec<PhysicalAddress>,
    allocator: Arc<FrameAllocator>,
}

impl Region {
    /// Allocates `nr_frames` frames, all or nothing.
    fn allocate(
        allocator: &Arc<FrameAllocator>,
        nr_frames: usize,
        prot: Protection,
    ) -> Result<Self, VmmError> {
        if nr_frames == 0 {
            return Err(VmmError::InvalidArgument);
        }

        let mut region = Self {
            prot,
            frames: Vec::with_capacity(nr_frames),
            allocator: Arc::clone(allocator),
        };
        for _ in 0..nr_frames {
            // On failure, dropping `region` frees what was taken so far.
            let frame = allocator.alloc().ok_or(VmmError::OutOfMemory)?;
            region.frames.push(frame);
        }
        Ok(region)
    }

    /// Eagerly allocates a region of `nr_frames` frames.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] (nothing stays allocated) or
    /// [`VmmError::InvalidArgument`] for an empty region.
    pub fn create(
        allocator: &Arc<FrameAllocator>,
        nr_frames: usize,
        prot: Protection,
    ) -> Result<Arc<Self>, VmmError> {
        let region = Self::allocate(allocator, nr_frames, prot)?;
        trace!("region: created with {nr_frames} frames");
        Ok(Arc::new(region))
    }

    /// Allocates a same-sized region and fills frame `i` by calling
    /// `copy(i, new_frame)`.
    ///
    /// # Errors
    /// Allocation failure or the first error returned by `copy`; the new frames
    /// are released in both cases.
    pub fn duplicate(
        &self,
        mut copy: impl FnMut(usize, PhysicalAddress) -> Result<(), VmmError>,
    ) -> Result<Arc<Self>, VmmError> {
        let region = Self::allocate(&self.allocator, self.frames.len(), self.prot)?;
        for (i, &frame) in region.frames.iter().enumerate() {
            copy(i, frame)?;
        }
        trace!("region: duplicated {} frames", region.frames.len());
        Ok(Arc::new(region))
    }

    #[must_use]
    pub const fn prot(&self) -> Protection {
        self.prot
    }

    #[must_use]
    pub fn frames(&self) -> &[PhysicalAddress] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of mappings (and other holders) sharing this region.
    #[must_use]
    pub fn refcount(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("prot", &self.prot)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        for &frame in &self.frames {
            if let Err(e) = self.allocator.free(frame) {
                error!("region: lost frame {frame}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhysicalLayout;
    use kernel_memory_addresses::PAGE_SIZE;

    fn allocator(frames: u64) -> Arc<FrameAllocator> {
        Arc::new(FrameAllocator::new(&PhysicalLayout::new(
            PhysicalAddress::new(0x0010_0000),
            frames * PAGE_SIZE,
        )))
    }

    #[test]
    fn dropping_returns_every_frame() {
        let fa = allocator(16);
        let before = fa.free_count();

        let region = Region::create(&fa, 5, Protection::WRITE).unwrap();
        assert_eq!(region.len(), 5);
        assert_eq!(fa.free_count(), before - 5);

        drop(region);
        assert_eq!(fa.free_count(), before);
    }

    #[test]
    fn partial_failure_rolls_back() {
        let fa = allocator(4);
        assert_eq!(
            Region::create(&fa, 5, Protection::WRITE).unwrap_err(),
            VmmError::OutOfMemory
        );
        assert_eq!(fa.free_count(), 4);
    }

    #[test]
    fn empty_region_is_rejected() {
        let fa = allocator(4);
        assert_eq!(
            Region::create(&fa, 0, Protection::empty()).unwrap_err(),
            VmmError::InvalidArgument
        );
    }

    #[test]
    fn frames_outlive_all_but_last_reference() {
        let fa = allocator(8);
        let region = Region::create(&fa, 2, Protection::WRITE).unwrap();
        let shared = Arc::clone(&region);
        assert_eq!(Region::refcount(&region), 2);

        drop(region);
        assert_eq!(fa.free_count(), 6);
        drop(shared);
        assert_eq!(fa.free_count(), 8);
    }

    #[test]
    fn duplicate_visits_every_frame_and_rolls_back_on_error() {
        let fa = allocator(8);
        let region = Region::create(&fa, 3, Protection::WRITE).unwrap();

        let mut visited = Vec::new();
        let copy = region
            .duplicate(|i, frame| {
                visited.push((i, frame));
                Ok(())
            })
            .unwrap();
        assert_eq!(visited.len(), 3);
        assert_eq!(copy.prot(), region.prot());
        assert!(copy.frames().iter().all(|f| !region.frames().contains(f)));
        drop(copy);

        let free = fa.free_count();
        let err = region.duplicate(|i, _| if i == 2 { Err(VmmError::OutOfMemory) } else { Ok(()) });
        assert_eq!(err.unwrap_err(), VmmError::OutOfMemory);
        assert_eq!(fa.free_count(), free);
    }
}
