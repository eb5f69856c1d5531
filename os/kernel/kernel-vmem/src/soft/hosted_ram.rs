use crate::PhysMapper;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

/// Simulated physical RAM: a contiguous run of frames starting at `base`.
///
/// Used as the [`PhysMapper`] on hosted targets and in tests. Physical address
/// `base + n * 4096` is frame `n` of the backing buffer.
pub struct HostedRam {
    base: PhysicalAddress,
    frames: Box<[Frame]>,
}

// SAFETY: frames are only reached through raw pointers whose use the memory
// manager serializes.
unsafe impl Sync for HostedRam {}
unsafe impl Send for HostedRam {}

impl HostedRam {
    /// Zero-filled RAM covering `[base, base + size)`, rounded down to whole frames.
    #[must_use]
    pub fn new(base: PhysicalAddress, size: u64) -> Self {
        let count = usize::try_from(size / PAGE_SIZE).unwrap_or(0);
        let frames: Vec<Frame> = (0..count)
            .map(|_| Frame(UnsafeCell::new([0; PAGE_SIZE as usize])))
            .collect();
        Self {
            base: base.align_down(),
            frames: frames.into_boxed_slice(),
        }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.frames.len() as u64 * PAGE_SIZE
    }
}

unsafe impl PhysMapper for HostedRam {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> Option<NonNull<u8>> {
        let rel = pa.as_u64().checked_sub(self.base.as_u64())?;
        let frame = self.frames.get(usize::try_from(rel / PAGE_SIZE).ok()?)?;
        let offset = usize::try_from(rel % PAGE_SIZE).ok()?;
        // SAFETY: offset < PAGE_SIZE keeps the pointer inside the frame.
        NonNull::new(unsafe { frame.0.get().cast::<u8>().add(offset) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_phys, write_phys};

    #[test]
    fn addresses_outside_ram_are_unreachable() {
        let ram = HostedRam::new(PhysicalAddress::new(0x10_0000), 4 * PAGE_SIZE);
        assert_eq!(ram.size(), 4 * PAGE_SIZE);
        assert!(ram.phys_to_ptr(PhysicalAddress::new(0x0F_F000)).is_none());
        assert!(ram.phys_to_ptr(PhysicalAddress::new(0x10_4000)).is_none());
        assert!(ram.phys_to_ptr(PhysicalAddress::new(0x10_3FFF)).is_some());
    }

    #[test]
    fn bytes_written_are_read_back() {
        let ram = HostedRam::new(PhysicalAddress::new(0), 2 * PAGE_SIZE);
        write_phys(&ram, PhysicalAddress::new(0x1FFE), &[0xAB, 0xCD]).unwrap();
        let mut buf = [0u8; 2];
        read_phys(&ram, PhysicalAddress::new(0x1FFE), &mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
    }

    #[test]
    fn frame_crossing_access_faults() {
        let ram = HostedRam::new(PhysicalAddress::new(0), 2 * PAGE_SIZE);
        assert!(write_phys(&ram, PhysicalAddress::new(0x0FFF), &[1, 2]).is_err());
    }
}
