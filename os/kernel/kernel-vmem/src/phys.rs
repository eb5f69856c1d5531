use crate::ArchError;
use alloc::sync::Arc;
use core::ptr::NonNull;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Source of physical frames for page-table roots.
///
/// Returned frames **must** be 4 KiB aligned. `None` means out of memory.
pub trait FrameAlloc: Send + Sync {
    fn alloc_frame(&self) -> Option<PhysicalAddress>;

    /// Returns a frame obtained from [`alloc_frame`](Self::alloc_frame).
    fn free_frame(&self, pa: PhysicalAddress);
}

impl<T: FrameAlloc + ?Sized> FrameAlloc for Arc<T> {
    #[inline]
    fn alloc_frame(&self) -> Option<PhysicalAddress> {
        (**self).alloc_frame()
    }

    #[inline]
    fn free_frame(&self, pa: PhysicalAddress) {
        (**self).free_frame(pa);
    }
}

/// Converts physical addresses to pointers usable in the kernel's address space
/// (identity map, direct map, or simulated RAM).
///
/// # Safety
/// A returned pointer must be valid for reads and writes of every byte from
/// `pa` up to the end of its 4 KiB frame for as long as the mapper is alive.
/// Callers serialize access to a frame; the mapper itself does no locking.
pub unsafe trait PhysMapper: Send + Sync {
    /// `None` if `pa` is not backed by memory the kernel can reach.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> Option<NonNull<u8>>;
}

unsafe impl<T: PhysMapper + ?Sized> PhysMapper for Arc<T> {
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> Option<NonNull<u8>> {
        (**self).phys_to_ptr(pa)
    }
}

#[inline]
fn frame_ptr<M: PhysMapper + ?Sized>(
    m: &M,
    pa: PhysicalAddress,
    len: usize,
) -> Result<NonNull<u8>, ArchError> {
    if pa.page_offset() + len as u64 > PAGE_SIZE {
        return Err(ArchError::Fault(pa));
    }
    m.phys_to_ptr(pa).ok_or(ArchError::Fault(pa))
}

/// Reads `buf.len()` bytes at `pa`; the range must stay inside one frame.
///
/// # Errors
/// [`ArchError::Fault`] if the range crosses a frame or is not reachable.
pub fn read_phys<M: PhysMapper + ?Sized>(
    m: &M,
    pa: PhysicalAddress,
    buf: &mut [u8],
) -> Result<(), ArchError> {
    let src = frame_ptr(m, pa, buf.len())?;
    // SAFETY: the mapper contract covers the rest of the frame.
    unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), buf.as_mut_ptr(), buf.len()) };
    Ok(())
}

/// Writes `bytes` at `pa`; the range must stay inside one frame.
///
/// # Errors
/// [`ArchError::Fault`] if the range crosses a frame or is not reachable.
pub fn write_phys<M: PhysMapper + ?Sized>(
    m: &M,
    pa: PhysicalAddress,
    bytes: &[u8],
) -> Result<(), ArchError> {
    let dst = frame_ptr(m, pa, bytes.len())?;
    // SAFETY: the mapper contract covers the rest of the frame.
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len()) };
    Ok(())
}

/// Fills a whole frame with zeroes.
///
/// # Errors
/// [`ArchError::Fault`] if the frame is not reachable.
pub fn zero_frame<M: PhysMapper + ?Sized>(m: &M, frame: PhysicalAddress) -> Result<(), ArchError> {
    let dst = frame_ptr(m, frame.align_down(), PAGE_SIZE as usize)?;
    // SAFETY: the mapper contract covers the whole frame.
    unsafe { core::ptr::write_bytes(dst.as_ptr(), 0, PAGE_SIZE as usize) };
    Ok(())
}

/// Copies a whole frame.
///
/// # Errors
/// [`ArchError::Fault`] if either frame is not reachable.
pub fn copy_frame<M: PhysMapper + ?Sized>(
    m: &M,
    src: PhysicalAddress,
    dst: PhysicalAddress,
) -> Result<(), ArchError> {
    if src.align_down() == dst.align_down() {
        return Ok(());
    }
    let s = frame_ptr(m, src.align_down(), PAGE_SIZE as usize)?;
    let d = frame_ptr(m, dst.align_down(), PAGE_SIZE as usize)?;
    // SAFETY: distinct frames never overlap.
    unsafe { core::ptr::copy_nonoverlapping(s.as_ptr(), d.as_ptr(), PAGE_SIZE as usize) };
    Ok(())
}
