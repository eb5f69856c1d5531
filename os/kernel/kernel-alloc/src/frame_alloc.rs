//! Physical page-frame allocator.
//!
//! Every frame between `memory_base` and `memory_top` has one descriptor. A
//! descriptor sits in exactly one of two index-linked lists: `free`, or `used`
//! (allocated or reserved). Allocation pops the front of the free list; freeing
//! unlinks from the used list and pushes onto the free list. Both are O(1).

use alloc::vec::Vec;
use kernel_info::errno::Errno;
use kernel_info::memory::{DEFAULT_RAM_SIZE, KERNEL_IMAGE_SIZE, PHYS_LOAD};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_sync::IrqLock;
use kernel_vmem::FrameAlloc;
use log::{debug, info, trace, warn};

/// Reserved physical range `[start, end)` that must never be handed out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryArea {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub label: &'static str,
}

impl MemoryArea {
    #[must_use]
    pub const fn new(start: u64, end: u64, label: &'static str) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
            label,
        }
    }

    /// Whether any byte of the frame at `frame` lies inside this area.
    #[must_use]
    pub const fn overlaps_frame(&self, frame: PhysicalAddress) -> bool {
        frame.as_u64() < self.end.as_u64()
            && self.start.as_u64() < frame.as_u64().saturating_add(PAGE_SIZE)
    }
}

/// Physical memory as reported at boot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PhysicalLayout {
    pub ram_start: PhysicalAddress,
    pub ram_size: u64,
    pub reserved: Vec<MemoryArea>,
}

impl PhysicalLayout {
    /// RAM without any reserved areas.
    #[must_use]
    pub const fn new(ram_start: PhysicalAddress, ram_size: u64) -> Self {
        Self {
            ram_start,
            ram_size,
            reserved: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reserved(mut self, area: MemoryArea) -> Self {
        self.reserved.push(area);
        self
    }
}

impl Default for PhysicalLayout {
    /// [`DEFAULT_RAM_SIZE`] bytes at zero, with the null page and the kernel
    /// image reserved.
    fn default() -> Self {
        Self::new(PhysicalAddress::zero(), DEFAULT_RAM_SIZE)
            .with_reserved(MemoryArea::new(0, PAGE_SIZE, "null page"))
            .with_reserved(MemoryArea::new(
                PHYS_LOAD,
                PHYS_LOAD + KERNEL_IMAGE_SIZE,
                "kernel image",
            ))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{0} is not frame aligned")]
    Misaligned(PhysicalAddress),
    #[error("{0} is outside managed memory")]
    OutOfRange(PhysicalAddress),
    #[error("frame {0} is not allocated")]
    NotAllocated(PhysicalAddress),
    #[error("frame {0} is reserved")]
    Reserved(PhysicalAddress),
}

impl FrameError {
    #[must_use]
    pub const fn errno(self) -> Errno {
        match self {
            Self::Reserved(_) => Errno::EBUSY,
            Self::Misaligned(_) | Self::OutOfRange(_) | Self::NotAllocated(_) => Errno::EINVAL,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameState {
    Free,
    Allocated,
    /// Kernel image, declared reserved areas. Never freed.
    Reserved,
}

#[derive(Debug, Copy, Clone)]
struct FrameDescriptor {
    state: FrameState,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Head/tail of one index-linked list through the descriptor table.
#[derive(Debug, Default, Copy, Clone)]
struct FrameList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl FrameList {
    fn push_front(&mut self, frames: &mut [FrameDescriptor], i: u32) {
        frames[i as usize].prev = None;
        frames[i as usize].next = self.head;
        match self.head {
            Some(h) => frames[h as usize].prev = Some(i),
            None => self.tail = Some(i),
        }
        self.head = Some(i);
        self.len += 1;
    }

    fn push_back(&mut self, frames: &mut [FrameDescriptor], i: u32) {
        frames[i as usize].next = None;
        frames[i as usize].prev = self.tail;
        match self.tail {
            Some(t) => frames[t as usize].next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        self.len += 1;
    }

    fn unlink(&mut self, frames: &mut [FrameDescriptor], i: u32) {
        let FrameDescriptor { prev, next, .. } = frames[i as usize];
        match prev {
            Some(p) => frames[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => frames[n as usize].prev = prev,
            None => self.tail = prev,
        }
        frames[i as usize].prev = None;
        frames[i as usize].next = None;
        self.len -= 1;
    }

    fn pop_front(&mut self, frames: &mut [FrameDescriptor]) -> Option<u32> {
        let head = self.head?;
        self.unlink(frames, head);
        Some(head)
    }
}

#[derive(Debug)]
struct FrameTable {
    /// Physical address of descriptor 0 (`memory_base`).
    base: u64,
    frames: Vec<FrameDescriptor>,
    free: FrameList,
    used: FrameList,
    reserved: usize,
}

impl FrameTable {
    fn build(layout: &PhysicalLayout) -> Self {
        let base = layout.ram_start.align_up().map_or(u64::MAX, PhysicalAddress::as_u64);
        let top = layout
            .ram_start
            .checked_add(layout.ram_size)
            .map_or(u64::MAX, PhysicalAddress::as_u64)
            & !(PAGE_SIZE - 1);

        // Descriptors are indexed with u32.
        let count = u32::try_from(top.saturating_sub(base) / PAGE_SIZE).unwrap_or(u32::MAX);

        let mut table = Self {
            base,
            frames: Vec::with_capacity(count as usize),
            free: FrameList::default(),
            used: FrameList::default(),
            reserved: 0,
        };

        for index in 0..count {
            let pa = PhysicalAddress::new(base + u64::from(index) * PAGE_SIZE);
            let reserved = layout.reserved.iter().any(|a| a.overlaps_frame(pa));
            let state = if reserved {
                FrameState::Reserved
            } else {
                FrameState::Free
            };
            table.frames.push(FrameDescriptor {
                state,
                prev: None,
                next: None,
            });

            if reserved {
                table.reserved += 1;
                table.used.push_back(&mut table.frames, index);
            } else {
                table.free.push_back(&mut table.frames, index);
            }
        }

        table
    }

    fn index_of(&self, pa: PhysicalAddress) -> Result<u32, FrameError> {
        if !pa.is_page_aligned() {
            return Err(FrameError::Misaligned(pa));
        }
        let rel = pa
            .as_u64()
            .checked_sub(self.base)
            .ok_or(FrameError::OutOfRange(pa))?;
        u32::try_from(rel / PAGE_SIZE)
            .ok()
            .filter(|&index| (index as usize) < self.frames.len())
            .ok_or(FrameError::OutOfRange(pa))
    }

    const fn address_of(&self, index: u32) -> PhysicalAddress {
        PhysicalAddress::new(self.base + index as u64 * PAGE_SIZE)
    }

    fn alloc(&mut self) -> Option<PhysicalAddress> {
        let index = self.free.pop_front(&mut self.frames)?;
        self.frames[index as usize].state = FrameState::Allocated;
        self.used.push_front(&mut self.frames, index);
        Some(self.address_of(index))
    }

    fn free(&mut self, pa: PhysicalAddress) -> Result<(), FrameError> {
        let index = self.index_of(pa)?;
        match self.frames[index as usize].state {
            FrameState::Free => return Err(FrameError::NotAllocated(pa)),
            FrameState::Reserved => return Err(FrameError::Reserved(pa)),
            FrameState::Allocated => {}
        }
        self.used.unlink(&mut self.frames, index);
        self.frames[index as usize].state = FrameState::Free;
        self.free.push_front(&mut self.frames, index);
        Ok(())
    }
}

/// Physical frame allocator, shared as `Arc<FrameAllocator>` by everything that
/// owns frames.
#[derive(Debug)]
pub struct FrameAllocator {
    table: IrqLock<FrameTable>,
}

impl FrameAllocator {
    /// Builds the frame table for `layout`. Runs once at boot.
    #[must_use]
    pub fn new(layout: &PhysicalLayout) -> Self {
        for area in &layout.reserved {
            debug!(
                "frame allocator: reserving {} {}..{}",
                area.label, area.start, area.end
            );
        }

        let table = FrameTable::build(layout);
        info!(
            "frame allocator: {} frames at 0x{:X}, {} free, {} reserved",
            table.frames.len(),
            table.base,
            table.free.len,
            table.reserved
        );

        Self {
            table: IrqLock::new(table),
        }
    }

    /// Takes one frame off the free list. `None` when memory is exhausted.
    pub fn alloc(&self) -> Option<PhysicalAddress> {
        let frame = self.table.with_lock(FrameTable::alloc);
        match frame {
            Some(pa) => trace!("frame allocator: alloc {pa}"),
            None => warn!("frame allocator: out of frames"),
        }
        frame
    }

    /// Returns an allocated frame.
    ///
    /// # Errors
    /// Rejects unaligned or unmanaged addresses, frames that are already free
    /// (double free) and reserved frames. The lists are left untouched.
    pub fn free(&self, pa: PhysicalAddress) -> Result<(), FrameError> {
        self.table.with_lock(|t| t.free(pa)).inspect_err(|e| {
            warn!("frame allocator: rejected free: {e}");
        })?;
        trace!("frame allocator: free {pa}");
        Ok(())
    }

    /// Number of managed frames; constant after construction.
    pub fn total(&self) -> usize {
        self.table.with_lock(|t| t.frames.len())
    }

    pub fn free_count(&self) -> usize {
        self.table.with_lock(|t| t.free.len)
    }

    /// Allocated plus reserved frames.
    pub fn used_count(&self) -> usize {
        self.table.with_lock(|t| t.used.len)
    }

    pub fn reserved_count(&self) -> usize {
        self.table.with_lock(|t| t.reserved)
    }

    /// State of the frame at `pa`, `None` for unmanaged or unaligned addresses.
    pub fn state(&self, pa: PhysicalAddress) -> Option<FrameState> {
        self.table
            .with_lock(|t| t.index_of(pa).ok().map(|i| t.frames[i as usize].state))
    }

    pub fn is_free(&self, pa: PhysicalAddress) -> bool {
        self.state(pa) == Some(FrameState::Free)
    }
}

impl FrameAlloc for FrameAllocator {
    fn alloc_frame(&self) -> Option<PhysicalAddress> {
        self.alloc()
    }

    fn free_frame(&self, pa: PhysicalAddress) {
        // rejection is already logged
        let _ = self.free(pa);
    }
}
