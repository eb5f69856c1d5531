use crate::mapping::page_range;
use crate::vmm::range_is_free;
use crate::{FrameAllocator, Mapping, MappingFlags, Region, Vmm, VmmError, VmmId};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualRange, pages_for};
use kernel_vmem::{
    ArchHandle, FaultFlags, KernelSyncToken, PageInfo, PhysMapper, Protection, VmmInterface,
    zero_frame,
};
use log::{debug, error, info, trace, warn};

/// Owner of every address space.
///
/// Holds the single registered [`VmmInterface`] (handed over at construction,
/// so a second registration cannot happen), the list of live [`Vmm`]s, the
/// active one, and the kernel mappings that every space shares.
pub struct MemoryManager {
    frames: Arc<FrameAllocator>,
    phys: Arc<dyn PhysMapper>,
    arch: Box<dyn VmmInterface>,
    spaces: BTreeMap<VmmId, Vmm>,
    current: Option<VmmId>,
    kernel_mappings: BTreeMap<VirtualAddress, Mapping>,
    next_id: u64,
}

#[inline]
const fn page_at(base: VirtualAddress, index: usize) -> VirtualAddress {
    VirtualAddress::new(base.as_u64() + index as u64 * PAGE_SIZE)
}

fn unmap_user_pages(arch: &mut dyn VmmInterface, handle: ArchHandle, mapping: &Mapping) {
    for (va, _) in mapping.pages() {
        if let Err(e) = arch.unmap_user_page(handle, va) {
            warn!("vmm: unmap of {va} failed: {e}");
        }
    }
}

/// Points every page of a mapping starting at `base` at `frames`.
fn remap_user_pages(
    arch: &mut dyn VmmInterface,
    handle: ArchHandle,
    base: VirtualAddress,
    frames: &[PhysicalAddress],
    prot: Protection,
) -> Result<(), VmmError> {
    for (i, &frame) in frames.iter().enumerate() {
        arch.map_user_page(handle, frame, page_at(base, i), prot)?;
    }
    Ok(())
}

impl MemoryManager {
    pub fn new(
        frames: Arc<FrameAllocator>,
        phys: Arc<dyn PhysMapper>,
        arch: Box<dyn VmmInterface>,
    ) -> Self {
        Self {
            frames,
            phys,
            arch,
            spaces: BTreeMap::new(),
            current: None,
            kernel_mappings: BTreeMap::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub const fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    #[must_use]
    pub const fn phys(&self) -> &Arc<dyn PhysMapper> {
        &self.phys
    }

    /// The active address space.
    #[must_use]
    pub const fn current(&self) -> Option<VmmId> {
        self.current
    }

    #[must_use]
    pub fn vmm(&self, id: VmmId) -> Option<&Vmm> {
        self.spaces.get(&id)
    }

    /// Number of live address spaces.
    #[must_use]
    pub fn vmm_count(&self) -> usize {
        self.spaces.len()
    }

    #[must_use]
    pub fn is_userspace_address(&self, va: VirtualAddress) -> bool {
        self.arch.is_userspace_address(va)
    }

    fn current_id(&self) -> Result<VmmId, VmmError> {
        self.current.ok_or(VmmError::UnknownSpace)
    }

    fn handle_of(&self, id: VmmId) -> Result<ArchHandle, VmmError> {
        self.spaces
            .get(&id)
            .map(Vmm::handle)
            .ok_or(VmmError::UnknownSpace)
    }

    fn is_user_range(&self, range: &VirtualRange) -> bool {
        self.arch.is_userspace_address(range.start())
            && range
                .end()
                .checked_sub(1)
                .is_some_and(|last| self.arch.is_userspace_address(last))
    }

    fn is_kernel_range(&self, range: &VirtualRange) -> bool {
        !self.arch.is_userspace_address(range.start())
            && range
                .end()
                .checked_sub(1)
                .is_some_and(|last| !self.arch.is_userspace_address(last))
    }

    /// A zero-filled region of `pages` frames.
    fn new_region(&self, pages: u64, prot: Protection) -> Result<Arc<Region>, VmmError> {
        let count = usize::try_from(pages).map_err(|_| VmmError::Overflow)?;
        let region = Region::create(&self.frames, count, prot)?;
        for &frame in region.frames() {
            zero_frame(&*self.phys, frame)?;
        }
        Ok(region)
    }

    /// Creates an empty address space with the kernel half installed.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if the backend cannot allocate a root.
    pub fn create(&mut self) -> Result<VmmId, VmmError> {
        let handle = self.arch.create()?;
        self.next_id += 1;
        let id = VmmId::new(self.next_id);
        self.spaces.insert(id, Vmm::new(id, handle));
        info!("vmm: created {id:?} ({handle:?})");
        Ok(id)
    }

    /// Adds a reference to `id`.
    ///
    /// # Errors
    /// [`VmmError::UnknownSpace`].
    pub fn vmm_ref(&mut self, id: VmmId) -> Result<(), VmmError> {
        self.spaces
            .get_mut(&id)
            .ok_or(VmmError::UnknownSpace)?
            .inc_ref();
        Ok(())
    }

    /// Drops a reference to `id`. The last reference destroys every mapping,
    /// then the page-table root, then removes the space from the live list.
    ///
    /// Returns whether the space was destroyed.
    ///
    /// # Errors
    /// [`VmmError::Busy`] when the last reference to the active space is
    /// dropped (switch away first), [`VmmError::UnknownSpace`].
    pub fn vmm_unref(&mut self, id: VmmId) -> Result<bool, VmmError> {
        let vmm = self.spaces.get_mut(&id).ok_or(VmmError::UnknownSpace)?;
        if vmm.refcount() > 1 {
            vmm.dec_ref();
            return Ok(false);
        }
        if self.current == Some(id) {
            return Err(VmmError::Busy);
        }

        vmm.dec_ref();
        let handle = vmm.handle();
        for mapping in vmm.take_mappings().into_values() {
            unmap_user_pages(&mut *self.arch, handle, &mapping);
        }
        if let Err(e) = self.arch.destroy(handle) {
            warn!("vmm: destroying root of {id:?} failed: {e}");
        }
        self.spaces.remove(&id);
        info!("vmm: destroyed {id:?}");
        Ok(true)
    }

    /// Makes `id` the active address space.
    ///
    /// # Errors
    /// [`VmmError::UnknownSpace`].
    pub fn switch_to(&mut self, id: VmmId) -> Result<(), VmmError> {
        if self.current == Some(id) {
            return Ok(());
        }
        let handle = self.handle_of(id)?;
        self.arch.switch_to(handle)?;
        self.current = Some(id);
        trace!("vmm: switched to {id:?}");
        Ok(())
    }

    /// Maps `size` bytes (rounded up to pages) of fresh, zeroed kernel memory at
    /// `start` and propagates the mapping into every address space.
    ///
    /// # Errors
    /// [`VmmError::InvalidArgument`] for unaligned, user-space or `USER`
    /// requests, [`VmmError::AddressInUse`] on overlap with another kernel
    /// mapping, [`VmmError::OutOfMemory`]. Nothing stays mapped or allocated.
    ///
    /// # Panics
    /// If the mapping cannot be propagated to some address space.
    pub fn create_kernel_mapping(
        &mut self,
        start: VirtualAddress,
        size: u64,
        prot: Protection,
    ) -> Result<(), VmmError> {
        if prot.contains(Protection::USER) {
            return Err(VmmError::InvalidArgument);
        }
        let range = page_range(start, size)?;
        if !self.is_kernel_range(&range) {
            return Err(VmmError::InvalidArgument);
        }
        if !range_is_free(&self.kernel_mappings, &range) {
            return Err(VmmError::AddressInUse(start));
        }

        let region = self.new_region(range.pages(), prot)?;
        for (i, (va, &frame)) in range.page_addresses().zip(region.frames()).enumerate() {
            if let Err(e) = self.arch.map_kernel_page(frame, va, prot) {
                for va in range.page_addresses().take(i) {
                    let _ = self.arch.unmap_kernel_page(va);
                }
                return Err(e.into());
            }
        }

        self.sync_kernel_range(&range);
        self.kernel_mappings
            .insert(start, Mapping::with_region(range, MappingFlags::empty(), region));
        debug!("vmm: kernel mapping {range:?} {prot:?}");
        Ok(())
    }

    /// Removes the kernel mapping containing `addr` from every address space and
    /// frees its frames.
    ///
    /// # Errors
    /// [`VmmError::NotMapped`].
    ///
    /// # Panics
    /// If the removal cannot be propagated to some address space.
    pub fn destroy_kernel_mapping(&mut self, addr: VirtualAddress) -> Result<(), VmmError> {
        let start = self
            .kernel_mapping(addr)
            .map(Mapping::start)
            .ok_or(VmmError::NotMapped(addr))?;
        let mapping = self
            .kernel_mappings
            .remove(&start)
            .ok_or(VmmError::NotMapped(addr))?;

        for (va, _) in mapping.pages() {
            if let Err(e) = self.arch.unmap_kernel_page(va) {
                warn!("vmm: kernel unmap of {va} failed: {e}");
            }
        }
        self.sync_kernel_range(&mapping.range());
        debug!("vmm: removed kernel mapping {:?}", mapping.range());
        Ok(())
    }

    /// The kernel mapping containing `addr`.
    #[must_use]
    pub fn kernel_mapping(&self, addr: VirtualAddress) -> Option<&Mapping> {
        self.kernel_mappings
            .range(..=addr)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(addr))
    }

    /// Propagates the master kernel translations of `range` into every space
    /// other than the active one (which the backend already updated).
    fn sync_kernel_range(&mut self, range: &VirtualRange) {
        let token = KernelSyncToken {
            start: range.start(),
            pages: range.pages(),
        };
        for vmm in self.spaces.values() {
            if Some(vmm.id()) == self.current {
                continue;
            }
            if let Err(e) = self.arch.sync_kernel_space(vmm.handle(), &token) {
                error!("vmm: kernel range {range:?} cannot reach {:?}: {e}", vmm.id());
                panic!("kernel address space out of sync");
            }
        }
    }

    /// Creates a user mapping in the active address space.
    ///
    /// `size` is rounded up to whole pages; frames are allocated and zeroed
    /// eagerly. Returns the start address.
    ///
    /// # Errors
    /// [`VmmError::InvalidArgument`] for unaligned, empty, kernel-space or
    /// `NOCACHE` requests, [`VmmError::AddressInUse`],
    /// [`VmmError::OutOfMemory`], [`VmmError::UnknownSpace`] when no space is active.
    pub fn create_user_mapping(
        &mut self,
        addr: VirtualAddress,
        size: u64,
        prot: Protection,
        flags: MappingFlags,
    ) -> Result<VirtualAddress, VmmError> {
        let id = self.current_id()?;
        self.map_user(id, addr, size, prot, flags)
    }

    fn map_user(
        &mut self,
        id: VmmId,
        addr: VirtualAddress,
        size: u64,
        prot: Protection,
        flags: MappingFlags,
    ) -> Result<VirtualAddress, VmmError> {
        if prot.contains(Protection::NOCACHE) {
            return Err(VmmError::InvalidArgument);
        }
        let range = page_range(addr, size)?;
        if !self.is_user_range(&range) {
            return Err(VmmError::InvalidArgument);
        }
        let vmm = self.spaces.get(&id).ok_or(VmmError::UnknownSpace)?;
        if !vmm.is_range_free(&range) {
            return Err(VmmError::AddressInUse(addr));
        }
        let handle = vmm.handle();

        let prot = prot | Protection::USER;
        let region = self.new_region(range.pages(), prot)?;
        let mapping = Mapping::with_region(range, flags, region);
        if let Err(e) = remap_user_pages(&mut *self.arch, handle, addr, mapping.region().frames(), prot) {
            unmap_user_pages(&mut *self.arch, handle, &mapping);
            return Err(e);
        }

        self.spaces
            .get_mut(&id)
            .ok_or(VmmError::UnknownSpace)?
            .insert(mapping)?;
        debug!("vmm: {id:?} mapped {range:?} {prot:?}");
        Ok(range.start())
    }

    /// Destroys the user mapping containing `addr` in the active space.
    ///
    /// # Errors
    /// [`VmmError::NotMapped`] if no mapping contains `addr`.
    pub fn destroy_user_mapping(&mut self, addr: VirtualAddress) -> Result<(), VmmError> {
        let id = self.current_id()?;
        let vmm = self.spaces.get_mut(&id).ok_or(VmmError::UnknownSpace)?;
        let start = vmm
            .find_mapping(addr)
            .map(Mapping::start)
            .ok_or(VmmError::NotMapped(addr))?;
        let handle = vmm.handle();
        let mapping = vmm.remove(start).ok_or(VmmError::NotMapped(addr))?;

        unmap_user_pages(&mut *self.arch, handle, &mapping);
        debug!("vmm: {id:?} unmapped {:?}", mapping.range());
        Ok(())
    }

    /// Grows the mapping containing `addr` by `increment` bytes (rounded up to
    /// pages): below it for [`MappingFlags::GROWS_DOWN`], above it otherwise.
    /// The extension is a new adjacent mapping with the same protection and
    /// flags. Returns its start address.
    ///
    /// # Errors
    /// [`VmmError::NotMapped`], [`VmmError::AddressInUse`] if the adjacent range
    /// is claimed, [`VmmError::InvalidArgument`] if it leaves user space,
    /// [`VmmError::Overflow`], [`VmmError::OutOfMemory`].
    pub fn extend_user_mapping(
        &mut self,
        addr: VirtualAddress,
        increment: u64,
    ) -> Result<VirtualAddress, VmmError> {
        let id = self.current_id()?;
        let vmm = self.spaces.get(&id).ok_or(VmmError::UnknownSpace)?;
        let mapping = vmm.find_mapping(addr).ok_or(VmmError::NotMapped(addr))?;
        if increment == 0 {
            return Err(VmmError::InvalidArgument);
        }

        let bytes = pages_for(increment)
            .and_then(|p| p.checked_mul(PAGE_SIZE))
            .ok_or(VmmError::Overflow)?;
        let flags = mapping.flags();
        let prot = mapping.prot();
        let start = if flags.contains(MappingFlags::GROWS_DOWN) {
            mapping.start().checked_sub(bytes).ok_or(VmmError::Overflow)?
        } else {
            mapping.end()
        };

        self.map_user(id, start, bytes, prot, flags)
    }

    /// The mapping of the active space containing `addr`.
    #[must_use]
    pub fn find_mapping(&self, addr: VirtualAddress) -> Option<&Mapping> {
        self.current
            .and_then(|id| self.spaces.get(&id))
            .and_then(|vmm| vmm.find_mapping(addr))
    }

    /// Shares every mapping of the active space with `dest` copy-on-write: the
    /// mappings reference the same regions and the pages become read-only in
    /// both spaces.
    ///
    /// # Errors
    /// [`VmmError::InvalidArgument`] when `dest` is the active space,
    /// [`VmmError::AddressInUse`] if `dest` already has an overlapping mapping.
    pub fn clone_current(&mut self, dest: VmmId) -> Result<(), VmmError> {
        let src = self.current_id()?;
        if src == dest {
            return Err(VmmError::InvalidArgument);
        }
        let src_vmm = self.spaces.get(&src).ok_or(VmmError::UnknownSpace)?;
        let src_handle = src_vmm.handle();
        let copies: Vec<Mapping> = src_vmm.mappings().map(Mapping::copy_create).collect();

        let dst = self.spaces.get_mut(&dest).ok_or(VmmError::UnknownSpace)?;
        if let Some(m) = copies.iter().find(|m| !dst.is_range_free(&m.range())) {
            return Err(VmmError::AddressInUse(m.start()));
        }
        let dst_handle = dst.handle();
        let starts: Vec<VirtualAddress> = copies.iter().map(Mapping::start).collect();
        let shared = starts.len();
        for m in copies {
            dst.insert(m)?;
        }

        if let Err(e) = self.arch.clone_current(dst_handle, src_handle) {
            if let Some(dst) = self.spaces.get_mut(&dest) {
                for start in starts {
                    dst.remove(start);
                }
            }
            return Err(e.into());
        }
        debug!("vmm: cloned {src:?} into {dest:?} ({shared} mappings)");
        Ok(())
    }

    /// A new address space sharing the active one copy-on-write (fork).
    ///
    /// # Errors
    /// See [`create`](Self::create) and [`clone_current`](Self::clone_current).
    pub fn fork_current(&mut self) -> Result<VmmId, VmmError> {
        let child = self.create()?;
        if let Err(e) = self.clone_current(child) {
            let _ = self.vmm_unref(child);
            return Err(e);
        }
        Ok(child)
    }

    /// Resolves a page fault in the active space.
    ///
    /// A write to a present, write-protected page of a writable mapping is a
    /// copy-on-write fault: if the region is still shared, the mapping receives
    /// a private copy of every page and drops its reference to the shared
    /// region; if it is no longer shared, write access is restored in place.
    ///
    /// Returns the address to retry, or `None` when the fault cannot be resolved
    /// and the faulting thread must be signalled.
    pub fn handle_page_fault(
        &mut self,
        addr: VirtualAddress,
        flags: FaultFlags,
    ) -> Option<VirtualAddress> {
        let id = self.current?;
        let mapping = self.spaces.get(&id)?.find_mapping(addr);
        let Some(mapping) = mapping else {
            debug!("vmm: fault at {addr} outside any mapping ({flags:?})");
            return None;
        };
        if !flags.is_protection_write() || !mapping.prot().contains(Protection::WRITE) {
            debug!("vmm: unresolvable fault at {addr} ({flags:?})");
            return None;
        }

        let start = mapping.start();
        let result = if Region::refcount(mapping.region()) > 1 {
            self.break_cow(id, start)
        } else {
            self.restore_write(id, start)
        };

        match result {
            Ok(()) => Some(addr),
            Err(e) => {
                warn!("vmm: copy-on-write fault at {addr} failed: {e}");
                None
            }
        }
    }

    fn break_cow(&mut self, id: VmmId, start: VirtualAddress) -> Result<(), VmmError> {
        let Self { arch, spaces, .. } = self;
        let vmm = spaces.get_mut(&id).ok_or(VmmError::UnknownSpace)?;
        let handle = vmm.handle();
        let mapping = vmm
            .find_mapping_mut(start)
            .ok_or(VmmError::NotMapped(start))?;
        let prot = mapping.prot();

        let private = mapping
            .region()
            .duplicate(|i, dst| arch.copy_page(page_at(start, i), dst).map_err(VmmError::from))?;

        if let Err(e) = remap_user_pages(&mut **arch, handle, start, private.frames(), prot) {
            let shared = mapping.region().frames();
            let _ = remap_user_pages(&mut **arch, handle, start, shared, prot - Protection::WRITE);
            return Err(e);
        }

        mapping.replace_region(private);
        debug!("vmm: {id:?} copy-on-write break of {:?}", mapping.range());
        Ok(())
    }

    fn restore_write(&mut self, id: VmmId, start: VirtualAddress) -> Result<(), VmmError> {
        let vmm = self.spaces.get(&id).ok_or(VmmError::UnknownSpace)?;
        let handle = vmm.handle();
        let mapping = vmm.find_mapping(start).ok_or(VmmError::NotMapped(start))?;
        let prot = mapping.prot();
        for (va, _) in mapping.pages() {
            self.arch.update_user_page_prot(handle, va, prot)?;
        }
        debug!("vmm: {id:?} write access restored on {:?}", mapping.range());
        Ok(())
    }

    /// Page-table walk of `id` at `va`.
    #[must_use]
    pub fn query(&self, id: VmmId, va: VirtualAddress) -> Option<PageInfo> {
        let vmm = self.spaces.get(&id)?;
        self.arch.query(vmm.handle(), va)
    }

    /// Page-table walk of the active space at `va`.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PageInfo> {
        self.query(self.current?, va)
    }
}
