//! # Software MMU
//!
//! A reference [`VmmInterface`] that keeps translations in ordered maps instead
//! of hardware page tables. It behaves like a two-level scheme with a shared
//! kernel half:
//!
//! - Every address space owns a root frame (taken from a [`FrameAlloc`], so
//!   address spaces cost physical memory just as on hardware) and a table of
//!   4 KiB translations keyed by virtual page number.
//! - Kernel pages are written to a master table and to the active space. New
//!   spaces start with a copy of the master table; existing ones catch up
//!   through [`sync_kernel_space`](VmmInterface::sync_kernel_space).
//! - Page contents live wherever the [`PhysMapper`] says, usually [`HostedRam`].

mod entry;
mod hosted_ram;

pub use self::entry::SoftEntry;
pub use self::hosted_ram::HostedRam;

use crate::{
    ArchError, ArchHandle, FrameAlloc, KernelSyncToken, PageInfo, PhysMapper, Protection,
    VmmInterface, copy_frame, info, zero_frame,
};
use alloc::collections::BTreeMap;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use log::{debug, trace};

/// Translations of one address space, keyed by virtual page number.
type Table = BTreeMap<u64, SoftEntry>;

pub struct SoftMmu<A: FrameAlloc, M: PhysMapper> {
    frames: A,
    phys: M,
    master: Table,
    spaces: BTreeMap<ArchHandle, Table>,
    current: Option<ArchHandle>,
}

impl<A: FrameAlloc, M: PhysMapper> SoftMmu<A, M> {
    pub const fn new(frames: A, phys: M) -> Self {
        Self {
            frames,
            phys,
            master: BTreeMap::new(),
            spaces: BTreeMap::new(),
            current: None,
        }
    }

    /// Number of live address spaces.
    #[must_use]
    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    fn table(&self, handle: ArchHandle) -> Result<&Table, ArchError> {
        self.spaces.get(&handle).ok_or(ArchError::UnknownSpace(handle))
    }

    fn table_mut(&mut self, handle: ArchHandle) -> Result<&mut Table, ArchError> {
        self.spaces
            .get_mut(&handle)
            .ok_or(ArchError::UnknownSpace(handle))
    }

    fn check_user(va: VirtualAddress) -> Result<u64, ArchError> {
        if va.is_page_aligned() && info::is_user_address(va.as_u64()) {
            Ok(va.page_number())
        } else {
            Err(ArchError::InvalidAddress(va))
        }
    }

    fn check_kernel(va: VirtualAddress) -> Result<u64, ArchError> {
        if va.is_page_aligned() && info::is_kernel_address(va.as_u64()) {
            Ok(va.page_number())
        } else {
            Err(ArchError::InvalidAddress(va))
        }
    }

    fn insert(table: &mut Table, vpn: u64, va: VirtualAddress, entry: SoftEntry) -> Result<(), ArchError> {
        if table.get(&vpn).is_some_and(|e| e.present()) {
            return Err(ArchError::AlreadyMapped(va));
        }
        table.insert(vpn, entry);
        Ok(())
    }
}

impl<A: FrameAlloc, M: PhysMapper> VmmInterface for SoftMmu<A, M> {
    fn create(&mut self) -> Result<ArchHandle, ArchError> {
        let root = self.frames.alloc_frame().ok_or(ArchError::OutOfMemory)?;
        if let Err(e) = zero_frame(&self.phys, root) {
            self.frames.free_frame(root);
            return Err(e);
        }

        let handle = ArchHandle::from_raw(root.as_u64());
        self.spaces.insert(handle, self.master.clone());
        debug!("soft-mmu: created space {handle:?}");
        Ok(handle)
    }

    fn destroy(&mut self, handle: ArchHandle) -> Result<(), ArchError> {
        if self.current == Some(handle) {
            return Err(ArchError::Busy(handle));
        }
        self.spaces
            .remove(&handle)
            .ok_or(ArchError::UnknownSpace(handle))?;
        self.frames
            .free_frame(PhysicalAddress::new(handle.as_raw()));
        debug!("soft-mmu: destroyed space {handle:?}");
        Ok(())
    }

    fn switch_to(&mut self, handle: ArchHandle) -> Result<(), ArchError> {
        self.table(handle)?;
        self.current = Some(handle);
        trace!("soft-mmu: active space {handle:?}");
        Ok(())
    }

    fn current(&self) -> Option<ArchHandle> {
        self.current
    }

    fn clone_current(&mut self, dst: ArchHandle, src: ArchHandle) -> Result<(), ArchError> {
        self.table(dst)?;
        let src_table = self.table_mut(src)?;

        let mut shared = Table::new();
        for (vpn, entry) in src_table.iter_mut() {
            if entry.present() && entry.user() {
                *entry = entry.with_writable(false);
                shared.insert(*vpn, *entry);
            }
        }

        let count = shared.len();
        self.table_mut(dst)?.extend(shared);
        debug!("soft-mmu: {count} pages shared copy-on-write {src:?} -> {dst:?}");
        Ok(())
    }

    fn sync_kernel_space(
        &mut self,
        handle: ArchHandle,
        token: &KernelSyncToken,
    ) -> Result<(), ArchError> {
        let first = token.start.page_number();
        let table = self
            .spaces
            .get_mut(&handle)
            .ok_or(ArchError::UnknownSpace(handle))?;

        for vpn in first..first + token.pages {
            match self.master.get(&vpn) {
                Some(entry) => {
                    table.insert(vpn, *entry);
                }
                None => {
                    table.remove(&vpn);
                }
            }
        }
        Ok(())
    }

    fn is_userspace_address(&self, va: VirtualAddress) -> bool {
        info::is_user_address(va.as_u64())
    }

    fn copy_page(&mut self, src: VirtualAddress, dst: PhysicalAddress) -> Result<(), ArchError> {
        let current = self.current.ok_or(ArchError::NotMapped(src))?;
        let entry = self
            .table(current)?
            .get(&src.page_number())
            .copied()
            .filter(|e| e.present())
            .ok_or(ArchError::NotMapped(src))?;
        copy_frame(&self.phys, entry.frame(), dst)
    }

    fn map_kernel_page(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError> {
        let vpn = Self::check_kernel(va)?;
        let entry = SoftEntry::leaf(pa, prot.difference(Protection::USER));
        Self::insert(&mut self.master, vpn, va, entry)?;
        if let Some(current) = self.current {
            self.table_mut(current)?.insert(vpn, entry);
        }
        Ok(())
    }

    fn unmap_kernel_page(&mut self, va: VirtualAddress) -> Result<(), ArchError> {
        let vpn = Self::check_kernel(va)?;
        self.master.remove(&vpn).ok_or(ArchError::NotMapped(va))?;
        if let Some(current) = self.current {
            self.table_mut(current)?.remove(&vpn);
        }
        Ok(())
    }

    fn update_kernel_page_prot(
        &mut self,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError> {
        let vpn = Self::check_kernel(va)?;
        let entry = self.master.get_mut(&vpn).ok_or(ArchError::NotMapped(va))?;
        *entry = entry.with_protection(prot.difference(Protection::USER));
        let entry = *entry;
        if let Some(current) = self.current {
            self.table_mut(current)?.insert(vpn, entry);
        }
        Ok(())
    }

    fn map_user_page(
        &mut self,
        handle: ArchHandle,
        pa: PhysicalAddress,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError> {
        let vpn = Self::check_user(va)?;
        let entry = SoftEntry::leaf(pa, prot.union(Protection::USER));
        self.table_mut(handle)?.insert(vpn, entry);
        Ok(())
    }

    fn unmap_user_page(&mut self, handle: ArchHandle, va: VirtualAddress) -> Result<(), ArchError> {
        let vpn = Self::check_user(va)?;
        self.table_mut(handle)?
            .remove(&vpn)
            .map(|_| ())
            .ok_or(ArchError::NotMapped(va))
    }

    fn update_user_page_prot(
        &mut self,
        handle: ArchHandle,
        va: VirtualAddress,
        prot: Protection,
    ) -> Result<(), ArchError> {
        let vpn = Self::check_user(va)?;
        let entry = self
            .table_mut(handle)?
            .get_mut(&vpn)
            .ok_or(ArchError::NotMapped(va))?;
        *entry = entry.with_protection(prot.union(Protection::USER));
        Ok(())
    }

    fn query(&self, handle: ArchHandle, va: VirtualAddress) -> Option<PageInfo> {
        let entry = self.spaces.get(&handle)?.get(&va.page_number())?;
        entry.present().then(|| entry.info())
    }
}

const _: () = assert!(PAGE_SIZE == 4096);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_phys, write_phys};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A trivial **bump** allocator that also remembers returned frames.
    struct BumpAlloc {
        next: AtomicU64,
        end: u64,
        freed: Mutex<Vec<PhysicalAddress>>,
    }

    impl BumpAlloc {
        fn new(start: u64, end: u64) -> Self {
            Self {
                next: AtomicU64::new(start),
                end,
                freed: Mutex::new(Vec::new()),
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_frame(&self) -> Option<PhysicalAddress> {
            let p = self.next.fetch_add(PAGE_SIZE, Ordering::Relaxed);
            (p + PAGE_SIZE <= self.end).then(|| PhysicalAddress::new(p))
        }

        fn free_frame(&self, pa: PhysicalAddress) {
            self.freed.lock().unwrap().push(pa);
        }
    }

    const RAM: u64 = 64 * PAGE_SIZE;
    const USER_VA: u64 = 0x0040_0000;
    const KERNEL_VA: u64 = 0xD000_0000;

    fn mmu() -> SoftMmu<Arc<BumpAlloc>, Arc<HostedRam>> {
        // Roots come from the top half, data frames from the bottom half.
        SoftMmu::new(
            Arc::new(BumpAlloc::new(RAM / 2, RAM)),
            Arc::new(HostedRam::new(PhysicalAddress::zero(), RAM)),
        )
    }

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn map_query_unmap_user_page() {
        let mut m = mmu();
        let h = m.create().unwrap();
        m.map_user_page(h, pa(0x3000), va(USER_VA), Protection::WRITE).unwrap();

        let info = m.query(h, va(USER_VA + 0x123)).unwrap();
        assert_eq!(info.frame, pa(0x3000));
        assert_eq!(info.prot, Protection::WRITE | Protection::USER);

        m.map_user_page(h, pa(0x4000), va(USER_VA), Protection::empty()).unwrap();
        let info = m.query(h, va(USER_VA)).unwrap();
        assert_eq!(info.frame, pa(0x4000));
        assert_eq!(info.prot, Protection::USER);

        m.unmap_user_page(h, va(USER_VA)).unwrap();
        assert!(m.query(h, va(USER_VA)).is_none());
        assert_eq!(
            m.unmap_user_page(h, va(USER_VA)),
            Err(ArchError::NotMapped(va(USER_VA)))
        );
    }

    #[test]
    fn halves_are_enforced() {
        let mut m = mmu();
        let h = m.create().unwrap();
        assert!(matches!(
            m.map_user_page(h, pa(0x1000), va(KERNEL_VA), Protection::WRITE),
            Err(ArchError::InvalidAddress(_))
        ));
        assert!(matches!(
            m.map_kernel_page(pa(0x1000), va(USER_VA), Protection::WRITE),
            Err(ArchError::InvalidAddress(_))
        ));
        assert!(m.is_userspace_address(va(USER_VA)));
        assert!(!m.is_userspace_address(va(KERNEL_VA)));
    }

    #[test]
    fn clone_current_shares_read_only() {
        let mut m = mmu();
        let a = m.create().unwrap();
        let b = m.create().unwrap();
        m.map_user_page(a, pa(0x5000), va(USER_VA), Protection::WRITE).unwrap();
        m.switch_to(a).unwrap();

        m.clone_current(b, a).unwrap();

        let ia = m.query(a, va(USER_VA)).unwrap();
        let ib = m.query(b, va(USER_VA)).unwrap();
        assert_eq!(ia.frame, ib.frame);
        assert!(!ia.prot.contains(Protection::WRITE));
        assert!(!ib.prot.contains(Protection::WRITE));
    }

    #[test]
    fn kernel_pages_reach_other_spaces_through_sync() {
        let mut m = mmu();
        let a = m.create().unwrap();
        let b = m.create().unwrap();
        m.switch_to(a).unwrap();

        m.map_kernel_page(pa(0x6000), va(KERNEL_VA), Protection::WRITE).unwrap();
        assert!(m.query(a, va(KERNEL_VA)).is_some());
        assert!(m.query(b, va(KERNEL_VA)).is_none());

        let token = KernelSyncToken {
            start: va(KERNEL_VA),
            pages: 1,
        };
        m.sync_kernel_space(b, &token).unwrap();
        assert_eq!(m.query(b, va(KERNEL_VA)).unwrap().frame, pa(0x6000));

        // spaces created afterwards inherit the kernel half
        let c = m.create().unwrap();
        assert!(m.query(c, va(KERNEL_VA)).is_some());

        m.unmap_kernel_page(va(KERNEL_VA)).unwrap();
        m.sync_kernel_space(b, &token).unwrap();
        assert!(m.query(a, va(KERNEL_VA)).is_none());
        assert!(m.query(b, va(KERNEL_VA)).is_none());
    }

    #[test]
    fn copy_page_reads_through_active_space() {
        let mut m = mmu();
        let a = m.create().unwrap();
        m.switch_to(a).unwrap();
        m.map_user_page(a, pa(0x2000), va(USER_VA), Protection::WRITE).unwrap();
        write_phys(&m.phys, pa(0x2010), b"cow").unwrap();

        m.copy_page(va(USER_VA), pa(0x7000)).unwrap();

        let mut buf = [0u8; 3];
        read_phys(&m.phys, pa(0x7010), &mut buf).unwrap();
        assert_eq!(&buf, b"cow");
        assert_eq!(
            m.copy_page(va(USER_VA + PAGE_SIZE), pa(0x7000)),
            Err(ArchError::NotMapped(va(USER_VA + PAGE_SIZE)))
        );
    }

    #[test]
    fn active_space_cannot_be_destroyed() {
        let mut m = mmu();
        let a = m.create().unwrap();
        let b = m.create().unwrap();
        m.switch_to(a).unwrap();

        assert_eq!(m.destroy(a), Err(ArchError::Busy(a)));
        m.destroy(b).unwrap();
        assert_eq!(m.space_count(), 1);
        assert_eq!(*m.frames.freed.lock().unwrap(), vec![pa(b.as_raw())]);
        assert_eq!(m.switch_to(b), Err(ArchError::UnknownSpace(b)));
    }

    #[test]
    fn create_fails_without_root_frames() {
        let mut m = SoftMmu::new(
            Arc::new(BumpAlloc::new(0, PAGE_SIZE)),
            Arc::new(HostedRam::new(PhysicalAddress::zero(), PAGE_SIZE)),
        );
        assert!(m.create().is_ok());
        assert_eq!(m.create(), Err(ArchError::OutOfMemory));
    }
}
