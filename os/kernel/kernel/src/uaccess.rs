//! Kernel access to user memory.
//!
//! Every access goes through the active address space's page tables. A page
//! that is missing or lacks the needed permission is handed to the fault
//! handler once, as a user-mode fault; if that does not make it accessible the
//! access fails with [`KernelError::Segv`].

use crate::error::KernelError;
use crate::kernel::Kernel;
use kernel_alloc::MemoryManager;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::{FaultFlags, PageInfo, Protection, read_phys, write_phys};

/// Translates `va` for a user access, resolving one fault if needed.
fn user_page(mm: &mut MemoryManager, va: VirtualAddress, write: bool) -> Result<PageInfo, KernelError> {
    if !mm.is_userspace_address(va) {
        return Err(KernelError::Segv(va));
    }
    let accessible = |info: &PageInfo| {
        info.prot.contains(Protection::USER) && (!write || info.prot.contains(Protection::WRITE))
    };

    let translated = mm.translate(va);
    if let Some(info) = translated.filter(accessible) {
        return Ok(info);
    }

    let mut flags = FaultFlags::USER;
    flags.set(FaultFlags::WRITE, write);
    flags.set(FaultFlags::PRESENT, translated.is_some());
    mm.handle_page_fault(va, flags).ok_or(KernelError::Segv(va))?;
    mm.translate(va).filter(accessible).ok_or(KernelError::Segv(va))
}

/// Walks `[start, start + len)` page by page; `f` gets the buffer offset, the
/// physical address and the chunk length.
fn for_each_chunk(
    mm: &mut MemoryManager,
    start: VirtualAddress,
    len: usize,
    write: bool,
    mut f: impl FnMut(&MemoryManager, usize, PhysicalAddress, usize) -> Result<(), KernelError>,
) -> Result<(), KernelError> {
    let mut done = 0;
    while done < len {
        let va = start
            .checked_add(done as u64)
            .ok_or(KernelError::Segv(start))?;
        let info = user_page(mm, va, write)?;
        let offset = va.page_offset();
        #[allow(clippy::cast_possible_truncation)]
        let chunk = ((PAGE_SIZE - offset) as usize).min(len - done);
        let pa = info.frame.checked_add(offset).ok_or(KernelError::Segv(va))?;
        f(mm, done, pa, chunk)?;
        done += chunk;
    }
    Ok(())
}

impl Kernel {
    /// Copies `bytes` to user address `dst` in the active address space.
    ///
    /// Copy-on-write pages are broken on the way. A failure part-way leaves the
    /// bytes before the failing page written.
    ///
    /// # Errors
    /// [`KernelError::Segv`] for an inaccessible page.
    pub fn copy_to_user(&self, dst: VirtualAddress, bytes: &[u8]) -> Result<(), KernelError> {
        let mut mm = self.mm.lock();
        for_each_chunk(&mut mm, dst, bytes.len(), true, |mm, at, pa, len| {
            Ok(write_phys(&**mm.phys(), pa, &bytes[at..at + len])?)
        })
    }

    /// Fills `buf` from user address `src` in the active address space.
    ///
    /// # Errors
    /// [`KernelError::Segv`] for an inaccessible page.
    pub fn copy_from_user(&self, src: VirtualAddress, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut mm = self.mm.lock();
        for_each_chunk(&mut mm, src, buf.len(), false, |mm, at, pa, len| {
            Ok(read_phys(&**mm.phys(), pa, &mut buf[at..at + len])?)
        })
    }

    /// # Errors
    /// See [`copy_to_user`](Self::copy_to_user).
    pub fn write_user_u8(&self, dst: VirtualAddress, value: u8) -> Result<(), KernelError> {
        self.copy_to_user(dst, &[value])
    }

    /// # Errors
    /// See [`copy_from_user`](Self::copy_from_user).
    pub fn read_user_u8(&self, src: VirtualAddress) -> Result<u8, KernelError> {
        let mut b = [0u8];
        self.copy_from_user(src, &mut b)?;
        Ok(b[0])
    }
}
