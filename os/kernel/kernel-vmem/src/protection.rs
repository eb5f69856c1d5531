use bitflags::bitflags;

bitflags! {
    /// Access rights of a mapping or a single translation.
    ///
    /// Read access is implied by presence. [`NOCACHE`](Self::NOCACHE) is only
    /// accepted for kernel mappings (MMIO windows).
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct Protection: u32 {
        /// Writes allowed.
        const WRITE = 1 << 0;
        /// Instruction fetches allowed.
        const EXEC = 1 << 1;
        /// Accessible from user mode.
        const USER = 1 << 2;
        /// Uncached (device memory).
        const NOCACHE = 1 << 3;
    }
}

bitflags! {
    /// Architecture-neutral description of a page fault.
    ///
    /// Trap handlers decode their native status registers into these bits
    /// before calling into the memory manager.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct FaultFlags: u32 {
        /// The faulting access was a write.
        const WRITE = 1 << 0;
        /// The fault happened while executing in user mode.
        const USER = 1 << 1;
        /// A translation existed; the access violated its protection.
        ///
        /// Clear means the page was not present.
        const PRESENT = 1 << 2;
    }
}

impl FaultFlags {
    /// Write to a present, write-protected page: the copy-on-write trigger.
    #[inline]
    #[must_use]
    pub const fn is_protection_write(self) -> bool {
        self.contains(Self::WRITE.union(Self::PRESENT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_bits_are_independent() {
        let p = Protection::WRITE | Protection::USER;
        assert!(p.contains(Protection::WRITE));
        assert!(!p.contains(Protection::EXEC));
        assert_eq!(p.bits(), 0b101);
    }

    #[test]
    fn protection_write_detection() {
        assert!((FaultFlags::WRITE | FaultFlags::PRESENT | FaultFlags::USER).is_protection_write());
        assert!(!(FaultFlags::WRITE | FaultFlags::USER).is_protection_write());
        assert!(!FaultFlags::PRESENT.is_protection_write());
    }
}
