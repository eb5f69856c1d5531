use crate::{PageInfo, Protection};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Private translation entry of the software MMU.
///
/// | Bits   | Field        |
/// |--------|--------------|
/// | 0      | `present`    |
/// | 1      | `writable`   |
/// | 2      | `user`       |
/// | 3      | `executable` |
/// | 4      | `no_cache`   |
/// | 5..12  | reserved     |
/// | 12..64 | frame number |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SoftEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub executable: bool,
    pub no_cache: bool,
    #[bits(7)]
    __: u8,
    #[bits(52)]
    pub frame_number: u64,
}

impl SoftEntry {
    pub fn leaf(pa: PhysicalAddress, prot: Protection) -> Self {
        Self::new()
            .with_present(true)
            .with_frame_number(pa.frame_number())
            .with_protection(prot)
    }

    #[must_use]
    pub const fn with_protection(self, prot: Protection) -> Self {
        self.with_writable(prot.contains(Protection::WRITE))
            .with_user(prot.contains(Protection::USER))
            .with_executable(prot.contains(Protection::EXEC))
            .with_no_cache(prot.contains(Protection::NOCACHE))
    }

    pub fn protection(self) -> Protection {
        let mut p = Protection::empty();
        p.set(Protection::WRITE, self.writable());
        p.set(Protection::USER, self.user());
        p.set(Protection::EXEC, self.executable());
        p.set(Protection::NOCACHE, self.no_cache());
        p
    }

    pub fn frame(self) -> PhysicalAddress {
        PhysicalAddress::from_frame_number(self.frame_number())
    }

    pub fn info(self) -> PageInfo {
        PageInfo {
            frame: self.frame(),
            prot: self.protection(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips_protection_and_frame() {
        let prot = Protection::WRITE | Protection::USER;
        let e = SoftEntry::leaf(PhysicalAddress::new(0x0012_3000), prot);
        assert!(e.present());
        assert_eq!(e.frame().as_u64(), 0x0012_3000);
        assert_eq!(e.protection(), prot);
        assert_eq!(e.into_bits() & 0xFFF, 0b0_0111);
    }
}
