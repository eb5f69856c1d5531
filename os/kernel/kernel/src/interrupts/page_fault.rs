//! Page-fault status words.
//!
//! * x86-64 pushes a [`PageFaultError`] code and leaves the address in `CR2`.
//! * ARMv7 reports a [`DataFaultStatus`] in `DFSR` and the address in `DFAR`.

use bitfield_struct::bitfield;
use kernel_vmem::FaultFlags;

pub const PAGE_FAULT_VECTOR: usize = 0x0E; // 14

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0-2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page (likely NX or SMEP)"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }

    #[must_use]
    pub fn fault_flags(&self) -> FaultFlags {
        let mut flags = FaultFlags::empty();
        flags.set(FaultFlags::PRESENT, self.present());
        flags.set(FaultFlags::WRITE, self.write());
        flags.set(FaultFlags::USER, self.user());
        flags
    }
}

/// Data Fault Status Register (ARMv7 short-descriptor format).
///
/// The fault status is split: bits 3:0 plus bit 10.
/// Reference: ARM ARM, B4.1.52 "DFSR, Data Fault Status Register".
#[bitfield(u32)]
pub struct DataFaultStatus {
    #[bits(4)]
    pub fs_low: u8, // bits 3:0

    #[bits(4)]
    pub domain: u8, // bits 7:4

    #[bits(2)]
    _pad: u8, // bits 9:8

    pub fs_high: bool, // bit 10

    /// 1 = the access was a write (WnR).
    pub write: bool, // bit 11

    /// 1 = external abort.
    pub external: bool, // bit 12

    #[bits(19)]
    __: u32,
}

impl DataFaultStatus {
    const TRANSLATION_SECTION: u8 = 0b0_0101;
    const TRANSLATION_PAGE: u8 = 0b0_0111;
    const PERMISSION_SECTION: u8 = 0b0_1101;
    const PERMISSION_PAGE: u8 = 0b0_1111;

    /// The five-bit fault status.
    #[must_use]
    pub const fn status(&self) -> u8 {
        ((self.fs_high() as u8) << 4) | self.fs_low()
    }

    #[must_use]
    pub const fn is_translation_fault(&self) -> bool {
        matches!(self.status(), Self::TRANSLATION_SECTION | Self::TRANSLATION_PAGE)
    }

    #[must_use]
    pub const fn is_permission_fault(&self) -> bool {
        matches!(self.status(), Self::PERMISSION_SECTION | Self::PERMISSION_PAGE)
    }

    /// `user` comes from the saved mode bits; the register does not record it.
    #[must_use]
    pub fn fault_flags(&self, user: bool) -> FaultFlags {
        let mut flags = FaultFlags::empty();
        flags.set(FaultFlags::PRESENT, self.is_permission_fault());
        flags.set(FaultFlags::WRITE, self.write());
        flags.set(FaultFlags::USER, user);
        flags
    }
}
