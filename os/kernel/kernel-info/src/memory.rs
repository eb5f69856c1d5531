//! # Memory Layout

/// Size of a page / physical frame.
pub const PAGE_SIZE: u64 = 4096;

/// Lowest address a user mapping may start at; page zero stays unmapped.
pub const USER_BASE: u64 = 0x0000_1000;

/// End of userspace VA range after which Kernel space begins.
pub const USERSPACE_END: u64 = 0xC000_0000;

/// Exclusive end of kernel space.
pub const KERNEL_END: u64 = 0x1_0000_0000;

/// Where the kernel image is loaded in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Space reserved for the kernel image starting at [`PHYS_LOAD`].
pub const KERNEL_IMAGE_SIZE: u64 = 0x0020_0000; // 2 MiB

/// RAM size assumed when the boot environment does not report one.
pub const DEFAULT_RAM_SIZE: u64 = 0x0100_0000; // 16 MiB

/// Default top of a user stack mapping (grows down from here).
pub const USER_STACK_TOP: u64 = USERSPACE_END - PAGE_SIZE;

/// The size of a kernel thread stack in debug builds.
#[cfg(debug_assertions)]
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// The size of a kernel thread stack in release builds.
#[cfg(not(debug_assertions))]
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!((KERNEL_STACK_SIZE as u64).is_multiple_of(PAGE_SIZE));
    assert!(USERSPACE_END.is_multiple_of(PAGE_SIZE));
    assert!(USER_BASE < USERSPACE_END);
    assert!(USERSPACE_END < KERNEL_END);
    assert!(USER_STACK_TOP < USERSPACE_END);
    assert!(PHYS_LOAD + KERNEL_IMAGE_SIZE <= DEFAULT_RAM_SIZE);
};

/// Whether `va` belongs to the user half of the address space.
#[inline]
#[must_use]
pub const fn is_user_address(va: u64) -> bool {
    va >= USER_BASE && va < USERSPACE_END
}

/// Whether `va` belongs to the kernel half of the address space.
#[inline]
#[must_use]
pub const fn is_kernel_address(va: u64) -> bool {
    va >= USERSPACE_END && va < KERNEL_END
}
