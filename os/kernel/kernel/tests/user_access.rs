use kernel::{Kernel, KernelConfig, KernelError};
use kernel_alloc::{MappingFlags, MemoryArea, PhysicalLayout};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_sched::{CpuContext, Priority};
use kernel_vmem::Protection;

const CODE: u64 = 0x0010_0000;
const DATA: u64 = 0x0020_0000;

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

/// A kernel whose running thread has a read-only page at `CODE` and two
/// writable pages at `DATA`.
fn kernel_with_user_memory() -> Kernel {
    let config = KernelConfig {
        layout: PhysicalLayout::new(PhysicalAddress::zero(), 256 * PAGE_SIZE)
            .with_reserved(MemoryArea::new(0, PAGE_SIZE, "null page")),
        log_level: None,
        ..KernelConfig::default()
    };
    let kernel = Kernel::hosted(config).unwrap();
    let pid = kernel.create_process("user").unwrap();
    kernel
        .spawn_user_thread(pid, "main", va(CODE), va(DATA + 2 * PAGE_SIZE), Priority::DEFAULT)
        .unwrap();
    kernel.timer_tick(&mut CpuContext::default());
    assert_eq!(kernel.current_thread().map(|t| t.pid()), Some(pid));

    kernel.with_mm(|mm| {
        mm.create_user_mapping(va(CODE), PAGE_SIZE, Protection::EXEC, MappingFlags::empty())
            .unwrap();
        mm.create_user_mapping(va(DATA), 2 * PAGE_SIZE, Protection::WRITE, MappingFlags::empty())
            .unwrap();
    });
    kernel
}

#[test]
fn copies_across_a_page_boundary() {
    let kernel = kernel_with_user_memory();
    let at = va(DATA + PAGE_SIZE - 3);
    kernel.copy_to_user(at, b"kernel").unwrap();

    let mut buf = [0u8; 6];
    kernel.copy_from_user(at, &mut buf).unwrap();
    assert_eq!(&buf, b"kernel");
    assert_eq!(kernel.read_user_u8(va(DATA + PAGE_SIZE)).unwrap(), b'n');
}

#[test]
fn fresh_pages_read_as_zero() {
    let kernel = kernel_with_user_memory();
    let mut buf = [0xFFu8; 16];
    kernel.copy_from_user(va(DATA + 100), &mut buf).unwrap();
    assert_eq!(buf, [0; 16]);
}

#[test]
fn read_only_pages_reject_writes() {
    let kernel = kernel_with_user_memory();
    assert_eq!(kernel.read_user_u8(va(CODE)).unwrap(), 0);
    assert_eq!(
        kernel.write_user_u8(va(CODE), 1),
        Err(KernelError::Segv(va(CODE)))
    );
}

#[test]
fn unmapped_and_kernel_addresses_fault() {
    let kernel = kernel_with_user_memory();
    assert_eq!(
        kernel.read_user_u8(va(DATA + 2 * PAGE_SIZE)),
        Err(KernelError::Segv(va(DATA + 2 * PAGE_SIZE)))
    );
    assert_eq!(
        kernel.write_user_u8(va(0xD000_0000), 1),
        Err(KernelError::Segv(va(0xD000_0000)))
    );
    assert_eq!(KernelError::Segv(va(0)).errno(), kernel_info::errno::Errno::EFAULT);
}

#[test]
fn partial_copy_stops_at_the_first_bad_page() {
    let kernel = kernel_with_user_memory();
    let end = DATA + 2 * PAGE_SIZE;
    assert_eq!(
        kernel.copy_to_user(va(end - 2), &[1, 2, 3, 4]),
        Err(KernelError::Segv(va(end)))
    );
    assert_eq!(kernel.read_user_u8(va(end - 1)).unwrap(), 2);
}
