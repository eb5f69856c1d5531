use kernel_alloc::{
    FrameAllocator, MappingFlags, MemoryArea, MemoryManager, PhysicalLayout, Region, VmmError,
    VmmId,
};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::soft::{HostedRam, SoftMmu};
use kernel_vmem::{FaultFlags, Protection, read_phys, write_phys};
use std::sync::Arc;

const FRAMES: u64 = 256;
const HEAP: u64 = 0x0040_0000;
const KERNEL_VA: u64 = 0xD000_0000;

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn setup() -> (Arc<FrameAllocator>, MemoryManager) {
    let layout = PhysicalLayout::new(PhysicalAddress::zero(), FRAMES * PAGE_SIZE)
        .with_reserved(MemoryArea::new(0, PAGE_SIZE, "null page"));
    let frames = Arc::new(FrameAllocator::new(&layout));
    let ram = Arc::new(HostedRam::new(PhysicalAddress::zero(), FRAMES * PAGE_SIZE));
    let mmu = SoftMmu::new(Arc::clone(&frames), Arc::clone(&ram));
    let mm = MemoryManager::new(Arc::clone(&frames), ram, Box::new(mmu));
    (frames, mm)
}

/// A manager with one active space.
fn setup_active() -> (Arc<FrameAllocator>, MemoryManager, VmmId) {
    let (frames, mut mm) = setup();
    let id = mm.create().unwrap();
    mm.switch_to(id).unwrap();
    (frames, mm, id)
}

fn read_u8(mm: &MemoryManager, id: VmmId, addr: u64) -> u8 {
    let info = mm.query(id, va(addr)).expect("mapped");
    let mut b = [0u8];
    read_phys(&**mm.phys(), info.frame.checked_add(addr % PAGE_SIZE).unwrap(), &mut b).unwrap();
    b[0]
}

fn write_u8(mm: &MemoryManager, id: VmmId, addr: u64, value: u8) {
    let info = mm.query(id, va(addr)).expect("mapped");
    assert!(info.prot.contains(Protection::WRITE), "write to read-only page");
    write_phys(&**mm.phys(), info.frame.checked_add(addr % PAGE_SIZE).unwrap(), &[value]).unwrap();
}

#[test]
fn user_mapping_is_zeroed_and_translated() {
    let (frames, mut mm, id) = setup_active();
    let before = frames.free_count();

    let start = mm
        .create_user_mapping(va(HEAP), 3 * PAGE_SIZE - 100, Protection::WRITE, MappingFlags::empty())
        .unwrap();
    assert_eq!(start, va(HEAP));
    assert_eq!(frames.free_count(), before - 3);

    let m = mm.find_mapping(va(HEAP + 2 * PAGE_SIZE + 5)).unwrap();
    assert_eq!(m.size(), 3 * PAGE_SIZE);
    assert!(m.prot().contains(Protection::USER));

    for page in 0..3 {
        let info = mm.translate(va(HEAP + page * PAGE_SIZE)).unwrap();
        assert_eq!(info.prot, Protection::WRITE | Protection::USER);
        assert_eq!(read_u8(&mm, id, HEAP + page * PAGE_SIZE + 7), 0);
    }
    assert!(mm.translate(va(HEAP + 3 * PAGE_SIZE)).is_none());
}

#[test]
fn user_mapping_arguments_are_checked() {
    let (frames, mut mm, _) = setup_active();
    let before = frames.free_count();
    let rw = Protection::WRITE;
    let none = MappingFlags::empty();

    assert_eq!(
        mm.create_user_mapping(va(HEAP + 1), PAGE_SIZE, rw, none),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_user_mapping(va(HEAP), 0, rw, none),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_user_mapping(va(KERNEL_VA), PAGE_SIZE, rw, none),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_user_mapping(va(0xBFFF_F000), 2 * PAGE_SIZE, rw, none),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_user_mapping(va(HEAP), PAGE_SIZE, rw | Protection::NOCACHE, none),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(frames.free_count(), before);

    mm.create_user_mapping(va(HEAP), 2 * PAGE_SIZE, rw, none).unwrap();
    assert_eq!(
        mm.create_user_mapping(va(HEAP + PAGE_SIZE), PAGE_SIZE, rw, none),
        Err(VmmError::AddressInUse(va(HEAP + PAGE_SIZE)))
    );
    assert_eq!(frames.free_count(), before - 2);
}

#[test]
fn user_mapping_without_active_space_is_rejected() {
    let (_, mut mm) = setup();
    mm.create().unwrap();
    assert_eq!(
        mm.create_user_mapping(va(HEAP), PAGE_SIZE, Protection::WRITE, MappingFlags::empty()),
        Err(VmmError::UnknownSpace)
    );
}

#[test]
fn out_of_memory_leaves_nothing_behind() {
    let (frames, mut mm, _) = setup_active();
    let before = frames.free_count();
    let too_many = (before as u64 + 1) * PAGE_SIZE;

    assert_eq!(
        mm.create_user_mapping(va(HEAP), too_many, Protection::WRITE, MappingFlags::empty()),
        Err(VmmError::OutOfMemory)
    );
    assert_eq!(frames.free_count(), before);
    assert!(mm.find_mapping(va(HEAP)).is_none());
    assert!(mm.translate(va(HEAP)).is_none());
}

#[test]
fn destroying_a_user_mapping_returns_its_frames() {
    let (frames, mut mm, _) = setup_active();
    let before = frames.free_count();
    mm.create_user_mapping(va(HEAP), 4 * PAGE_SIZE, Protection::WRITE, MappingFlags::empty())
        .unwrap();

    mm.destroy_user_mapping(va(HEAP + 3 * PAGE_SIZE + 17)).unwrap();
    assert_eq!(frames.free_count(), before);
    assert!(mm.translate(va(HEAP)).is_none());
    assert_eq!(
        mm.destroy_user_mapping(va(HEAP)),
        Err(VmmError::NotMapped(va(HEAP)))
    );
}

#[test]
fn extend_grows_up_and_down() {
    let (_, mut mm, _) = setup_active();
    let rw = Protection::WRITE;

    mm.create_user_mapping(va(HEAP), PAGE_SIZE, rw, MappingFlags::empty())
        .unwrap();
    let ext = mm.extend_user_mapping(va(HEAP), 10).unwrap();
    assert_eq!(ext, va(HEAP + PAGE_SIZE));
    let m = mm.find_mapping(ext).unwrap();
    assert_eq!(m.size(), PAGE_SIZE);
    assert_eq!(m.prot(), rw | Protection::USER);

    let stack = 0x0080_0000;
    mm.create_user_mapping(va(stack), PAGE_SIZE, rw, MappingFlags::GROWS_DOWN)
        .unwrap();
    let ext = mm.extend_user_mapping(va(stack), 2 * PAGE_SIZE).unwrap();
    assert_eq!(ext, va(stack - 2 * PAGE_SIZE));
    assert!(mm.find_mapping(ext).unwrap().flags().contains(MappingFlags::GROWS_DOWN));
}

#[test]
fn extend_into_a_neighbour_fails() {
    let (frames, mut mm, _) = setup_active();
    let rw = Protection::WRITE;
    mm.create_user_mapping(va(HEAP), PAGE_SIZE, rw, MappingFlags::empty())
        .unwrap();
    mm.create_user_mapping(va(HEAP + 2 * PAGE_SIZE), PAGE_SIZE, rw, MappingFlags::empty())
        .unwrap();
    let before = frames.free_count();

    assert_eq!(
        mm.extend_user_mapping(va(HEAP), 2 * PAGE_SIZE),
        Err(VmmError::AddressInUse(va(HEAP + PAGE_SIZE)))
    );
    assert_eq!(frames.free_count(), before);
    assert_eq!(
        mm.extend_user_mapping(va(HEAP + 5 * PAGE_SIZE), PAGE_SIZE),
        Err(VmmError::NotMapped(va(HEAP + 5 * PAGE_SIZE)))
    );
}

#[test]
fn kernel_mapping_reaches_every_space() {
    let (frames, mut mm) = setup();
    let a = mm.create().unwrap();
    let b = mm.create().unwrap();
    mm.switch_to(a).unwrap();

    mm.create_kernel_mapping(va(KERNEL_VA), 2 * PAGE_SIZE, Protection::WRITE)
        .unwrap();
    let late = mm.create().unwrap();

    let frame = mm.query(a, va(KERNEL_VA)).unwrap().frame;
    for id in [a, b, late] {
        let info = mm.query(id, va(KERNEL_VA)).unwrap();
        assert_eq!(info.frame, frame, "{id:?}");
        assert!(!info.prot.contains(Protection::USER));
    }

    let before = frames.free_count();
    mm.destroy_kernel_mapping(va(KERNEL_VA + PAGE_SIZE)).unwrap();
    assert_eq!(frames.free_count(), before + 2);
    for id in [a, b, late] {
        assert!(mm.query(id, va(KERNEL_VA)).is_none(), "{id:?}");
    }
}

#[test]
fn kernel_mapping_arguments_are_checked() {
    let (frames, mut mm, _) = setup_active();
    mm.create_kernel_mapping(va(KERNEL_VA), 2 * PAGE_SIZE, Protection::WRITE)
        .unwrap();
    let before = frames.free_count();

    assert_eq!(
        mm.create_kernel_mapping(va(KERNEL_VA + PAGE_SIZE), PAGE_SIZE, Protection::WRITE),
        Err(VmmError::AddressInUse(va(KERNEL_VA + PAGE_SIZE)))
    );
    assert_eq!(
        mm.create_kernel_mapping(va(HEAP), PAGE_SIZE, Protection::WRITE),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_kernel_mapping(va(0xBFFF_F000), 2 * PAGE_SIZE, Protection::WRITE),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(
        mm.create_kernel_mapping(va(KERNEL_VA + 0x10_0000), PAGE_SIZE, Protection::USER),
        Err(VmmError::InvalidArgument)
    );
    assert_eq!(frames.free_count(), before);
    assert_eq!(
        mm.destroy_kernel_mapping(va(KERNEL_VA + 0x10_0000)),
        Err(VmmError::NotMapped(va(KERNEL_VA + 0x10_0000)))
    );
}

#[test]
fn last_unref_destroys_everything() {
    let (frames, mut mm) = setup();
    let baseline = frames.free_count();
    let keep = mm.create().unwrap();
    let id = mm.create().unwrap();
    mm.switch_to(id).unwrap();
    mm.create_user_mapping(va(HEAP), 3 * PAGE_SIZE, Protection::WRITE, MappingFlags::empty())
        .unwrap();
    mm.vmm_ref(id).unwrap();

    assert_eq!(mm.vmm_unref(id), Ok(false));
    assert_eq!(mm.vmm_unref(id), Err(VmmError::Busy));
    assert_eq!(mm.vmm(id).unwrap().refcount(), 1);

    mm.switch_to(keep).unwrap();
    assert_eq!(mm.vmm_unref(id), Ok(true));
    assert!(mm.vmm(id).is_none());
    assert_eq!(mm.vmm_count(), 1);
    assert_eq!(frames.free_count(), baseline - 1);
    assert_eq!(mm.vmm_unref(id), Err(VmmError::UnknownSpace));
}

#[test]
fn fork_shares_read_only_and_copies_on_write() {
    let (frames, mut mm, parent) = setup_active();
    mm.create_user_mapping(va(HEAP), 2 * PAGE_SIZE, Protection::WRITE, MappingFlags::empty())
        .unwrap();
    write_u8(&mm, parent, HEAP + 10, 0xAA);
    write_u8(&mm, parent, HEAP + PAGE_SIZE + 10, 0xBB);

    let child = mm.fork_current().unwrap();
    let region = Arc::clone(mm.find_mapping(va(HEAP)).unwrap().region());
    let shared = region.frames()[0];
    assert_eq!(Region::refcount(&region), 3);

    for id in [parent, child] {
        let info = mm.query(id, va(HEAP)).unwrap();
        assert!(!info.prot.contains(Protection::WRITE), "{id:?}");
        assert_eq!(info.frame, shared);
    }

    // The child writes first: it gets private copies of the whole mapping.
    let free = frames.free_count();
    mm.switch_to(child).unwrap();
    let fault = FaultFlags::WRITE | FaultFlags::PRESENT | FaultFlags::USER;
    assert_eq!(mm.handle_page_fault(va(HEAP + 10), fault), Some(va(HEAP + 10)));
    assert_eq!(frames.free_count(), free - 2);
    assert_eq!(Region::refcount(&region), 2);

    write_u8(&mm, child, HEAP + 10, 0xCC);
    assert_eq!(read_u8(&mm, child, HEAP + PAGE_SIZE + 10), 0xBB);
    assert_eq!(read_u8(&mm, parent, HEAP + 10), 0xAA);
    assert_ne!(mm.query(child, va(HEAP)).unwrap().frame, shared);
    drop(region);

    // The parent is now the sole owner: write access comes back in place.
    mm.switch_to(parent).unwrap();
    let free = frames.free_count();
    assert_eq!(mm.handle_page_fault(va(HEAP + PAGE_SIZE), fault), Some(va(HEAP + PAGE_SIZE)));
    assert_eq!(frames.free_count(), free);
    let info = mm.query(parent, va(HEAP)).unwrap();
    assert!(info.prot.contains(Protection::WRITE));
    assert_eq!(info.frame, shared);
    assert_eq!(read_u8(&mm, parent, HEAP + 10), 0xAA);
    assert_eq!(read_u8(&mm, child, HEAP + 10), 0xCC);
}

#[test]
fn unresolvable_faults_are_reported() {
    let (_, mut mm, _) = setup_active();
    mm.create_user_mapping(va(HEAP), PAGE_SIZE, Protection::empty(), MappingFlags::empty())
        .unwrap();
    let write = FaultFlags::WRITE | FaultFlags::PRESENT | FaultFlags::USER;

    assert_eq!(mm.handle_page_fault(va(HEAP), write), None);
    assert_eq!(mm.handle_page_fault(va(HEAP + PAGE_SIZE), write), None);
    assert_eq!(mm.handle_page_fault(va(HEAP), FaultFlags::USER | FaultFlags::WRITE), None);
    assert_eq!(mm.handle_page_fault(va(HEAP), FaultFlags::PRESENT | FaultFlags::USER), None);
}

#[test]
fn clone_into_self_or_populated_space_is_rejected() {
    let (_, mut mm, src) = setup_active();
    mm.create_user_mapping(va(HEAP), PAGE_SIZE, Protection::WRITE, MappingFlags::empty())
        .unwrap();
    assert_eq!(mm.clone_current(src), Err(VmmError::InvalidArgument));

    let dst = mm.create().unwrap();
    mm.clone_current(dst).unwrap();
    assert_eq!(
        mm.clone_current(dst),
        Err(VmmError::AddressInUse(va(HEAP)))
    );
    assert_eq!(mm.vmm(dst).unwrap().mapping_count(), 1);
}
