//! Switching the CPU from one thread to another.
//!
//! The scheduler works on saved register files: trap entry stores the
//! interrupted state in a [`CpuContext`] frame, and whatever the frame holds on
//! trap return is what runs next. Switching threads therefore means saving the
//! frame into the outgoing thread and loading the incoming thread's context
//! into the frame.

use crate::{CpuContext, Thread};
use kernel_alloc::{MemoryManager, VmmError, VmmId};
use log::{error, trace};

/// Makes an address space active; implemented by the memory manager.
pub trait AddressSpaceSwitch {
    /// # Errors
    /// When `vmm` does not exist.
    fn switch_address_space(&mut self, vmm: VmmId) -> Result<(), VmmError>;
}

impl AddressSpaceSwitch for MemoryManager {
    fn switch_address_space(&mut self, vmm: VmmId) -> Result<(), VmmError> {
        self.switch_to(vmm)
    }
}

/// Resumes `to` in `frame`.
///
/// The caller has already saved `from`'s registers. If there is no previous
/// thread or it belongs to another process, `to_space` is made active first;
/// only then is the register file restored.
///
/// Runs with interrupts masked.
///
/// # Panics
/// If the address space of `to` cannot be activated.
pub fn context_switch(
    from: Option<&Thread>,
    to: &Thread,
    to_space: VmmId,
    frame: &mut CpuContext,
    spaces: &mut dyn AddressSpaceSwitch,
) {
    if from.is_none_or(|f| f.pid() != to.pid()) {
        if let Err(e) = spaces.switch_address_space(to_space) {
            error!("sched: cannot activate {to_space:?} for {:?}: {e}", to.id());
            panic!("address space switch failed");
        }
    }
    *frame = to.context();
    trace!(
        "sched: {:?} -> {:?}",
        from.map(Thread::id),
        to.id()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pid, Priority, ThreadId, ThreadKind};
    use alloc::vec::Vec;

    #[derive(Default)]
    struct Recorder(Vec<VmmId>);

    impl AddressSpaceSwitch for Recorder {
        fn switch_address_space(&mut self, vmm: VmmId) -> Result<(), VmmError> {
            self.0.push(vmm);
            Ok(())
        }
    }

    fn thread(id: u64, pid: u64, pc: u64) -> Thread {
        Thread::new(
            ThreadId::new(id),
            Pid::new(pid),
            "t",
            Priority::DEFAULT,
            ThreadKind::User,
            CpuContext::user(pc, 0x7000),
        )
    }

    #[test]
    fn same_process_keeps_the_address_space() {
        let a = thread(1, 1, 0x1000);
        let b = thread(2, 1, 0x2000);
        let mut frame = CpuContext::default();
        let mut spaces = Recorder::default();

        context_switch(Some(&a), &b, VmmId::new(1), &mut frame, &mut spaces);
        assert!(spaces.0.is_empty());
        assert_eq!(frame.pc, 0x2000);
    }

    #[test]
    fn other_process_switches_first() {
        let a = thread(1, 1, 0x1000);
        let b = thread(2, 2, 0x2000);
        let mut frame = CpuContext::default();
        let mut spaces = Recorder::default();

        context_switch(Some(&a), &b, VmmId::new(7), &mut frame, &mut spaces);
        context_switch(None, &a, VmmId::new(3), &mut frame, &mut spaces);
        assert_eq!(spaces.0, [VmmId::new(7), VmmId::new(3)]);
        assert_eq!(frame, a.context());
    }
}
