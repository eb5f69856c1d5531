//! Process lifecycle glue across the scheduler and the memory manager.

use crate::error::KernelError;
use crate::kernel::{Kernel, spawn_kernel};
use alloc::string::String;
use kernel_alloc::{MemoryManager, VmmId};
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{CpuContext, Pid, Priority, SchedError, Scheduler, ThreadId, ThreadKind};
use log::{debug, info, warn};

impl Kernel {
    /// Creates a process with an empty address space of its own.
    ///
    /// # Errors
    /// [`KernelError::Vmm`] if the address space cannot be created.
    pub fn create_process(&self, name: impl Into<String>) -> Result<Pid, KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        let vmm = mm.create()?;
        Ok(sched.create_process(name, vmm))
    }

    /// Adds a ready user thread to `pid` that starts at `entry` with its user
    /// stack at `stack_top`.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`] if `pid` does not exist or has exited.
    pub fn spawn_user_thread(
        &self,
        pid: Pid,
        name: impl Into<String>,
        entry: VirtualAddress,
        stack_top: VirtualAddress,
        priority: Priority,
    ) -> Result<ThreadId, KernelError> {
        let mut sched = self.sched.lock();
        let context = CpuContext::user(entry.as_u64(), stack_top.as_u64());
        let thread = sched.spawn(pid, name, priority, ThreadKind::User, context)?;
        let id = thread.id();
        sched.add_thread(thread)?;
        Ok(id)
    }

    /// Adds a ready kernel thread to the kernel process.
    ///
    /// # Errors
    /// Only if the kernel process is gone, which boot rules out.
    pub fn spawn_kernel_thread(
        &self,
        name: &str,
        entry: fn() -> !,
        priority: Priority,
    ) -> Result<ThreadId, KernelError> {
        let mut sched = self.sched.lock();
        spawn_kernel(&mut sched, self.kernel_pid(), name, entry, priority)
    }

    /// Forks the running thread's process.
    ///
    /// The child gets a copy-on-write clone of the active address space and
    /// one thread resuming at `frame`, with `0` in the first argument register
    /// as its return value. The parent's frame is untouched.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`], or the address-space clone failure
    /// (nothing is left behind in that case).
    pub fn fork(&self, frame: &CpuContext) -> Result<Pid, KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        let parent = sched.current().cloned().ok_or(SchedError::NoCurrentThread)?;

        let vmm = mm.fork_current()?;
        let child = match sched.fork_process(parent.pid(), vmm) {
            Ok(child) => child,
            Err(e) => {
                release_space(&mut mm, vmm);
                return Err(e.into());
            }
        };

        let mut context = *frame;
        context.args[0] = 0;
        let thread = sched.spawn(child, parent.name(), parent.priority(), parent.kind(), context)?;
        sched.add_thread(thread)?;
        info!("kernel: {:?} forked {child:?} in {vmm:?}", parent.pid());
        Ok(child)
    }

    /// Gives `pid` a fresh, empty address space and releases the old one; the
    /// exec boundary. The process is locked meanwhile, so threads added to it
    /// are held back until the new space is in place.
    ///
    /// # Errors
    /// [`SchedError::ProcessLocked`] if an exec is already in progress,
    /// [`SchedError::UnknownProcess`], or the address-space failure.
    pub fn replace_address_space(&self, pid: Pid) -> Result<VmmId, KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        sched.lock_process(pid)?;
        let result = swap_space(&mut sched, &mut mm, pid);
        match sched.unlock_process(pid) {
            Ok(0) => {}
            Ok(n) => debug!("kernel: {n} threads of {pid:?} released after exec"),
            Err(e) => warn!("kernel: cannot unlock {pid:?}: {e}"),
        }
        result
    }

    /// Ends the running thread. `frame` receives the next thread's context.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn exit_current(&self, frame: &mut CpuContext) -> Result<(), KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        Ok(sched.exit_current(frame, &mut *mm)?)
    }

    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn yield_now(&self, frame: &mut CpuContext) -> Result<(), KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        Ok(sched.yield_now(frame, &mut *mm)?)
    }

    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn sleep_millis(&self, millis: u64, frame: &mut CpuContext) -> Result<(), KernelError> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        Ok(sched.sleep_millis(millis, frame, &mut *mm)?)
    }

    /// Destroys dead threads and finished processes, releasing their address
    /// spaces. Returns how many threads were destroyed.
    pub fn reap(&self) -> usize {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        let reaped = sched.reap();
        for (pid, vmm) in reaped.processes {
            debug!("kernel: releasing {vmm:?} of {pid:?}");
            release_space(&mut mm, vmm);
        }
        reaped.threads
    }
}

fn swap_space(sched: &mut Scheduler, mm: &mut MemoryManager, pid: Pid) -> Result<VmmId, KernelError> {
    let new = mm.create()?;
    let old = match sched.replace_process_vmm(pid, new) {
        Ok(old) => old,
        Err(e) => {
            release_space(mm, new);
            return Err(e.into());
        }
    };
    if sched.current().is_some_and(|t| t.pid() == pid) {
        mm.switch_to(new)?;
    }
    mm.vmm_unref(old)?;
    info!("kernel: {pid:?} now runs in {new:?}");
    Ok(new)
}

fn release_space(mm: &mut MemoryManager, vmm: VmmId) {
    if let Err(e) = mm.vmm_unref(vmm) {
        warn!("kernel: cannot release {vmm:?}: {e}");
    }
}
