use crate::config::KernelConfig;
use crate::error::KernelError;
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_alloc::{FrameAllocator, MemoryManager, VmmId};
use kernel_memory_addresses::VirtualAddress;
use kernel_qemu::{LoggerError, QemuLogger};
use kernel_sched::{CpuContext, Pid, Priority, Scheduler, Signal, Thread, ThreadId, ThreadKind};
use kernel_sync::IrqLock;
use kernel_vmem::soft::{HostedRam, SoftMmu};
use kernel_vmem::{FaultFlags, PhysMapper, VmmInterface};
use log::{debug, error, info, warn};

/// Root kernel context.
///
/// Lock order: `sched` before `mm`. Every method that needs both takes them
/// in that order.
pub struct Kernel {
    pub(crate) frames: Arc<FrameAllocator>,
    pub(crate) mm: IrqLock<MemoryManager>,
    pub(crate) sched: IrqLock<Scheduler>,
    kernel_vmm: VmmId,
    kernel_pid: Pid,
    idle: ThreadId,
    config: KernelConfig,
}

/// Body of the idle thread.
fn idle_loop() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

impl Kernel {
    /// Brings up memory management and scheduling.
    ///
    /// `backend` receives the frame allocator (for page-table frames) and
    /// returns the paging backend; it is registered once and used for the
    /// lifetime of the kernel. Boot ends with the kernel address space active
    /// and the idle thread ready; the first [`timer_tick`](Self::timer_tick)
    /// dispatches.
    ///
    /// # Errors
    /// [`KernelError::Vmm`] if the kernel address space cannot be created.
    pub fn boot(
        config: KernelConfig,
        phys: Arc<dyn PhysMapper>,
        backend: impl FnOnce(Arc<FrameAllocator>) -> Box<dyn VmmInterface>,
    ) -> Result<Self, KernelError> {
        if let Some(level) = config.log_level {
            match QemuLogger::new(level).init() {
                Ok(()) => {}
                Err(LoggerError::AlreadyInstalled) => debug!("kernel: logger already installed"),
                Err(e) => warn!("kernel: {e}"),
            }
        }

        let frames = Arc::new(FrameAllocator::new(&config.layout));
        let mut mm = MemoryManager::new(Arc::clone(&frames), phys, backend(Arc::clone(&frames)));
        let kernel_vmm = mm.create()?;
        mm.switch_to(kernel_vmm)?;

        let mut sched = Scheduler::new(config.scheduler);
        let kernel_pid = sched.create_kernel_process(kernel_vmm);
        let idle = spawn_kernel(&mut sched, kernel_pid, "idle", idle_loop, Priority::IDLE)?;

        info!(
            "kernel: booted with {} free frames, kernel space {kernel_vmm:?}",
            frames.free_count()
        );
        Ok(Self {
            frames,
            mm: IrqLock::new(mm),
            sched: IrqLock::new(sched),
            kernel_vmm,
            kernel_pid,
            idle,
            config,
        })
    }

    /// Boots on the software MMU over simulated RAM covering `config.layout`.
    ///
    /// # Errors
    /// See [`boot`](Self::boot).
    pub fn hosted(config: KernelConfig) -> Result<Self, KernelError> {
        let ram = Arc::new(HostedRam::new(config.layout.ram_start, config.layout.ram_size));
        let phys: Arc<dyn PhysMapper> = ram.clone();
        Self::boot(config, phys, move |frames| -> Box<dyn VmmInterface> {
            Box::new(SoftMmu::new(frames, ram))
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    #[must_use]
    pub const fn kernel_vmm(&self) -> VmmId {
        self.kernel_vmm
    }

    #[must_use]
    pub const fn kernel_pid(&self) -> Pid {
        self.kernel_pid
    }

    #[must_use]
    pub const fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    /// Runs `f` with the memory manager locked.
    pub fn with_mm<R>(&self, f: impl FnOnce(&mut MemoryManager) -> R) -> R {
        self.mm.with_lock(f)
    }

    /// Runs `f` with the scheduler locked.
    pub fn with_sched<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        self.sched.with_lock(f)
    }

    #[must_use]
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.sched.lock().current().cloned()
    }

    /// Timer interrupt: advances time and preempts the running thread once its
    /// quantum is used up. `frame` is the interrupted context and receives the
    /// context to return to.
    pub fn timer_tick(&self, frame: &mut CpuContext) -> Option<ThreadId> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        sched.time_tick();
        sched.schedule(frame, &mut *mm)
    }

    /// Page-fault trap.
    ///
    /// Returns the address to retry after a successful fixup. An unresolved
    /// fault from user mode forces `SIGSEGV` on the faulting process (an
    /// `Ignore` disposition does not apply) and acts on it immediately, so
    /// `frame` may afterwards hold another thread. An
    /// unresolved fault from kernel mode is fatal.
    pub fn page_fault(
        &self,
        frame: &mut CpuContext,
        addr: VirtualAddress,
        flags: FaultFlags,
    ) -> Option<VirtualAddress> {
        let mut sched = self.sched.lock();
        let mut mm = self.mm.lock();
        if let Some(retry) = mm.handle_page_fault(addr, flags) {
            return Some(retry);
        }

        let current = sched.current().map(|t| (t.id(), t.pid()));
        let Some((tid, pid)) = current.filter(|_| flags.contains(FaultFlags::USER)) else {
            error!("kernel: unresolved kernel-mode page fault at {addr} ({flags:?})");
            panic!("unresolved kernel-mode page fault at {addr}");
        };

        warn!("kernel: segmentation fault in {tid:?} of {pid:?} at {addr} ({flags:?})");
        if let Err(e) = sched.force_signal(pid, Signal::SIGSEGV) {
            warn!("kernel: cannot signal {pid:?}: {e}");
        } else if let Err(e) = sched.deliver_current(frame, &mut *mm) {
            warn!("kernel: cannot deliver SIGSEGV to {tid:?}: {e}");
        }
        None
    }
}

/// Creates a ready kernel thread running `entry` on its own kernel stack.
pub(crate) fn spawn_kernel(
    sched: &mut Scheduler,
    pid: Pid,
    name: &str,
    entry: fn() -> !,
    priority: Priority,
) -> Result<ThreadId, KernelError> {
    let thread = sched.spawn(pid, name, priority, ThreadKind::Kernel, CpuContext::default())?;
    thread.set_context(CpuContext::kernel(entry as usize as u64, thread.kernel_stack_top()));
    let id = thread.id();
    sched.add_thread(thread)?;
    Ok(id)
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("kernel_vmm", &self.kernel_vmm)
            .field("kernel_pid", &self.kernel_pid)
            .field("free_frames", &self.frames.free_count())
            .finish_non_exhaustive()
    }
}
