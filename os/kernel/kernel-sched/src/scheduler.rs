use crate::context::{AddressSpaceSwitch, context_switch};
use crate::error::SchedError;
use crate::process::{Process, ProcessTable};
use crate::run_queue::RunQueues;
use crate::signal::{Delivery, Disposition, Signal};
use crate::sleep::SleepQueue;
use crate::{CpuContext, Pid, Priority, Thread, ThreadId, ThreadKind, ThreadState, WaitQueue};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_alloc::VmmId;
use kernel_info::sched::{DEFAULT_QUANTUM_TICKS, PRIORITY_LEVELS, TICK_MILLIS, millis_to_ticks};
use log::{debug, info, trace, warn};

/// Time slicing policy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SchedulerConfig {
    /// Ticks a thread runs before it may be preempted, per priority level.
    pub quantum_ticks: [u32; PRIORITY_LEVELS],
    /// Length of one timer tick.
    pub tick_millis: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_ticks: DEFAULT_QUANTUM_TICKS,
            tick_millis: TICK_MILLIS,
        }
    }
}

impl SchedulerConfig {
    /// Quantum of `priority`, at least one tick.
    #[must_use]
    pub const fn quantum(&self, priority: Priority) -> u32 {
        let ticks = self.quantum_ticks[priority.index()];
        if ticks == 0 { 1 } else { ticks }
    }
}

/// Outcome of [`Scheduler::reap`].
#[derive(Debug, Default)]
pub struct Reaped {
    /// Threads destroyed.
    pub threads: usize,
    /// Processes left without threads, with the address space they held.
    pub processes: Vec<(Pid, VmmId)>,
}

/// Uniprocessor priority scheduler.
///
/// Five FIFO levels, highest first. The timer tick drives preemption; blocking
/// calls hand the CPU over directly. Every operation that changes which thread
/// runs takes the trap frame of the running thread and leaves the frame of the
/// next one in its place.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    queues: RunQueues,
    current: Option<Arc<Thread>>,
    processes: ProcessTable,
    sleepers: SleepQueue,
    dead: Vec<Arc<Thread>>,
    jiffies: u64,
    next_tid: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queues: RunQueues::new(),
            current: None,
            processes: ProcessTable::new(),
            sleepers: SleepQueue::default(),
            dead: Vec::new(),
            jiffies: 0,
            next_tid: 1,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Ticks since start.
    #[must_use]
    pub const fn jiffies(&self) -> u64 {
        self.jiffies
    }

    /// The running thread.
    #[must_use]
    pub const fn current(&self) -> Option<&Arc<Thread>> {
        self.current.as_ref()
    }

    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    #[must_use]
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.lookup(pid)
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.queues.len()
    }

    /// Threads waiting for the reaper.
    #[must_use]
    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn create_kernel_process(&mut self, vmm: VmmId) -> Pid {
        self.processes.create_kernel(vmm)
    }

    pub fn create_process(&mut self, name: impl Into<String>, vmm: VmmId) -> Pid {
        self.processes.create(name, vmm)
    }

    /// See [`ProcessTable::fork`].
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn fork_process(&mut self, parent: Pid, vmm: VmmId) -> Result<Pid, SchedError> {
        self.processes.fork(parent, vmm)
    }

    /// Creates a thread in `pid`. The thread is not runnable until passed to
    /// [`add_thread`](Self::add_thread).
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`] if `pid` does not exist or has exited.
    pub fn spawn(
        &mut self,
        pid: Pid,
        name: impl Into<String>,
        priority: Priority,
        kind: ThreadKind,
        context: CpuContext,
    ) -> Result<Arc<Thread>, SchedError> {
        let process = self.processes.get_mut(pid)?;
        if process.has_exited() {
            return Err(SchedError::UnknownProcess(pid));
        }

        let id = ThreadId::new(self.next_tid);
        self.next_tid += 1;
        let thread = Arc::new(Thread::new(id, pid, name, priority, kind, context));
        process.attach(&thread);
        debug!(
            "sched: spawned {id:?} '{}' in {pid:?} at priority {}",
            thread.name(),
            priority.level()
        );
        Ok(thread)
    }

    /// Marks `thread` ready and appends it to its level. Threads of a locked
    /// process are held back until [`unlock_process`](Self::unlock_process).
    ///
    /// # Errors
    /// [`SchedError::ThreadDead`], [`SchedError::UnknownProcess`].
    pub fn add_thread(&mut self, thread: Arc<Thread>) -> Result<(), SchedError> {
        if thread.state() == ThreadState::Dead {
            return Err(SchedError::ThreadDead(thread.id()));
        }
        let process = self.processes.get_mut(thread.pid())?;
        thread.set_state(ThreadState::Ready);
        if process.is_locked() {
            trace!("sched: {:?} deferred, {:?} is locked", thread.id(), thread.pid());
            process.defer(thread);
            return Ok(());
        }
        self.queues.push(thread);
        Ok(())
    }

    /// Takes `id` off the ready path.
    ///
    /// # Errors
    /// [`SchedError::NotQueued`] if the thread is not waiting to run.
    pub fn remove_thread(&mut self, id: ThreadId) -> Result<Arc<Thread>, SchedError> {
        if let Some(thread) = self.queues.remove(id) {
            return Ok(thread);
        }
        self.processes
            .iter_mut()
            .find_map(|p| p.remove_deferred(id))
            .ok_or(SchedError::NotQueued(id))
    }

    /// Takes every thread of `pid` off the ready path; returns how many.
    pub fn remove_process(&mut self, pid: Pid) -> usize {
        let deferred = self
            .processes
            .lookup_mut(pid)
            .map_or(0, |p| p.take_deferred().len());
        deferred + self.queues.remove_process(pid).len()
    }

    /// Dequeues the thread that runs next.
    pub fn next_thread(&mut self) -> Option<Arc<Thread>> {
        self.queues.pop()
    }

    /// # Errors
    /// [`SchedError::ProcessLocked`], [`SchedError::UnknownProcess`].
    pub fn lock_process(&mut self, pid: Pid) -> Result<(), SchedError> {
        self.processes.lock(pid)
    }

    /// Unlocks `pid` and enqueues the threads held back meanwhile; returns how
    /// many.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn unlock_process(&mut self, pid: Pid) -> Result<usize, SchedError> {
        let mut count = 0;
        for thread in self.processes.unlock(pid)? {
            if self.add_thread(thread).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    #[must_use]
    pub fn vmm_of(&self, pid: Pid) -> Option<VmmId> {
        self.processes.lookup(pid).map(Process::vmm)
    }

    /// Points `pid` at a new address space; returns the previous one.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn replace_process_vmm(&mut self, pid: Pid, vmm: VmmId) -> Result<VmmId, SchedError> {
        Ok(self.processes.get_mut(pid)?.replace_vmm(vmm))
    }

    /// Timer bookkeeping: advances time, wakes expired sleepers and charges the
    /// running thread one tick.
    pub fn time_tick(&mut self) {
        self.jiffies += 1;
        for thread in self.sleepers.expire(self.jiffies) {
            if thread.state() != ThreadState::Sleeping {
                continue;
            }
            let id = thread.id();
            if let Err(e) = self.add_thread(thread) {
                warn!("sched: cannot wake {id:?}: {e}");
            }
        }
        if let Some(current) = &self.current {
            current.consume_tick();
        }
    }

    /// Preemption point of the timer tick.
    ///
    /// Switches when nothing is running, when the running thread gave up the
    /// CPU, or when it is preemptible and its quantum has run out; in the last
    /// case it goes back to the tail of its own level. Returns the thread now
    /// in `frame` if a switch happened.
    pub fn schedule(
        &mut self,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Option<ThreadId> {
        let prev = match self.current.take() {
            Some(current) if current.state() == ThreadState::Running => {
                if !current.is_preemptible(frame) || current.ticks_left() > 0 {
                    self.current = Some(current);
                    return None;
                }
                current.set_context(*frame);
                if let Err(e) = self.add_thread(Arc::clone(&current)) {
                    warn!("sched: cannot requeue {:?}: {e}", current.id());
                }
                Some(current)
            }
            Some(current) => {
                if current.state() != ThreadState::Dead {
                    current.set_context(*frame);
                }
                Some(current)
            }
            None => None,
        };
        self.dispatch(prev, frame, spaces)
    }

    /// Resumes the next ready thread in `frame`, acting on its process's pending
    /// signals first.
    fn dispatch(
        &mut self,
        prev: Option<Arc<Thread>>,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Option<ThreadId> {
        while let Some(next) = self.queues.pop() {
            let Some(process) = self.processes.lookup_mut(next.pid()) else {
                warn!("sched: {:?} has no process", next.id());
                continue;
            };
            let vmm = process.vmm();

            let mut context = next.context();
            match process.signals.deliver_pending(&mut context) {
                Delivery::Terminate(signal) => {
                    info!("sched: {:?} terminated by {signal:?}", next.pid());
                    if let Err(e) = self.kill_process(next.pid()) {
                        warn!("sched: kill of {:?} failed: {e}", next.pid());
                    }
                    continue;
                }
                Delivery::Handler(signal) => {
                    debug!("sched: {:?} enters handler for {signal:?}", next.id());
                    next.set_context(context);
                }
                Delivery::None => {}
            }

            next.start_quantum(self.config.quantum(next.priority()));
            context_switch(prev.as_deref(), &next, vmm, frame, spaces);
            let id = next.id();
            self.current = Some(next);
            return Some(id);
        }

        trace!("sched: nothing to run");
        None
    }

    /// Gives up the CPU if a thread above the idle level is ready.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn yield_now(
        &mut self,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Result<(), SchedError> {
        let current = Arc::clone(self.current.as_ref().ok_or(SchedError::NoCurrentThread)?);
        if self.queues.only_idle_ready() {
            return Ok(());
        }
        current.set_context(*frame);
        self.add_thread(Arc::clone(&current))?;
        self.current = None;
        self.dispatch(Some(current), frame, spaces);
        Ok(())
    }

    fn block_current(
        &mut self,
        state: ThreadState,
        frame: &CpuContext,
    ) -> Result<Arc<Thread>, SchedError> {
        let current = self.current.take().ok_or(SchedError::NoCurrentThread)?;
        current.set_context(*frame);
        current.set_state(state);
        Ok(current)
    }

    /// Puts the running thread to sleep for at least `millis` and switches away.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn sleep_millis(
        &mut self,
        millis: u64,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Result<(), SchedError> {
        let ticks = millis_to_ticks(millis, self.config.tick_millis);
        let current = self.block_current(ThreadState::Sleeping, frame)?;
        self.sleepers.push(self.jiffies + ticks, Arc::clone(&current));
        trace!("sched: {:?} sleeps {ticks} ticks", current.id());
        self.dispatch(Some(current), frame, spaces);
        Ok(())
    }

    /// Blocks the running thread on `queue` and switches away.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn wait(
        &mut self,
        queue: &mut WaitQueue,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Result<(), SchedError> {
        let current = self.block_current(ThreadState::Blocked, frame)?;
        queue.push(Arc::clone(&current));
        self.dispatch(Some(current), frame, spaces);
        Ok(())
    }

    /// Makes the first live waiter of `queue` ready. Dead waiters are dropped.
    pub fn wake_one(&mut self, queue: &mut WaitQueue) -> bool {
        while let Some(thread) = queue.pop() {
            if thread.state() != ThreadState::Dead && self.add_thread(thread).is_ok() {
                return true;
            }
        }
        false
    }

    /// Makes every live waiter of `queue` ready; returns how many.
    pub fn wake_all(&mut self, queue: &mut WaitQueue) -> usize {
        let mut woken = 0;
        while self.wake_one(queue) {
            woken += 1;
        }
        woken
    }

    /// Terminates the running thread and switches away. The thread is reaped
    /// later; the last thread to exit ends its process.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn exit_current(
        &mut self,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Result<(), SchedError> {
        let current = self.current.take().ok_or(SchedError::NoCurrentThread)?;
        self.mark_dead(&current);
        if let Some(process) = self.processes.lookup_mut(current.pid())
            && process.threads().all(|t| t.state() == ThreadState::Dead)
        {
            process.mark_exited();
            info!("sched: {:?} exited", process.pid());
        }
        self.dispatch(Some(current), frame, spaces);
        Ok(())
    }

    fn mark_dead(&mut self, thread: &Arc<Thread>) {
        if thread.state() == ThreadState::Dead {
            return;
        }
        thread.set_state(ThreadState::Dead);
        self.dead.push(Arc::clone(thread));
        debug!("sched: {:?} is dead", thread.id());
    }

    /// Kills every thread of `pid`; returns how many were still alive.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn kill_process(&mut self, pid: Pid) -> Result<usize, SchedError> {
        let process = self.processes.get_mut(pid)?;
        process.mark_exited();
        drop(process.take_deferred());
        let threads: Vec<Arc<Thread>> = process.threads().collect();

        self.queues.remove_process(pid);
        self.sleepers.retain(|t| t.pid() != pid);
        let mut killed = 0;
        for thread in &threads {
            if thread.state() != ThreadState::Dead {
                self.mark_dead(thread);
                killed += 1;
            }
        }
        info!("sched: killed {pid:?} ({killed} threads)");
        Ok(killed)
    }

    /// Queues `signal` on `pid`; it takes effect when one of its threads resumes.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn send_signal(&mut self, pid: Pid, signal: Signal) -> Result<(), SchedError> {
        self.processes.get_mut(pid)?.signals.raise(signal);
        debug!("sched: {signal:?} queued on {pid:?}");
        Ok(())
    }

    /// Queues a signal raised by a trap in `pid`. An ignored disposition is
    /// reset to the default action so the faulting thread cannot resume
    /// unchanged.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn force_signal(&mut self, pid: Pid, signal: Signal) -> Result<(), SchedError> {
        self.processes.get_mut(pid)?.signals.force(signal);
        debug!("sched: {signal:?} forced on {pid:?}");
        Ok(())
    }

    /// # Errors
    /// [`SchedError::UnknownProcess`], [`SchedError::Uncatchable`].
    pub fn set_signal_disposition(
        &mut self,
        pid: Pid,
        signal: Signal,
        disposition: Disposition,
    ) -> Result<(), SchedError> {
        self.processes
            .get_mut(pid)?
            .signals
            .set_disposition(signal, disposition)
    }

    /// Acts on the running thread's pending signals right away: a handler
    /// redirects `frame`, a terminating signal kills the process and switches
    /// to the next thread.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`].
    pub fn deliver_current(
        &mut self,
        frame: &mut CpuContext,
        spaces: &mut dyn AddressSpaceSwitch,
    ) -> Result<Delivery, SchedError> {
        let pid = self
            .current
            .as_ref()
            .map(|t| t.pid())
            .ok_or(SchedError::NoCurrentThread)?;
        let delivery = self.processes.get_mut(pid)?.signals.deliver_pending(frame);
        if let Delivery::Terminate(signal) = delivery {
            info!("sched: {pid:?} terminated by {signal:?}");
            self.kill_process(pid)?;
            let prev = self.current.take();
            self.dispatch(prev, frame, spaces);
        }
        Ok(delivery)
    }

    /// Destroys dead threads nobody else references any more, then removes
    /// exited processes whose threads are all gone.
    pub fn reap(&mut self) -> Reaped {
        let mut reaped = Reaped::default();
        self.dead.retain(|thread| {
            if Arc::strong_count(thread) > 1 {
                return true;
            }
            trace!("sched: reaping {:?}", thread.id());
            reaped.threads += 1;
            false
        });

        let finished: Vec<Pid> = self
            .processes
            .iter_mut()
            .filter(|p| p.pid() != Pid::KERNEL && p.has_exited())
            .filter_map(|p| (p.prune() == 0).then_some(p.pid()))
            .collect();
        for pid in finished {
            if let Some(process) = self.processes.remove(pid) {
                info!("sched: process {pid:?} released");
                reaped.processes.push((pid, process.vmm()));
            }
        }
        reaped
    }
}
