use crate::error::SchedError;
use crate::signal::SignalState;
use crate::{Thread, ThreadId};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use kernel_alloc::VmmId;
use log::debug;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u64);

impl Pid {
    /// The process owning the kernel threads.
    pub const KERNEL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A process: an address space, its threads and signal state.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    name: String,
    vmm: VmmId,
    threads: Vec<Weak<Thread>>,
    locked: bool,
    deferred: Vec<Arc<Thread>>,
    exited: bool,
    pub(crate) signals: SignalState,
}

impl Process {
    fn new(pid: Pid, name: String, vmm: VmmId) -> Self {
        Self {
            pid,
            name,
            vmm,
            threads: Vec::new(),
            locked: false,
            deferred: Vec::new(),
            exited: false,
            signals: SignalState::default(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address space the threads run in.
    #[must_use]
    pub const fn vmm(&self) -> VmmId {
        self.vmm
    }

    /// Swaps in a new address space and returns the old one.
    pub(crate) const fn replace_vmm(&mut self, vmm: VmmId) -> VmmId {
        core::mem::replace(&mut self.vmm, vmm)
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether the process was killed.
    #[must_use]
    pub const fn has_exited(&self) -> bool {
        self.exited
    }

    pub(crate) const fn mark_exited(&mut self) {
        self.exited = true;
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalState {
        &self.signals
    }

    /// Threads that are still alive somewhere.
    pub fn threads(&self) -> impl Iterator<Item = Arc<Thread>> + '_ {
        self.threads.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn attach(&mut self, thread: &Arc<Thread>) {
        self.threads.push(Arc::downgrade(thread));
    }

    /// Forgets destroyed threads and returns how many remain.
    pub(crate) fn prune(&mut self) -> usize {
        self.threads.retain(|t| t.strong_count() > 0);
        self.threads.len()
    }

    pub(crate) fn defer(&mut self, thread: Arc<Thread>) {
        self.deferred.push(thread);
    }

    pub(crate) fn remove_deferred(&mut self, id: ThreadId) -> Option<Arc<Thread>> {
        let pos = self.deferred.iter().position(|t| t.id() == id)?;
        Some(self.deferred.remove(pos))
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Arc<Thread>> {
        core::mem::take(&mut self.deferred)
    }
}

/// All processes, keyed by pid.
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: BTreeMap<Pid, Process>,
    next_pid: u64,
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    /// Registers a process running in `vmm`.
    pub fn create(&mut self, name: impl Into<String>, vmm: VmmId) -> Pid {
        let pid = Pid::new(self.next_pid);
        self.next_pid += 1;
        self.insert(pid, name.into(), vmm);
        pid
    }

    /// Registers the kernel process under [`Pid::KERNEL`].
    pub(crate) fn create_kernel(&mut self, vmm: VmmId) -> Pid {
        self.insert(Pid::KERNEL, String::from("kernel"), vmm);
        Pid::KERNEL
    }

    fn insert(&mut self, pid: Pid, name: String, vmm: VmmId) {
        debug!("sched: process {pid:?} '{name}' in {vmm:?}");
        self.processes.insert(pid, Process::new(pid, name, vmm));
    }

    /// A child of `parent` running in `vmm`, inheriting its name and signal
    /// dispositions (pending signals are not inherited).
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn fork(&mut self, parent: Pid, vmm: VmmId) -> Result<Pid, SchedError> {
        let parent = self.lookup(parent).ok_or(SchedError::UnknownProcess(parent))?;
        let name = parent.name.clone();
        let mut signals = parent.signals.clone();
        signals.clear_pending();

        let pid = self.create(name, vmm);
        if let Some(child) = self.processes.get_mut(&pid) {
            child.signals = signals;
        }
        Ok(pid)
    }

    #[must_use]
    pub fn lookup(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn lookup_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Result<&mut Process, SchedError> {
        self.processes
            .get_mut(&pid)
            .ok_or(SchedError::UnknownProcess(pid))
    }

    pub(crate) fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.processes.remove(&pid)
    }

    /// Keeps the threads of `pid` off the run queues (exec in progress).
    ///
    /// # Errors
    /// [`SchedError::ProcessLocked`] if already locked.
    pub fn lock(&mut self, pid: Pid) -> Result<(), SchedError> {
        let process = self.get_mut(pid)?;
        if process.locked {
            return Err(SchedError::ProcessLocked(pid));
        }
        process.locked = true;
        Ok(())
    }

    /// Unlocks `pid` and returns the threads whose enqueue was deferred.
    ///
    /// # Errors
    /// [`SchedError::UnknownProcess`].
    pub fn unlock(&mut self, pid: Pid) -> Result<Vec<Arc<Thread>>, SchedError> {
        let process = self.get_mut(pid)?;
        process.locked = false;
        Ok(process.take_deferred())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
