//! Per-process signal bookkeeping.
//!
//! Signals are queued on a process and acted on just before one of its threads
//! resumes. Building the user-mode handler frame belongs to the architecture
//! layer; delivery here only redirects the saved program counter.

use bitflags::bitflags;

use crate::CpuContext;
use crate::error::SchedError;

/// Signal numbers as seen by user space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT = 2,
    SIGQUIT = 3,
    SIGILL = 4,
    SIGTRAP = 5,
    SIGABRT = 6,
    SIGBUS = 7,
    SIGFPE = 8,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGSEGV = 11,
    SIGUSR2 = 12,
    SIGPIPE = 13,
    SIGALRM = 14,
    SIGTERM = 15,
    SIGCHLD = 17,
}

impl Signal {
    const ALL: [Self; 16] = [
        Self::SIGHUP,
        Self::SIGINT,
        Self::SIGQUIT,
        Self::SIGILL,
        Self::SIGTRAP,
        Self::SIGABRT,
        Self::SIGBUS,
        Self::SIGFPE,
        Self::SIGKILL,
        Self::SIGUSR1,
        Self::SIGSEGV,
        Self::SIGUSR2,
        Self::SIGPIPE,
        Self::SIGALRM,
        Self::SIGTERM,
        Self::SIGCHLD,
    ];

    #[must_use]
    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as u8 == number)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Whether the disposition of this signal can be changed.
    #[must_use]
    pub const fn is_catchable(self) -> bool {
        !matches!(self, Self::SIGKILL)
    }

    /// Whether the default action is to do nothing.
    #[must_use]
    pub const fn ignored_by_default(self) -> bool {
        matches!(self, Self::SIGCHLD)
    }
}

bitflags! {
    /// Pending signals of a process, one bit per signal number.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct SignalSet: u32 {
        const SIGHUP = 1 << 1;
        const SIGINT = 1 << 2;
        const SIGQUIT = 1 << 3;
        const SIGILL = 1 << 4;
        const SIGTRAP = 1 << 5;
        const SIGABRT = 1 << 6;
        const SIGBUS = 1 << 7;
        const SIGFPE = 1 << 8;
        const SIGKILL = 1 << 9;
        const SIGUSR1 = 1 << 10;
        const SIGSEGV = 1 << 11;
        const SIGUSR2 = 1 << 12;
        const SIGPIPE = 1 << 13;
        const SIGALRM = 1 << 14;
        const SIGTERM = 1 << 15;
        const SIGCHLD = 1 << 17;
    }
}

impl From<Signal> for SignalSet {
    fn from(signal: Signal) -> Self {
        Self::from_bits_retain(1 << signal.number())
    }
}

impl SignalSet {
    /// Removes and returns the lowest-numbered pending signal.
    pub fn pop(&mut self) -> Option<Signal> {
        while !self.is_empty() {
            let number = self.bits().trailing_zeros();
            self.remove(Self::from_bits_retain(1 << number));
            if let Some(signal) = u8::try_from(number).ok().and_then(Signal::from_number) {
                return Some(signal);
            }
        }
        None
    }
}

/// What a process does when a signal arrives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Disposition {
    #[default]
    Default,
    Ignore,
    /// Resume at this user-space entry point with the signal number as the
    /// first argument.
    Handler(u64),
}

/// Handlers and pending set of one process.
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    pending: SignalSet,
    dispositions: [Disposition; 32],
}

/// Result of [`SignalState::deliver_pending`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Delivery {
    /// Nothing (left) to act on.
    None,
    /// The thread's context now enters the handler for this signal.
    Handler(Signal),
    /// The default action terminates the process.
    Terminate(Signal),
}

impl SignalState {
    pub fn raise(&mut self, signal: Signal) {
        self.pending.insert(signal.into());
    }

    /// Raises a signal the process may not ignore, as for a synchronous trap.
    /// An `Ignore` disposition falls back to the default action; a handler
    /// stays in place.
    pub fn force(&mut self, signal: Signal) {
        let slot = &mut self.dispositions[signal as usize];
        if *slot == Disposition::Ignore {
            *slot = Disposition::Default;
        }
        self.raise(signal);
    }

    #[must_use]
    pub const fn pending(&self) -> SignalSet {
        self.pending
    }

    pub(crate) const fn clear_pending(&mut self) {
        self.pending = SignalSet::empty();
    }

    #[must_use]
    pub const fn disposition(&self, signal: Signal) -> Disposition {
        self.dispositions[signal as usize]
    }

    /// # Errors
    /// [`SchedError::Uncatchable`] for `SIGKILL`.
    pub const fn set_disposition(
        &mut self,
        signal: Signal,
        disposition: Disposition,
    ) -> Result<(), SchedError> {
        if !signal.is_catchable() {
            return Err(SchedError::Uncatchable(signal));
        }
        self.dispositions[signal as usize] = disposition;
        Ok(())
    }

    /// Acts on pending signals, lowest number first, until one needs the
    /// thread (handler entry or termination) or none are left. Ignored signals
    /// are consumed on the way.
    pub fn deliver_pending(&mut self, context: &mut CpuContext) -> Delivery {
        while let Some(signal) = self.pending.pop() {
            match self.disposition(signal) {
                Disposition::Ignore => {}
                Disposition::Default if signal.ignored_by_default() => {}
                Disposition::Default => return Delivery::Terminate(signal),
                Disposition::Handler(entry) => {
                    context.pc = entry;
                    context.args[0] = u64::from(signal.number());
                    return Delivery::Handler(signal);
                }
            }
        }
        Delivery::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_signals_pop_lowest_first() {
        let mut set = SignalSet::empty();
        set.insert(Signal::SIGTERM.into());
        set.insert(Signal::SIGINT.into());
        set.insert(Signal::SIGCHLD.into());
        assert!(set.contains(SignalSet::SIGINT));
        assert_eq!(SignalSet::from(Signal::SIGCHLD), SignalSet::SIGCHLD);

        assert_eq!(set.pop(), Some(Signal::SIGINT));
        assert_eq!(set.pop(), Some(Signal::SIGTERM));
        assert_eq!(set.pop(), Some(Signal::SIGCHLD));
        assert_eq!(set.pop(), None);
        assert!(set.is_empty());
    }

    #[test]
    fn numbers_round_trip() {
        for s in Signal::ALL {
            assert_eq!(Signal::from_number(s.number()), Some(s));
        }
        assert_eq!(Signal::from_number(16), None);
        assert_eq!(Signal::from_number(0), None);
    }

    #[test]
    fn ignored_signals_are_skipped_until_a_handler() {
        let mut state = SignalState::default();
        state
            .set_disposition(Signal::SIGUSR1, Disposition::Ignore)
            .unwrap();
        state
            .set_disposition(Signal::SIGUSR2, Disposition::Handler(0x40_1000))
            .unwrap();
        state.raise(Signal::SIGUSR1);
        state.raise(Signal::SIGUSR2);
        state.raise(Signal::SIGCHLD);
        state.raise(Signal::SIGTERM);

        let mut ctx = CpuContext::user(0x40_0000, 0x7000);
        assert_eq!(state.deliver_pending(&mut ctx), Delivery::Handler(Signal::SIGUSR2));
        assert_eq!(ctx.pc, 0x40_1000);
        assert_eq!(ctx.args[0], 12);

        assert_eq!(state.deliver_pending(&mut ctx), Delivery::Terminate(Signal::SIGTERM));
        assert_eq!(state.deliver_pending(&mut ctx), Delivery::None);
    }

    #[test]
    fn forced_signal_overrides_ignore() {
        let mut state = SignalState::default();
        state
            .set_disposition(Signal::SIGSEGV, Disposition::Ignore)
            .unwrap();
        state.force(Signal::SIGSEGV);
        assert_eq!(state.disposition(Signal::SIGSEGV), Disposition::Default);

        let mut ctx = CpuContext::user(0x40_0000, 0x7000);
        assert_eq!(state.deliver_pending(&mut ctx), Delivery::Terminate(Signal::SIGSEGV));
    }

    #[test]
    fn forced_signal_keeps_a_handler() {
        let mut state = SignalState::default();
        state
            .set_disposition(Signal::SIGSEGV, Disposition::Handler(0x40_2000))
            .unwrap();
        state.force(Signal::SIGSEGV);

        let mut ctx = CpuContext::user(0x40_0000, 0x7000);
        assert_eq!(state.deliver_pending(&mut ctx), Delivery::Handler(Signal::SIGSEGV));
        assert_eq!(ctx.pc, 0x40_2000);
    }

    #[test]
    fn sigkill_cannot_be_caught() {
        let mut state = SignalState::default();
        assert_eq!(
            state.set_disposition(Signal::SIGKILL, Disposition::Ignore),
            Err(SchedError::Uncatchable(Signal::SIGKILL))
        );
        assert_eq!(state.disposition(Signal::SIGKILL), Disposition::Default);
    }
}
