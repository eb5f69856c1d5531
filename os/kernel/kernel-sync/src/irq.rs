//! Interrupt masking.

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt-enable flag. If interrupts were
/// enabled it disables them; on drop it re-enables them **only** if they were
/// enabled before, so guards nest.
///
/// # Examples
///
/// ```
/// use kernel_sync::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            were_enabled: arch::save_and_disable(),
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            arch::enable();
        }
    }
}

/// Returns whether interrupts are currently enabled.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::enabled()
}

/// Unconditionally enables interrupts.
///
/// Called once at the end of boot and by the context-switch path when the
/// resumed thread runs with interrupts on.
#[inline]
pub fn enable_interrupts() {
    arch::enable();
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    const RFLAGS_IF: u64 = 1 << 9;

    #[inline]
    fn rflags() -> u64 {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r
    }

    #[inline]
    pub fn enabled() -> bool {
        rflags() & RFLAGS_IF != 0
    }

    #[inline]
    pub fn save_and_disable() -> bool {
        let was = enabled();
        if was {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }
        was
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    use core::sync::atomic::{AtomicBool, Ordering};

    /// Simulated interrupt-enable flag.
    static ENABLED: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn enabled() -> bool {
        ENABLED.load(Ordering::Acquire)
    }

    #[inline]
    pub fn save_and_disable() -> bool {
        ENABLED.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn enable() {
        ENABLED.store(true, Ordering::Release);
    }
}
