//! # QEMU Debug Output
//!
//! Routes kernel diagnostics to QEMU's debug console (`-debugcon`), which
//! captures every byte written to I/O port `0x402`:
//!
//! ```bash
//! qemu-system-x86_64 -kernel kernel.bin -debugcon stdio
//! ```
//!
//! Two entry points:
//!
//! * [`QemuLogger`], a [`log::Log`] backend installed once at boot; all crates log
//!   through the `log` macros and end up here.
//! * [`qemu_trace!`], raw `format!`-style output that bypasses the log facade, for
//!   paths that run before the logger is installed or while it cannot be trusted
//!   (panic handler).
//!
//! The port write only exists on bare-metal x86 targets with the `enabled` feature (default).
//! Everywhere else, including hosted test runs, output is discarded.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::new(LevelFilter::Debug).init().expect("logger installed twice");
//! info!("frame allocator ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{LoggerError, QemuLogger};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    #[cfg_attr(
        not(all(feature = "enabled", target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))),
        allow(dead_code)
    )]
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug port.
    #[cfg(all(feature = "enabled", target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    /// No debug port on this target or with output disabled.
    #[cfg(not(all(feature = "enabled", target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
    #[inline]
    pub const fn dbg_putc(_c: u8) {}

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
