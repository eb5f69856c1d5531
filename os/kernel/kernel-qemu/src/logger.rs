use crate::qemu_fmt::QemuSink;
use core::fmt::{self, Write};
use kernel_sync::OnceSlot;
use log::{LevelFilter, Log, Metadata, Record};

/// The installed logger; `log::set_logger` needs a `'static` reference.
static LOGGER: OnceSlot<QemuLogger> = OnceSlot::new();

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LoggerError {
    #[error("a QEMU logger is already installed")]
    AlreadyInstalled,
    #[error("the log facade already has a different logger")]
    Rejected,
}

#[derive(Debug)]
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Installs this logger as the global `log` backend. Call once during boot.
    ///
    /// # Errors
    /// [`LoggerError::AlreadyInstalled`] on a second call,
    /// [`LoggerError::Rejected`] if another logger owns the facade.
    pub fn init(self) -> Result<(), LoggerError> {
        let max_level = self.max_level;
        let logger = LOGGER.set(self).map_err(|_| LoggerError::AlreadyInstalled)?;
        log::set_logger(logger).map_err(|_| LoggerError::Rejected)?;
        log::set_max_level(max_level);
        Ok(())
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

/// Formats one record as `[LEVEL] target: message\n`.
pub(crate) fn write_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut QemuSink, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_format() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::frame_alloc")
                .args(format_args!("double free of {:#x}", 0x2000))
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[WARN] kernel_alloc::frame_alloc: double free of 0x2000\n");
    }

    #[test]
    fn level_filtering() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }

    #[test]
    fn second_install_is_rejected() {
        // Only this test touches the global logger.
        assert_eq!(QemuLogger::new(LevelFilter::Trace).init(), Ok(()));
        assert_eq!(
            QemuLogger::new(LevelFilter::Trace).init(),
            Err(LoggerError::AlreadyInstalled)
        );
    }
}
