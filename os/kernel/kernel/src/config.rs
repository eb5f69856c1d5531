use kernel_alloc::PhysicalLayout;
use kernel_sched::SchedulerConfig;
use log::LevelFilter;

/// Everything [`Kernel`](crate::Kernel) needs at boot.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Physical RAM and reserved areas.
    pub layout: PhysicalLayout,
    pub scheduler: SchedulerConfig,
    /// Installs the QEMU logger at this level; `None` leaves logging alone.
    pub log_level: Option<LevelFilter>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            layout: PhysicalLayout::default(),
            scheduler: SchedulerConfig::default(),
            log_level: Some(LevelFilter::Info),
        }
    }
}
