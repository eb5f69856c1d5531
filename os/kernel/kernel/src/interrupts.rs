//! # Trap Decoding
//!
//! Turns the status words the CPU reports on a trap into the neutral
//! descriptions the rest of the kernel works with. The low-level entry stubs
//! save a [`CpuContext`](kernel_sched::CpuContext), decode the fault status
//! with this module and call [`Kernel::page_fault`](crate::Kernel::page_fault)
//! or [`Kernel::timer_tick`](crate::Kernel::timer_tick).

pub mod page_fault;

pub use page_fault::{DataFaultStatus, PAGE_FAULT_VECTOR, PageFaultError};
