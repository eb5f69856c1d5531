use kernel_alloc::VmmError;
use kernel_info::errno::Errno;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::SchedError;
use kernel_vmem::ArchError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error(transparent)]
    Arch(#[from] ArchError),
    /// A user address that is unmapped, outside user space or not accessible
    /// the requested way, even after fault handling.
    #[error("bad user access at {0}")]
    Segv(VirtualAddress),
}

impl KernelError {
    /// The error number reported to user space.
    #[must_use]
    pub fn errno(self) -> Errno {
        match self {
            Self::Vmm(e) => e.errno(),
            Self::Sched(e) => e.errno(),
            Self::Arch(e) => VmmError::from(e).errno(),
            Self::Segv(_) => Errno::EFAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::FrameError;
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_sched::Pid;

    #[test]
    fn errno_follows_the_wrapped_error() {
        let va = VirtualAddress::new(0x1000);
        assert_eq!(KernelError::Segv(va).errno(), Errno::EFAULT);
        assert_eq!(KernelError::from(VmmError::AddressInUse(va)).errno(), Errno::EEXIST);
        assert_eq!(
            KernelError::from(SchedError::ProcessLocked(Pid::new(3))).errno(),
            Errno::EBUSY
        );
        assert_eq!(KernelError::from(ArchError::OutOfMemory).errno(), Errno::ENOMEM);
        assert_eq!(
            KernelError::from(VmmError::from(FrameError::NotAllocated(PhysicalAddress::new(0x2000))))
                .errno(),
            Errno::EINVAL
        );
    }
}
