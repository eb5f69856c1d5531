//! # Error Numbers

/// POSIX-style error numbers.
///
/// Values match the Linux generic numbering so user space can share headers.
#[repr(i32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Errno {
    /// No such process.
    ESRCH = 3,
    /// Out of memory.
    ENOMEM = 12,
    /// Bad address.
    EFAULT = 14,
    /// Device or resource busy.
    EBUSY = 16,
    /// File exists; used for address ranges already claimed.
    EEXIST = 17,
    /// Invalid argument.
    EINVAL = 22,
    /// Value too large for defined data type.
    EOVERFLOW = 75,
}

impl Errno {
    /// The negative value returned from a syscall.
    #[inline]
    #[must_use]
    pub const fn as_syscall_return(self) -> isize {
        -(self as i32 as isize)
    }
}
