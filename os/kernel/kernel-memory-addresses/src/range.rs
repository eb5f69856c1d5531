use crate::{PAGE_SIZE, VirtualAddress};
use core::fmt;

/// A half-open virtual range `[start, start + size)`.
///
/// Construction checks that the end does not wrap around, so [`end`](Self::end)
/// is always representable.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    size: u64,
}

impl VirtualRange {
    /// Returns `None` when `start + size` overflows.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, size: u64) -> Option<Self> {
        match start.checked_add(size) {
            Some(_) => Some(Self { start, size }),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.start.as_u64() + self.size)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(&self) -> bool {
        self.start.is_page_aligned() && self.size % PAGE_SIZE == 0
    }

    /// Number of whole pages covered (size divided by the page size).
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.size / PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end().as_u64()
    }

    #[inline]
    #[must_use]
    /// Empty ranges overlap nothing.
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end().as_u64()
            && other.start.as_u64() < self.end().as_u64()
    }

    /// Base address of every page in the range, in ascending order.
    pub fn page_addresses(&self) -> impl Iterator<Item = VirtualAddress> + use<> {
        let start = self.start.as_u64();
        (0..self.pages()).map(move |i| VirtualAddress::new(start + i * PAGE_SIZE))
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VirtualRange(0x{:016X}..0x{:016X})",
            self.start.as_u64(),
            self.end().as_u64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, size: u64) -> VirtualRange {
        VirtualRange::new(VirtualAddress::new(start), size).unwrap()
    }

    #[test]
    fn contains_is_half_open() {
        let r = range(0x1000, 0x2000);
        assert!(!r.contains(VirtualAddress::new(0x0FFF)));
        assert!(r.contains(VirtualAddress::new(0x1000)));
        assert!(r.contains(VirtualAddress::new(0x2FFF)));
        assert!(!r.contains(VirtualAddress::new(0x3000)));
    }

    #[test]
    fn overlap_detection() {
        let a = range(0x1000, 0x2000);
        assert!(a.overlaps(&range(0x2000, 0x1000)));
        assert!(a.overlaps(&range(0x0000, 0x1001)));
        assert!(!a.overlaps(&range(0x3000, 0x1000)));
        assert!(!a.overlaps(&range(0x0000, 0x1000)));
        assert!(!a.overlaps(&range(0x1800, 0)));
        assert!(!range(0x1800, 0).overlaps(&a));
        assert!(!range(0x1800, 0).overlaps(&range(0x1800, 0)));
    }

    #[test]
    fn wrapping_range_is_rejected() {
        assert!(VirtualRange::new(VirtualAddress::new(u64::MAX - 0xFFF), 0x1000).is_none());
        assert!(VirtualRange::new(VirtualAddress::new(u64::MAX - 0xFFF), 0xFFF).is_some());
    }

    #[test]
    fn page_addresses_enumerates_every_page() {
        let r = range(0x4000, 3 * PAGE_SIZE);
        let pages: Vec<u64> = r.page_addresses().map(VirtualAddress::as_u64).collect();
        assert_eq!(pages, vec![0x4000, 0x5000, 0x6000]);
    }
}
