//! Log sequence numbers.

use std::fmt;

/// Number of bits of a packed Lsn used for the file offset.
const OFFSET_BITS: u32 = 48;

/// Largest offset that survives packing.
pub const MAX_OFFSET: u64 = (1 << OFFSET_BITS) - 1;

/// A position in the journal.
///
/// An Lsn names a journal file (its generation number) and the byte offset of
/// an entry inside that file. Ordering is lexicographic on `(file, offset)`,
/// so entries in a later file always compare greater than entries in an
/// earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    file: u16,
    offset: u64,
}

impl Lsn {
    /// The position before any entry has been written.
    pub const ZERO: Self = Self { file: 0, offset: 0 };

    /// Creates an Lsn from a file number and offset.
    #[must_use]
    pub const fn new(file: u16, offset: u64) -> Self {
        Self { file, offset }
    }

    /// Returns the journal file number.
    #[must_use]
    pub const fn file(self) -> u16 {
        self.file
    }

    /// Returns the byte offset within the file.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }

    /// Packs the Lsn into a single `u64` (`file << 48 | offset`).
    ///
    /// Offsets above [`MAX_OFFSET`] are truncated; the journal never produces
    /// them because files rotate long before.
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.file as u64) << OFFSET_BITS) | (self.offset & MAX_OFFSET)
    }

    /// Reverses [`Lsn::pack`].
    #[must_use]
    pub const fn unpack(raw: u64) -> Self {
        Self {
            file: (raw >> OFFSET_BITS) as u16,
            offset: raw & MAX_OFFSET,
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ordering_is_file_then_offset() {
        assert!(Lsn::new(0, 900) < Lsn::new(1, 6));
        assert!(Lsn::new(1, 6) < Lsn::new(1, 7));
        assert_eq!(Lsn::new(3, 10), Lsn::new(3, 10));
        assert!(Lsn::ZERO < Lsn::new(0, 1));
    }

    #[test]
    fn display() {
        assert_eq!(Lsn::new(2, 128).to_string(), "2:128");
    }

    #[test]
    fn pack_layout() {
        assert_eq!(Lsn::new(1, 0).pack(), 1 << 48);
        assert_eq!(Lsn::new(0, 42).pack(), 42);
    }

    proptest! {
        #[test]
        fn pack_preserves_value_and_order(
            a in (any::<u16>(), 0..=MAX_OFFSET),
            b in (any::<u16>(), 0..=MAX_OFFSET),
        ) {
            let la = Lsn::new(a.0, a.1);
            let lb = Lsn::new(b.0, b.1);
            prop_assert_eq!(Lsn::unpack(la.pack()), la);
            prop_assert_eq!(la.cmp(&lb), la.pack().cmp(&lb.pack()));
        }
    }
}
