//! Device numbers.
//!
//! A character device is addressed by a `(major, minor)` pair. The packed
//! form uses the same layout as the kernel's `dev_t`: 12 bits of major in
//! the high part and 20 bits of minor in the low part.

use core::fmt;

/// Number of bits reserved for the minor number (`MINORBITS`).
pub const MINOR_BITS: u32 = 20;

/// Mask selecting the minor bits of a packed device number.
pub const MINOR_MASK: u32 = (1 << MINOR_BITS) - 1;

/// Largest representable major number.
pub const MAX_MAJOR: u32 = (1 << (32 - MINOR_BITS)) - 1;

/// A packed `(major, minor)` device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DevNum(u32);

impl DevNum {
    /// Packs a major and minor number (`MKDEV`).
    ///
    /// Bits beyond the field widths are discarded.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self(((major & MAX_MAJOR) << MINOR_BITS) | (minor & MINOR_MASK))
    }

    /// Reconstructs a device number from its packed form.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the packed form.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns the major number (`MAJOR`).
    pub const fn major(self) -> u32 {
        self.0 >> MINOR_BITS
    }

    /// Returns the minor number (`MINOR`).
    pub const fn minor(self) -> u32 {
        self.0 & MINOR_MASK
    }

    /// Returns the device number `offset` minors after this one, staying on
    /// the same major, or `None` if the minor would leave its field.
    pub const fn checked_offset(self, offset: u32) -> Option<Self> {
        match self.minor().checked_add(offset) {
            Some(minor) if minor <= MINOR_MASK => Some(Self::new(self.major(), minor)),
            _ => None,
        }
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}
