use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use crate::error::TenderError;
use crate::Result;

/// An offset into the guest address space, measured from the guest origin.
///
/// Use this type to distinguish between a guest offset and a host address:
/// an `Offset` only becomes something the host can dereference after
/// `GuestMemory` has translated it.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Offset(u64);

impl Offset {
    /// Get the offset representing the guest origin
    pub fn zero() -> Self {
        Self::default()
    }

    /// Add `rhs` bytes to `self`, failing instead of wrapping
    pub fn checked_add(self, rhs: u64) -> Result<Offset> {
        self.0
            .checked_add(rhs)
            .map(Offset)
            .ok_or(TenderError::CheckedAddOverflow(rhs, self.0))
    }

    /// Whether `self` is a multiple of `align`, which must be a power of two
    pub fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl From<&Offset> for u64 {
    fn from(val: &Offset) -> u64 {
        val.0
    }
}

impl From<Offset> for u64 {
    fn from(val: Offset) -> u64 {
        val.0
    }
}

impl TryFrom<usize> for Offset {
    type Error = TenderError;
    fn try_from(val: usize) -> Result<Offset> {
        Ok(Offset::from(u64::try_from(val)?))
    }
}

/// Convert an `Offset` to a `usize`, returning an `Err` if the
/// conversion couldn't be made.
impl TryFrom<&Offset> for usize {
    type Error = TenderError;
    fn try_from(val: &Offset) -> Result<usize> {
        Ok(usize::try_from(val.0)?)
    }
}

impl TryFrom<Offset> for usize {
    type Error = TenderError;
    fn try_from(val: Offset) -> Result<usize> {
        usize::try_from(&val)
    }
}

impl Add<u64> for Offset {
    type Output = Offset;
    fn add(self, rhs: u64) -> Offset {
        Offset(self.0 + rhs)
    }
}

impl Add<usize> for Offset {
    type Output = Offset;
    fn add(self, rhs: usize) -> Offset {
        Offset(self.0 + rhs as u64)
    }
}

impl PartialEq<u64> for Offset {
    fn eq(&self, rhs: &u64) -> bool {
        self.0 == *rhs
    }
}

impl PartialOrd<u64> for Offset {
    fn partial_cmp(&self, rhs: &u64) -> Option<Ordering> {
        Some(self.0.cmp(rhs))
    }
}

impl PartialEq<usize> for Offset {
    fn eq(&self, other: &usize) -> bool {
        match usize::try_from(self) {
            Ok(offset_usize) => offset_usize == *other,
            Err(_) => false,
        }
    }
}

impl PartialOrd<usize> for Offset {
    fn partial_cmp(&self, rhs: &usize) -> Option<Ordering> {
        match usize::try_from(self) {
            Ok(offset_usize) => Some(offset_usize.cmp(rhs)),
            // larger than any usize
            Err(_) => Some(Ordering::Greater),
        }
    }
}
