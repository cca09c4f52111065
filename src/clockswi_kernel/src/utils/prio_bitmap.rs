//! Provides `PrioBitmap`, a one-word bit array with a constant-time scan for
//! the highest set bit.
use core::fmt;

use super::Init;

/// The maximum bit count supported by [`PrioBitmap`].
pub const PRIO_BITMAP_MAX_LEN: usize = u32::BITS as usize;

/// A bit array of up to [`PRIO_BITMAP_MAX_LEN`] entries.
///
/// All methods panic when the given bit position is out of range.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PrioBitmap {
    bits: u32,
}

impl Init for PrioBitmap {
    const INIT: Self = Self { bits: 0 };
}

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries((0..PRIO_BITMAP_MAX_LEN).filter(|&i| self.get(i)))
            .finish()
    }
}

impl PrioBitmap {
    /// Get the bit at the specified position.
    pub fn get(&self, i: usize) -> bool {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.bits & (1 << i) != 0
    }

    /// Clear the bit at the specified position.
    pub fn clear(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.bits &= !(1 << i);
    }

    /// Set the bit at the specified position.
    pub fn set(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.bits |= 1 << i;
    }

    /// Get the position of the highest set bit.
    pub fn find_highest(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some((u32::BITS - 1 - self.bits.leading_zeros()) as usize)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}
