//! Fixed-length, byte-packed bit lists
//!
//! A [`BitList`] stores `len` booleans in `ceil(len / 8)` bytes. It is the
//! flag-vector and membership-set type used over relation and variable
//! populations in the 10^4 to 10^6 range, so the whole-list queries
//! ([`BitList::is_empty`], [`BitList::first_set_bit`]) scan a byte at a time
//! instead of a bit at a time.
//!
//! Bits past `len` in the last byte are never set: every constructor and
//! mutator keeps that tail masked, so byte-wise AND/OR/compare never observe
//! garbage.

use std::fmt;

use tracing::warn;

use crate::error::CoreError;

/// Number of bytes needed to hold `len` bits.
fn byte_count(len: usize) -> usize {
    (len >> 3) + usize::from(len & 0x07 != 0)
}

/// Packed boolean vector of a fixed logical length.
#[derive(Clone)]
pub struct BitList {
    len: usize,
    /// Value given to bits added by [`BitList::resize`].
    fill: bool,
    bytes: Vec<u8>,
}

impl BitList {
    /// Create a list of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            fill: false,
            bytes: vec![0; byte_count(len)],
        }
    }

    /// Create a list of `len` bits, all set.
    pub fn full(len: usize) -> Self {
        let mut list = Self {
            len,
            fill: true,
            bytes: vec![0xff; byte_count(len)],
        };
        list.mask_tail();
        list
    }

    /// Logical number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Storage used by the packed buffer, in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Fill value used for bits added by [`BitList::resize`]: `false` for
    /// lists made with [`BitList::new`], `true` for [`BitList::full`].
    pub fn fill_value(&self) -> bool {
        self.fill
    }

    /// Grow the list to `new_len` bits. New bits take the list's fill value.
    ///
    /// Shrinking is not supported and fails with [`CoreError::InvalidArgument`].
    pub fn resize(&mut self, new_len: usize) -> Result<(), CoreError> {
        self.resize_with(new_len, self.fill)
    }

    /// Grow the list to `new_len` bits, giving every new bit the value `fill`.
    pub fn resize_with(&mut self, new_len: usize, fill: bool) -> Result<(), CoreError> {
        if new_len < self.len {
            return Err(CoreError::InvalidArgument(format!(
                "cannot shrink bit list from {} to {} bits",
                self.len, new_len
            )));
        }
        let old_len = self.len;
        self.bytes.resize(byte_count(new_len), 0);
        self.len = new_len;
        if fill {
            self.fill_range(old_len, new_len);
        }
        Ok(())
    }

    /// Set every bit in `start..end` (already known to be in range).
    fn fill_range(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos < end && pos & 0x07 != 0 {
            self.bytes[pos >> 3] |= 1 << (pos & 0x07);
            pos += 1;
        }
        while pos + 8 <= end {
            self.bytes[pos >> 3] = 0xff;
            pos += 8;
        }
        while pos < end {
            self.bytes[pos >> 3] |= 1 << (pos & 0x07);
            pos += 1;
        }
    }

    fn mask_tail(&mut self) {
        let rem = self.len & 0x07;
        if rem != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1u8 << rem) - 1;
            }
        }
    }

    fn check(&self, pos: usize) -> Result<(), CoreError> {
        if pos >= self.len {
            return Err(CoreError::OutOfRange { pos, len: self.len });
        }
        Ok(())
    }

    /// Set bit `pos`.
    pub fn set(&mut self, pos: usize) -> Result<(), CoreError> {
        self.check(pos)?;
        self.bytes[pos >> 3] |= 1 << (pos & 0x07);
        Ok(())
    }

    /// Clear bit `pos`.
    pub fn clear(&mut self, pos: usize) -> Result<(), CoreError> {
        self.check(pos)?;
        self.bytes[pos >> 3] &= !(1u8 << (pos & 0x07));
        Ok(())
    }

    /// Set bit `pos` when `cond` holds, clear it otherwise.
    pub fn set_if(&mut self, pos: usize, cond: bool) -> Result<(), CoreError> {
        if cond {
            self.set(pos)
        } else {
            self.clear(pos)
        }
    }

    /// Read bit `pos`.
    pub fn read(&self, pos: usize) -> Result<bool, CoreError> {
        self.check(pos)?;
        Ok(self.bytes[pos >> 3] & (1 << (pos & 0x07)) != 0)
    }

    /// Clear every bit, keeping the length.
    pub fn clear_all(&mut self) {
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }

    /// In-place AND with `other`.
    ///
    /// Lists of different lengths are left untouched; the mismatch is logged
    /// and returned as [`CoreError::BitSetLengthMismatch`].
    pub fn intersect(&mut self, other: &BitList) -> Result<(), CoreError> {
        if self.len != other.len {
            warn!(
                left = self.len,
                right = other.len,
                "bad bit list intersection, operation skipped"
            );
            return Err(CoreError::BitSetLengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a &= *b;
        }
        Ok(())
    }

    /// In-place OR with `other`. Same length rule as [`BitList::intersect`].
    pub fn union(&mut self, other: &BitList) -> Result<(), CoreError> {
        if self.len != other.len {
            warn!(
                left = self.len,
                right = other.len,
                "bad bit list union, operation skipped"
            );
            return Err(CoreError::BitSetLengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= *b;
        }
        Ok(())
    }

    /// Copy the contents of `src` into this list. Lengths must match.
    pub fn overwrite_from(&mut self, src: &BitList) -> Result<(), CoreError> {
        if self.len != src.len {
            return Err(CoreError::BitSetLengthMismatch {
                left: self.len,
                right: src.len,
            });
        }
        self.bytes.copy_from_slice(&src.bytes);
        Ok(())
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Compare logical bit values over the first `min(self.len, other.len)`
    /// positions. Bytes are compared whole except for the final partial byte,
    /// which is masked to the compared length.
    pub fn equals(&self, other: &BitList) -> bool {
        let n = self.len.min(other.len);
        let whole = n >> 3;
        if self.bytes[..whole] != other.bytes[..whole] {
            return false;
        }
        let rem = n & 0x07;
        if rem == 0 {
            return true;
        }
        let mask = (1u8 << rem) - 1;
        (self.bytes[whole] & mask) == (other.bytes[whole] & mask)
    }

    /// Position of the lowest set bit, or `len + 1` when no bit is set.
    pub fn first_set_bit(&self) -> usize {
        match self.bytes.iter().position(|b| *b != 0) {
            Some(byte) => (byte << 3) + self.bytes[byte].trailing_zeros() as usize,
            None => self.len + 1,
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Iterate the positions of set bits in ascending order, skipping zero
    /// bytes without inspecting their bits.
    pub fn iter_ones(&self) -> IterOnes<'_> {
        IterOnes {
            bytes: &self.bytes,
            byte: 0,
            current: self.bytes.first().copied().unwrap_or(0),
        }
    }
}

impl PartialEq for BitList {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.equals(other)
    }
}

impl Eq for BitList {}

impl fmt::Debug for BitList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitList({}) [", self.len)?;
        for pos in 0..self.len {
            let on = self.bytes[pos >> 3] & (1 << (pos & 0x07)) != 0;
            write!(f, "{}", if on { '1' } else { '.' })?;
            if (pos + 1) % 8 == 0 && pos + 1 < self.len {
                write!(f, "|")?;
            }
        }
        write!(f, "]")
    }
}

/// Iterator over set positions of a [`BitList`].
pub struct IterOnes<'a> {
    bytes: &'a [u8],
    byte: usize,
    current: u8,
}

impl Iterator for IterOnes<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.current == 0 {
            self.byte += 1;
            if self.byte >= self.bytes.len() {
                return None;
            }
            self.current = self.bytes[self.byte];
        }
        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        Some((self.byte << 3) + bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LENGTHS: [usize; 9] = [0, 1, 7, 8, 9, 63, 64, 65, 1000];

    #[test]
    fn test_set_clear_round_trip() {
        for len in LENGTHS {
            let mut bl = BitList::new(len);
            for p in 0..len {
                bl.set(p).unwrap();
                assert!(bl.read(p).unwrap(), "bit {p} of {len} should be set");
                bl.clear(p).unwrap();
                assert!(!bl.read(p).unwrap(), "bit {p} of {len} should be clear");
            }
            assert!(bl.is_empty());
        }
    }

    #[test]
    fn test_out_of_range() {
        let mut bl = BitList::new(9);
        assert_eq!(bl.set(9), Err(CoreError::OutOfRange { pos: 9, len: 9 }));
        assert!(bl.read(100).is_err());
        assert!(bl.clear(9).is_err());
        assert!(bl.set_if(9, true).is_err());
        assert!(BitList::new(0).read(0).is_err());
    }

    #[test]
    fn test_full_masks_tail() {
        let bl = BitList::full(11);
        assert_eq!(bl.count_ones(), 11);
        assert_eq!(bl.byte_len(), 2);
        assert_eq!(bl.first_set_bit(), 0);
        assert!(BitList::full(0).is_empty());
    }

    #[test]
    fn test_first_set_bit() {
        for len in LENGTHS {
            let bl = BitList::new(len);
            assert_eq!(bl.first_set_bit(), len + 1);
            for k in [0, len / 2, len.saturating_sub(1)] {
                if k >= len {
                    continue;
                }
                let mut bl = BitList::new(len);
                bl.set(k).unwrap();
                assert_eq!(bl.first_set_bit(), k);
            }
        }
    }

    #[test]
    fn test_resize_cannot_shrink() {
        let mut bl = BitList::new(16);
        assert!(matches!(bl.resize(8), Err(CoreError::InvalidArgument(_))));
        assert_eq!(bl.len(), 16);
    }

    #[test]
    fn test_resize_within_same_byte() {
        let mut bl = BitList::full(3);
        bl.resize(6).unwrap();
        assert_eq!(bl.byte_len(), 1);
        assert_eq!(bl.count_ones(), 6);

        let mut bl = BitList::new(3);
        bl.set(1).unwrap();
        bl.resize_with(20, true).unwrap();
        assert!(!bl.read(0).unwrap());
        assert!(bl.read(1).unwrap());
        assert!(!bl.read(2).unwrap());
        assert_eq!(bl.count_ones(), 18);
    }

    #[test]
    fn test_mismatched_union_is_noop() {
        let mut a = BitList::full(10);
        let b = BitList::new(12);
        let before = a.clone();
        assert_eq!(
            a.union(&b),
            Err(CoreError::BitSetLengthMismatch { left: 10, right: 12 })
        );
        assert_eq!(a, before);
    }

    #[test]
    fn test_equals_uses_shorter_length() {
        let mut a = BitList::new(10);
        let mut b = BitList::new(20);
        a.set(3).unwrap();
        b.set(3).unwrap();
        b.set(15).unwrap();
        assert!(a.equals(&b));
        assert!(b.equals(&a));
        assert_ne!(a, b);

        b.set(9).unwrap();
        assert!(!a.equals(&b));
    }

    #[test]
    fn test_overwrite_and_iter_ones() {
        let mut src = BitList::new(40);
        for p in [2, 9, 31, 39] {
            src.set(p).unwrap();
        }
        let mut dst = BitList::full(40);
        dst.overwrite_from(&src).unwrap();
        assert_eq!(dst.iter_ones().collect::<Vec<_>>(), vec![2, 9, 31, 39]);
        assert!(dst.overwrite_from(&BitList::new(41)).is_err());
    }

    #[test]
    fn test_debug_format() {
        let mut bl = BitList::new(10);
        bl.set(0).unwrap();
        bl.set(9).unwrap();
        assert_eq!(format!("{:?}", bl), "BitList(10) [1.......|.1]");
    }

    proptest! {
        #[test]
        fn prop_resize_preserves_prefix(
            len in 0usize..300,
            extra in 1usize..300,
            full in any::<bool>(),
            picks in proptest::collection::vec(any::<usize>(), 0..40),
        ) {
            let mut bl = if full { BitList::full(len) } else { BitList::new(len) };
            if len > 0 {
                for p in &picks {
                    bl.set_if(p % len, p % 3 == 0).unwrap();
                }
            }
            let before: Vec<bool> = (0..len).map(|p| bl.read(p).unwrap()).collect();
            bl.resize(len + extra).unwrap();
            for (p, value) in before.iter().enumerate() {
                prop_assert_eq!(bl.read(p).unwrap(), *value);
            }
            for p in len..len + extra {
                prop_assert_eq!(bl.read(p).unwrap(), full);
            }
        }

        #[test]
        fn prop_set_algebra_matches_bitwise(
            bits in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..200),
        ) {
            let len = bits.len();
            let mut a = BitList::new(len);
            let mut b = BitList::new(len);
            for (p, (x, y)) in bits.iter().enumerate() {
                a.set_if(p, *x).unwrap();
                b.set_if(p, *y).unwrap();
            }
            let mut and = a.clone();
            and.intersect(&b).unwrap();
            let mut or = a.clone();
            or.union(&b).unwrap();
            for (p, (x, y)) in bits.iter().enumerate() {
                prop_assert_eq!(and.read(p).unwrap(), *x && *y);
                prop_assert_eq!(or.read(p).unwrap(), *x || *y);
            }
            prop_assert_eq!(and.is_empty(), !bits.iter().any(|(x, y)| *x && *y));
        }

        #[test]
        fn prop_mismatched_intersect_leaves_inputs(
            len in 0usize..100,
            delta in 1usize..20,
        ) {
            let mut a = BitList::full(len);
            let b = BitList::full(len + delta);
            let a_before = a.clone();
            let b_before = b.clone();
            prop_assert!(a.intersect(&b).is_err());
            prop_assert_eq!(a, a_before);
            prop_assert_eq!(b, b_before);
        }

        #[test]
        fn prop_first_set_bit_is_minimum(
            len in 1usize..500,
            picks in proptest::collection::vec(any::<usize>(), 1..10),
        ) {
            let mut bl = BitList::new(len);
            for p in &picks {
                bl.set(p % len).unwrap();
            }
            let min = picks.iter().map(|p| p % len).min().unwrap();
            prop_assert_eq!(bl.first_set_bit(), min);
            prop_assert_eq!(bl.iter_ones().next(), Some(min));
        }
    }
}
