//! 160-bit circular identifier arithmetic (C1).
//!
//! Identifiers are produced by SHA-1 and compared as big-endian unsigned
//! integers. All routing decisions go through `add_pow2` and the two
//! `in_range_*` predicates defined here; no other component compares ids
//! directly.

use sha1::{Digest, Sha1};
use std::fmt;

pub const ID_BITS: usize = 160;
pub const ID_BYTES: usize = ID_BITS / 8;

/// A 160-bit identifier on the Chord ring, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; ID_BYTES]);

impl Identifier {
    pub const ZERO: Identifier = Identifier([0u8; ID_BYTES]);

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Identifier(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// `hash(bytes) -> id`: SHA-1, 20 bytes, big-endian interpreted.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest);
        Identifier(bytes)
    }

    /// Parses a wire-format identifier. Fails unless the slice is exactly
    /// 20 bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; ID_BYTES] = slice.try_into().ok()?;
        Some(Identifier(bytes))
    }

    /// `(self + 2^i) mod 2^160`. Overflow wraps silently.
    pub fn add_pow2(&self, i: usize) -> Identifier {
        assert!(i < ID_BITS, "exponent {} out of range for a {}-bit ring", i, ID_BITS);
        let mut out = self.0;
        let byte_pos = ID_BYTES - 1 - i / 8;
        let bit = i % 8;
        let mut carry: u32 = 1u32 << bit;
        for pos in (0..=byte_pos).rev() {
            let sum = out[pos] as u32 + carry;
            out[pos] = (sum % 256) as u8;
            carry = sum / 256;
            if carry == 0 {
                break;
            }
        }
        Identifier(out)
    }

    /// Returns true iff `c in (l, r]` on the circular space.
    pub fn in_range_half_open(c: Identifier, l: Identifier, r: Identifier) -> bool {
        if l == r {
            return true;
        }
        if l < r {
            l < c && c <= r
        } else {
            c > l || c <= r
        }
    }

    /// `in_range_half_open` minus the case `c == r`, i.e. `c in (l, r)`.
    pub fn in_range_open(c: Identifier, l: Identifier, r: Identifier) -> bool {
        c != r && Identifier::in_range_half_open(c, l, r)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Identifier {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = byte;
        Identifier(bytes)
    }

    #[test]
    fn hash_is_twenty_bytes_and_deterministic() {
        let a = Identifier::hash(b"127.0.0.1:7402");
        let b = Identifier::hash(b"127.0.0.1:7402");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), ID_BYTES);
    }

    #[test]
    fn add_pow2_wraps_around_the_ring() {
        let max = Identifier([0xff; ID_BYTES]);
        assert_eq!(max.add_pow2(0), Identifier::ZERO);
    }

    #[test]
    fn add_pow2_carries_across_byte_boundary() {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = 0xff;
        let x = Identifier(bytes);
        let mut expected = [0u8; ID_BYTES];
        expected[ID_BYTES - 2] = 0x01;
        assert_eq!(x.add_pow2(0), Identifier(expected));
    }

    #[test]
    fn add_pow2_matches_naive_shift_for_small_exponents() {
        let base = id(10);
        assert_eq!(base.add_pow2(0), id(11));
        assert_eq!(base.add_pow2(2), id(14));
    }

    #[test]
    fn in_range_half_open_natural_interval() {
        let (l, r) = (id(5), id(10));
        assert!(!Identifier::in_range_half_open(id(5), l, r));
        assert!(Identifier::in_range_half_open(id(6), l, r));
        assert!(Identifier::in_range_half_open(id(10), l, r));
        assert!(!Identifier::in_range_half_open(id(11), l, r));
    }

    #[test]
    fn in_range_half_open_wrap_interval() {
        let (l, r) = (id(250), id(5));
        assert!(Identifier::in_range_half_open(id(251), l, r));
        assert!(Identifier::in_range_half_open(id(0), l, r));
        assert!(Identifier::in_range_half_open(id(5), l, r));
        assert!(!Identifier::in_range_half_open(id(6), l, r));
        assert!(!Identifier::in_range_half_open(id(250), l, r));
    }

    #[test]
    fn in_range_half_open_equal_bounds_is_full_ring() {
        let l = id(42);
        assert!(Identifier::in_range_half_open(id(0), l, l));
        assert!(Identifier::in_range_half_open(id(42), l, l));
        assert!(Identifier::in_range_half_open(id(200), l, l));
    }

    #[test]
    fn in_range_open_excludes_right_edge() {
        let (l, r) = (id(5), id(10));
        assert!(Identifier::in_range_half_open(id(10), l, r));
        assert!(!Identifier::in_range_open(id(10), l, r));
        assert!(Identifier::in_range_open(id(6), l, r));
    }
}
