// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-width circular identifiers and the interval predicates every
//! routing operation is built from (see closest_preceding_finger,
//! find_predecessor, stabilize, notify).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::DhtError;

/// Bit width of the ring (`M` in the Chord paper).
pub const KEY_BITS: usize = 256;
pub const KEY_BYTES: usize = KEY_BITS / 8;

/// A 256-bit unsigned integer on the ring, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key([u8; KEY_BYTES]);

impl Key {
    pub const ZERO: Key = Key([0u8; KEY_BYTES]);

    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    /// `H(host || ":" || port)`.
    pub fn hash_addr(host: &str, port: u16) -> Self {
        let data = format!("{}:{}", host, port);
        Key(*blake3::hash(data.as_bytes()).as_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        if s.len() != KEY_BYTES * 2 {
            return Err(DhtError::InvalidArgument(format!(
                "key must be {} hex chars, got {}",
                KEY_BYTES * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; KEY_BYTES];
        for i in 0..KEY_BYTES {
            let byte_str = &s[i * 2..i * 2 + 2];
            bytes[i] = u8::from_str_radix(byte_str, 16)
                .map_err(|_| DhtError::InvalidArgument(format!("invalid hex key: {}", s)))?;
        }
        Ok(Key(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// `(self + 2^i) mod 2^M`.
    pub fn wrapping_add_pow2(&self, i: u32) -> Self {
        self.wrapping_add(&Key::pow2(i))
    }

    /// `(self - 2^i) mod 2^M`.
    pub fn wrapping_sub_pow2(&self, i: u32) -> Self {
        self.wrapping_sub(&Key::pow2(i))
    }

    fn pow2(i: u32) -> Key {
        assert!((i as usize) < KEY_BITS, "finger index out of range");
        let mut bytes = [0u8; KEY_BYTES];
        let byte_index = KEY_BYTES - 1 - (i as usize) / 8;
        let bit_index = (i as usize) % 8;
        bytes[byte_index] = 1 << bit_index;
        Key(bytes)
    }

    pub fn wrapping_add(&self, other: &Key) -> Key {
        let mut out = [0u8; KEY_BYTES];
        let mut carry: u16 = 0;
        for i in (0..KEY_BYTES).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = sum as u8;
            carry = sum >> 8;
        }
        Key(out)
    }

    pub fn wrapping_sub(&self, other: &Key) -> Key {
        let mut out = [0u8; KEY_BYTES];
        let mut borrow: i16 = 0;
        for i in (0..KEY_BYTES).rev() {
            let diff = self.0[i] as i16 - other.0[i] as i16 - borrow;
            if diff < 0 {
                out[i] = (diff + 256) as u8;
                borrow = 1;
            } else {
                out[i] = diff as u8;
                borrow = 0;
            }
        }
        Key(out)
    }

    /// `x.is_between_exclu(a, b)`: true iff `x` strictly lies on the
    /// clockwise arc from `a` to `b`, both endpoints excluded.
    /// Degenerate `a == b` is true for every `x != a`.
    pub fn is_between_exclu(&self, a: &Key, b: &Key) -> bool {
        if a == b {
            self != a
        } else if a < b {
            a < self && self < b
        } else {
            self > a || self < b
        }
    }

    /// Same arc, right endpoint included. Degenerate `a == b` is
    /// always true.
    pub fn is_between_r_inclu(&self, a: &Key, b: &Key) -> bool {
        if a == b {
            true
        } else if a < b {
            a < self && self <= b
        } else {
            self > a || self <= b
        }
    }

    /// Same arc, both endpoints excluded. Degenerate `a == b` is
    /// always false (the arc collapses).
    pub fn isbetween(&self, a: &Key, b: &Key) -> bool {
        if a == b {
            false
        } else if a < b {
            a < self && self < b
        } else {
            self > a || self < b
        }
    }

    /// `x ∈ [a, b)`, left endpoint included, right endpoint excluded.
    /// Used only by `update_finger_table` / `init_fingers`, which need
    /// a self-inclusive half-open form rather than any of the three
    /// named predicates above.
    pub fn in_half_open(&self, a: &Key, b: &Key) -> bool {
        if a == b {
            true
        } else if a < b {
            self >= a && self < b
        } else {
            self >= a || self < b
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_hex())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
