//! Modular sequence-number arithmetic.
//!
//! Both engines number packets in `[0, modulus)` and wrap around.  All
//! window reasoning reduces to one primitive, the forward distance
//! `to - from (mod modulus)`:
//!
//! ```text
//!   base                 next_seq
//!    │                      │
//!  ──┼──────────────────────┼─────────▶ (mod modulus)
//!    │<─ distance(base, s) ─│
//! ```
//!
//! A sequence number `s` lies in the half-open window `[base, next_seq)`
//! exactly when `distance(base, s) < distance(base, next_seq)`.  This stays
//! unambiguous as long as the modulus exceeds the window size, which
//! [`SeqSpace::new`] enforces.

use crate::config::ConfigError;

/// Largest modulus the 32-bit wire field can represent.
pub const MAX_MODULUS: u64 = 1 << 32;

/// A sequence-number space of size `modulus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u64,
}

impl Default for SeqSpace {
    fn default() -> Self {
        Self {
            modulus: MAX_MODULUS,
        }
    }
}

impl SeqSpace {
    /// Build a sequence space for a sender window of `window_size` packets.
    ///
    /// Fails when `modulus < window_size + 1` (old and new packets within
    /// one window's reach would alias) or when the modulus does not fit the
    /// 32-bit wire field.
    pub fn new(modulus: u64, window_size: usize) -> Result<Self, ConfigError> {
        if modulus > MAX_MODULUS {
            return Err(ConfigError::SeqSpaceTooLarge { modulus });
        }
        if modulus < window_size as u64 + 1 {
            return Err(ConfigError::SeqSpaceTooSmall {
                modulus,
                window_size,
            });
        }
        Ok(Self { modulus })
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Sequence number assigned to the chunk at absolute `index`.
    #[inline]
    pub fn from_index(&self, index: usize) -> u32 {
        (index as u64 % self.modulus) as u32
    }

    /// `seq + n (mod modulus)`.
    #[inline]
    pub fn add(&self, seq: u32, n: u64) -> u32 {
        ((u64::from(seq) + n % self.modulus) % self.modulus) as u32
    }

    /// `seq + 1 (mod modulus)`.
    #[inline]
    pub fn next(&self, seq: u32) -> u32 {
        self.add(seq, 1)
    }

    /// `seq - 1 (mod modulus)`.
    #[inline]
    pub fn prev(&self, seq: u32) -> u32 {
        self.add(seq, self.modulus - 1)
    }

    /// Forward distance from `from` to `to`, in `[0, modulus)`.
    #[inline]
    pub fn distance(&self, from: u32, to: u32) -> u64 {
        (u64::from(to) + self.modulus - u64::from(from) % self.modulus) % self.modulus
    }

    /// `true` when `seq` lies in `[start, start + len)` modulo the space.
    #[inline]
    pub fn in_window(&self, start: u32, len: u64, seq: u32) -> bool {
        self.distance(start, seq) < len
    }
}
