//! Variable identifiers.
//!
//! A [`Key`] is an opaque, totally ordered 64-bit token. The symbolic form packs
//! an ASCII character into the top byte and an index into the remaining 56 bits,
//! so `Key::symbol('x', 3)` prints as `x3` and sorts after every `l*` key.

use serde::{Deserialize, Serialize};
use std::fmt;

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = u64::BITS - CHR_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Identifier of one optimization variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(u64);

impl Key {
    pub const fn new(raw: u64) -> Self {
        Key(raw)
    }

    /// Symbolic key such as `x0` or `l12`. `chr` must be ASCII; the index is
    /// truncated to 56 bits.
    pub fn symbol(chr: char, index: u64) -> Self {
        let chr = (chr as u64) & 0xff;
        Key((chr << INDEX_BITS) | (index & INDEX_MASK))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Character of a symbolic key, `None` for plain integer keys.
    pub fn chr(&self) -> Option<char> {
        let c = (self.0 >> INDEX_BITS) as u8;
        c.is_ascii_graphic().then_some(c as char)
    }

    pub fn index(&self) -> u64 {
        match self.chr() {
            Some(_) => self.0 & INDEX_MASK,
            None => self.0,
        }
    }
}

impl From<u64> for Key {
    fn from(raw: u64) -> Self {
        Key(raw)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chr() {
            Some(c) => write!(f, "{}{}", c, self.index()),
            None => write!(f, "{}", self.0),
        }
    }
}
