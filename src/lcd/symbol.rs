//! Variable keys of the factor graph.
//!
//! A [`Key`] is the packed 64-bit form handed out by the optimizer. A
//! [`Symbol`] splits it into a one-byte prefix (the robot letter) and a
//! 56-bit index (the keyframe number).

/// Packed factor-graph key.
pub type Key = u64;

/// Timestamp in nanoseconds.
pub type Timestamp = i64;

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = 64 - CHR_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Decoded key: prefix character plus index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    pub chr: u8,
    pub index: u64,
}

impl Symbol {
    pub fn new(chr: u8, index: u64) -> Self {
        Self {
            chr,
            index: index & INDEX_MASK,
        }
    }

    /// Symbol for keyframe `index` of robot `robot_id` (prefix `'a' + robot_id`).
    pub fn for_robot(robot_id: u16, index: u64) -> Self {
        Self::new(robot_prefix(robot_id), index)
    }

    pub fn key(&self) -> Key {
        ((self.chr as u64) << INDEX_BITS) | self.index
    }

    pub fn from_key(key: Key) -> Self {
        Self {
            chr: (key >> INDEX_BITS) as u8,
            index: key & INDEX_MASK,
        }
    }
}

impl From<Key> for Symbol {
    fn from(key: Key) -> Self {
        Self::from_key(key)
    }
}

impl From<Symbol> for Key {
    fn from(symbol: Symbol) -> Self {
        symbol.key()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.chr as char, self.index)
    }
}

/// Key prefix used by robot `robot_id`. Wraps after 'z'-'a' robots are exhausted.
pub fn robot_prefix(robot_id: u16) -> u8 {
    b'a'.wrapping_add(robot_id as u8)
}
