//! Hash index keys

use std::fmt;

use super::fnv1a_32;

/// Which kind of key a table holds. Fixed when the table is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Str,
    Int,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Str => "string",
            KeyKind::Int => "integer",
        }
    }
}

/// A hash index key. Immutable once inserted; equality drives all matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Str(String),
    Int(i64),
}

impl HashKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            HashKey::Str(_) => KeyKind::Str,
            HashKey::Int(_) => KeyKind::Int,
        }
    }

    /// Bucket index for this key in a table with the given mask
    pub(crate) fn bucket(&self, mask: u32) -> usize {
        let hash = match self {
            HashKey::Str(s) => fnv1a_32(s.as_bytes()),
            // Integer keys use their low bits directly
            HashKey::Int(n) => *n as u32,
        };
        (hash & mask) as usize
    }
}

impl From<&str> for HashKey {
    fn from(s: &str) -> Self {
        HashKey::Str(s.to_string())
    }
}

impl From<String> for HashKey {
    fn from(s: String) -> Self {
        HashKey::Str(s)
    }
}

impl From<i64> for HashKey {
    fn from(n: i64) -> Self {
        HashKey::Int(n)
    }
}

impl From<i32> for HashKey {
    fn from(n: i32) -> Self {
        HashKey::Int(i64::from(n))
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Str(s) => write!(f, "{}", s),
            HashKey::Int(n) => write!(f, "{}", n),
        }
    }
}
