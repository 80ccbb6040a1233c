//! Backing Store Module
//!
//! The blocking key-value store the object cache writes through to. Records
//! are addressed by a byte-string key plus a [`RecordType`] tag; equal keys
//! of different types are distinct records.
//!
//! ## Responsibilities
//! - Generic `get`/`put`/`delete` by (key, type)
//! - Attribute-specialised accessors, used whenever the type is
//!   [`RecordType::Attribute`]
//! - `lock`/`unlock` bracketing for sequences that must not interleave
//! - Per-write durability toggle for bulk loads
//!
//! Two implementations ship with the crate: [`MemoryBackend`] for tests and
//! throwaway worlds, and [`FileBackend`], an append-only record log.

mod file;
mod frame;
mod memory;

pub use file::FileBackend;
pub use frame::{LogRecord, FRAME_HEADER_SIZE};
pub use memory::{BackendCounters, MemoryBackend};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::world::Dbref;

/// Longest key accepted by the cache and backends
pub const MAX_KEY_LEN: usize = 255;

// =============================================================================
// Record Types
// =============================================================================

/// Tag partitioning the record keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum RecordType {
    Empty = 0,
    /// One attribute value, keyed by [`AttrKey`]
    Attribute = 1,
    /// Database parameters (top, next attribute number, player record)
    DbInfo = 2,
    /// A block of objects
    Object = 3,
    /// A block of user attribute definitions
    AttrNum = 4,
    /// Opaque data owned by an extension module
    Module = 5,
}

impl RecordType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RecordType {
    type Error = StoreError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(RecordType::Empty),
            1 => Ok(RecordType::Attribute),
            2 => Ok(RecordType::DbInfo),
            3 => Ok(RecordType::Object),
            4 => Ok(RecordType::AttrNum),
            5 => Ok(RecordType::Module),
            other => Err(StoreError::UnknownRecordType(other)),
        }
    }
}

// =============================================================================
// Attribute Keys
// =============================================================================

/// Key of one attribute record: (object, attribute number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrKey {
    pub object: Dbref,
    pub attrnum: i32,
}

impl AttrKey {
    pub const ENCODED_LEN: usize = 8;

    pub fn new(object: Dbref, attrnum: i32) -> Self {
        Self { object, attrnum }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..4].copy_from_slice(&self.object.to_le_bytes());
        buf[4..].copy_from_slice(&self.attrnum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(StoreError::Serialization(format!(
                "attribute key must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        let mut object = [0u8; 4];
        let mut attrnum = [0u8; 4];
        object.copy_from_slice(&bytes[..4]);
        attrnum.copy_from_slice(&bytes[4..]);
        Ok(Self {
            object: Dbref::from_le_bytes(object),
            attrnum: i32::from_le_bytes(attrnum),
        })
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// A blocking key-value store keyed by (bytes, type)
///
/// Implementations must:
/// - Treat (key, type) as the record identity
/// - Return `Ok(None)` for a missing record, `Err` only on failure
/// - Propagate every I/O error, never swallow it
///
/// The attribute accessors default to the generic path with an encoded
/// [`AttrKey`]. Backends with a dedicated attribute layout override them.
pub trait Backend: Send {
    fn get(&mut self, key: &[u8], kind: RecordType) -> Result<Option<Bytes>>;

    fn put(&mut self, key: &[u8], data: &[u8], kind: RecordType) -> Result<()>;

    fn delete(&mut self, key: &[u8], kind: RecordType) -> Result<()>;

    fn get_attribute(&mut self, key: &AttrKey) -> Result<Option<Bytes>> {
        self.get(&key.to_bytes(), RecordType::Attribute)
    }

    fn put_attribute(&mut self, key: &AttrKey, data: &[u8]) -> Result<()> {
        self.put(&key.to_bytes(), data, RecordType::Attribute)
    }

    fn delete_attribute(&mut self, key: &AttrKey) -> Result<()> {
        self.delete(&key.to_bytes(), RecordType::Attribute)
    }

    /// Begin a sequence of operations that must not interleave with others
    fn lock(&mut self) -> Result<()> {
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    /// Toggle per-write durability. Turning it back on makes everything
    /// written so far durable.
    fn set_synchronous(&mut self, _synchronous: bool) -> Result<()> {
        Ok(())
    }

    /// Make every write so far durable
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
