//! In-memory backend
//!
//! HashMap-based store with per-path call counters. Used by tests to observe
//! exactly which accessor the cache went through, and for worlds that never
//! touch disk.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Result, StoreError};

use super::{AttrKey, Backend, RecordType};

/// How many times each accessor has been called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub attr_gets: u64,
    pub attr_puts: u64,
    pub attr_deletes: u64,
    pub locks: u64,
}

/// Map-backed [`Backend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: HashMap<(RecordType, Vec<u8>), Bytes>,
    counters: BackendCounters,
    fail_writes: bool,
    /// Writes left before the one that fails
    fail_in: Option<u64>,
    lock_depth: u32,
    synchronous: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            synchronous: true,
            ..Default::default()
        }
    }

    /// Make every subsequent put/delete fail with a backend error
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Make the `n`th write from now (1-based) fail once; every other write
    /// succeeds
    pub fn fail_nth_write(&mut self, n: u64) {
        self.fail_in = n.checked_sub(1);
    }

    pub fn counters(&self) -> BackendCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = BackendCounters::default();
    }

    /// Number of stored records across all types
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Peek at a record without counting the access
    pub fn peek(&self, key: &[u8], kind: RecordType) -> Option<&Bytes> {
        self.records.get(&(kind, key.to_vec()))
    }

    pub fn peek_attribute(&self, key: &AttrKey) -> Option<&Bytes> {
        self.peek(&key.to_bytes(), RecordType::Attribute)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    fn check_writable(&mut self) -> Result<()> {
        if self.fail_writes {
            return Err(StoreError::Backend("write rejected by backend".into()));
        }
        match self.fail_in {
            Some(0) => {
                self.fail_in = None;
                Err(StoreError::Backend("write rejected by backend".into()))
            }
            Some(left) => {
                self.fail_in = Some(left - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn raw_get(&self, key: &[u8], kind: RecordType) -> Option<Bytes> {
        self.records.get(&(kind, key.to_vec())).cloned()
    }

    fn raw_put(&mut self, key: &[u8], data: &[u8], kind: RecordType) {
        self.records
            .insert((kind, key.to_vec()), Bytes::copy_from_slice(data));
    }

    fn raw_delete(&mut self, key: &[u8], kind: RecordType) {
        self.records.remove(&(kind, key.to_vec()));
    }
}

impl Backend for MemoryBackend {
    fn get(&mut self, key: &[u8], kind: RecordType) -> Result<Option<Bytes>> {
        self.counters.gets += 1;
        Ok(self.raw_get(key, kind))
    }

    fn put(&mut self, key: &[u8], data: &[u8], kind: RecordType) -> Result<()> {
        self.counters.puts += 1;
        self.check_writable()?;
        self.raw_put(key, data, kind);
        Ok(())
    }

    fn delete(&mut self, key: &[u8], kind: RecordType) -> Result<()> {
        self.counters.deletes += 1;
        self.check_writable()?;
        self.raw_delete(key, kind);
        Ok(())
    }

    fn get_attribute(&mut self, key: &AttrKey) -> Result<Option<Bytes>> {
        self.counters.attr_gets += 1;
        Ok(self.raw_get(&key.to_bytes(), RecordType::Attribute))
    }

    fn put_attribute(&mut self, key: &AttrKey, data: &[u8]) -> Result<()> {
        self.counters.attr_puts += 1;
        self.check_writable()?;
        self.raw_put(&key.to_bytes(), data, RecordType::Attribute);
        Ok(())
    }

    fn delete_attribute(&mut self, key: &AttrKey) -> Result<()> {
        self.counters.attr_deletes += 1;
        self.check_writable()?;
        self.raw_delete(&key.to_bytes(), RecordType::Attribute);
        Ok(())
    }

    fn lock(&mut self) -> Result<()> {
        self.counters.locks += 1;
        self.lock_depth += 1;
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        self.lock_depth = self.lock_depth.saturating_sub(1);
        Ok(())
    }

    fn set_synchronous(&mut self, synchronous: bool) -> Result<()> {
        self.synchronous = synchronous;
        Ok(())
    }
}
