//! Object Cache Module
//!
//! Write-back LRU cache of typed records sitting in front of a [`Backend`].
//!
//! ## Responsibilities
//! - Serve `get` from memory, faulting through to the backing store on miss
//! - Absorb `put`/`delete` as dirty entries until eviction or `sync`
//! - Evict least-recently-used entries when cached bytes would pass the
//!   configured ceiling, writing dirty ones back first
//! - Route attribute records through the backend's attribute accessors
//!
//! ## Layout
//! ```text
//!   buckets[hash(key, type) % width]          recency list
//!   ┌────┐                                    head (LRU)
//!   │ 0  │──► e3 ◄─► e9                         │
//!   ├────┤                                      ▼
//!   │ 1  │──► e1                          e1 ◄─► e9 ◄─► e3 ◄─► e4
//!   ├────┤                                                      ▲
//!   │ 2  │──► e4                                                │
//!   └────┘                                                 tail (MRU)
//! ```
//!
//! ## Entry lifecycle
//! ```text
//!   absent ──miss fill──► clean ──put/delete──► dirty
//!     ▲                     │  ▲                  │
//!     └──────evict──────────┘  └──sync/evict──────┘ (write-back)
//! ```

mod entry;
mod stats;

pub use stats::CacheStats;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::{AttrKey, Backend, RecordType, MAX_KEY_LEN};
use crate::config::{Config, WriteBackPolicy};
use crate::error::{Result, StoreError};

use entry::{Arena, Entry, List, Ring};

/// Write-back LRU cache keyed by (bytes, [`RecordType`])
///
/// The cache never owns its backend; every operation that may need the
/// backing store takes it as an argument. Payloads are [`Bytes`], so `get`
/// returns a shared handle the caller simply drops.
pub struct ObjectCache {
    arena: Arena,
    buckets: Vec<List>,

    /// Recency list, least recently used at the head
    lru: List,

    /// Payload bytes currently cached
    size: usize,

    /// Byte ceiling that triggers eviction
    ceiling: usize,

    policy: WriteBackPolicy,
    stats: CacheStats,

    /// A snapshot is being written: fills go to the LRU head, nothing counted
    dump_mode: bool,

    /// Bulk maintenance: writes go straight to the backend
    bypass: bool,
}

impl ObjectCache {
    pub fn new(width: usize, ceiling: usize, policy: WriteBackPolicy) -> Self {
        Self {
            arena: Arena::default(),
            buckets: vec![List::default(); width.max(1)],
            lru: List::default(),
            size: 0,
            ceiling,
            policy,
            stats: CacheStats::default(),
            dump_mode: false,
            bypass: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_width, config.cache_size, config.write_back_policy)
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    /// Fetch a record
    ///
    /// A hit moves the entry to the most-recently-used end. A miss consults
    /// the backend and caches what it finds as a clean entry; a record the
    /// backend does not have is returned as `None` and nothing is cached.
    /// In bypass mode a miss is served from the backend without caching.
    pub fn get<B: Backend + ?Sized>(
        &mut self,
        key: &[u8],
        kind: RecordType,
        backend: &mut B,
    ) -> Result<Option<Bytes>> {
        check_key(key)?;
        let counting = self.counting();
        if counting {
            self.stats.reads += 1;
        }

        let bucket = self.bucket_of(key, kind);
        if let Some(idx) = self.find(bucket, key, kind) {
            if counting {
                self.stats.rhits += 1;
            }
            if !self.dump_mode {
                self.touch(idx);
            }
            return Ok(self.arena.get(idx).and_then(|e| e.data.clone()));
        }

        if counting {
            self.stats.dbreads += 1;
        }
        let Some(data) = fetch(backend, key, kind)? else {
            if counting {
                self.stats.fails += 1;
            }
            return Ok(None);
        };
        if self.bypass {
            return Ok(Some(data));
        }

        self.make_room(data.len(), None, backend)?;
        let idx = self
            .arena
            .alloc(Entry::new(key, kind, Some(data.clone()), false, bucket));
        self.arena.push_back(&mut self.buckets[bucket], idx, Ring::Chain);
        if self.dump_mode {
            // Keep a full walk from flushing the working set
            self.arena.push_front(&mut self.lru, idx, Ring::Lru);
        } else {
            self.arena.push_back(&mut self.lru, idx, Ring::Lru);
        }
        self.size += data.len();
        debug!(kind = ?kind, bytes = data.len(), "cache fill");
        Ok(Some(data))
    }

    /// Store a record, replacing any cached payload and marking it dirty
    pub fn put<B: Backend + ?Sized>(
        &mut self,
        key: &[u8],
        kind: RecordType,
        data: Bytes,
        backend: &mut B,
    ) -> Result<()> {
        check_key(key)?;
        if self.bypass {
            self.invalidate(key, kind);
            return write_back(backend, key, kind, Some(&data));
        }

        let counting = self.counting();
        if counting {
            self.stats.writes += 1;
        }

        let bucket = self.bucket_of(key, kind);
        if let Some(idx) = self.find(bucket, key, kind) {
            if counting {
                self.stats.whits += 1;
            }
            self.touch(idx);
            let old = self.arena.get(idx).map_or(0, Entry::charge);
            if data.len() > old {
                self.make_room(data.len() - old, Some(idx), backend)?;
            }
            if let Some(entry) = self.arena.get_mut(idx) {
                entry.data = Some(data.clone());
                entry.dirty = true;
            }
            self.size = self.size - old + data.len();
            return Ok(());
        }

        self.make_room(data.len(), None, backend)?;
        let len = data.len();
        let idx = self
            .arena
            .alloc(Entry::new(key, kind, Some(data), true, bucket));
        self.arena.push_back(&mut self.buckets[bucket], idx, Ring::Chain);
        self.arena.push_back(&mut self.lru, idx, Ring::Lru);
        self.size += len;
        Ok(())
    }

    /// Delete a record
    ///
    /// The deletion is held as a dirty tombstone at the LRU head, so it is
    /// the first thing written back. An uncached record still gets a
    /// tombstone; the backend copy must go at the next write-back.
    /// Tombstones carry no payload bytes, so they do not count against the
    /// ceiling; `sync` releases them once written back.
    pub fn delete<B: Backend + ?Sized>(
        &mut self,
        key: &[u8],
        kind: RecordType,
        backend: &mut B,
    ) -> Result<()> {
        check_key(key)?;
        if self.bypass {
            self.invalidate(key, kind);
            return write_back(backend, key, kind, None);
        }

        if self.counting() {
            self.stats.dels += 1;
        }

        let bucket = self.bucket_of(key, kind);
        match self.find(bucket, key, kind) {
            Some(idx) => {
                if let Some(entry) = self.arena.get_mut(idx) {
                    self.size -= entry.charge();
                    entry.data = None;
                    entry.dirty = true;
                }
                self.arena.unlink(&mut self.lru, idx, Ring::Lru);
                self.arena.push_front(&mut self.lru, idx, Ring::Lru);
            }
            None => {
                let idx = self.arena.alloc(Entry::new(key, kind, None, true, bucket));
                self.arena.push_front(&mut self.buckets[bucket], idx, Ring::Chain);
                self.arena.push_front(&mut self.lru, idx, Ring::Lru);
            }
        }
        Ok(())
    }

    /// Write back every dirty entry without evicting anything
    ///
    /// Written-back tombstones are released, since they no longer hold
    /// anything. Entries whose write-back fails stay dirty; the first
    /// failure is returned after every other entry has been attempted.
    pub fn sync<B: Backend + ?Sized>(&mut self, backend: &mut B) -> Result<usize> {
        self.stats.syncs += 1;

        let dirty: Vec<usize> = self
            .buckets
            .iter()
            .flat_map(|chain| self.arena.walk(chain, Ring::Chain))
            .filter(|&idx| self.arena.get(idx).is_some_and(|e| e.dirty))
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        backend.lock()?;
        let mut written = 0;
        let mut first_err = None;
        for idx in dirty {
            let Some(entry) = self.arena.get(idx) else {
                continue;
            };
            match write_back(backend, &entry.key, entry.kind, entry.data.as_ref()) {
                Ok(()) => {
                    self.stats.dbwrites += 1;
                    written += 1;
                    let tombstone = entry.data.is_none();
                    if tombstone {
                        self.remove(idx);
                    } else if let Some(entry) = self.arena.get_mut(idx) {
                        entry.dirty = false;
                    }
                }
                Err(e) => {
                    warn!(kind = ?entry.kind, error = %e, "write-back failed during sync; entry kept dirty");
                    first_err.get_or_insert(e);
                }
            }
        }
        backend.unlock()?;

        debug!(written, "cache synced");
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Write back everything, then drop every entry and zero the counters
    pub fn reset<B: Backend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        self.sync(backend)?;
        self.arena.clear();
        self.buckets.iter_mut().for_each(|b| *b = List::default());
        self.lru = List::default();
        self.size = 0;
        self.stats = CacheStats::default();
        Ok(())
    }

    /// Forget a cached record without writing it back
    pub fn invalidate(&mut self, key: &[u8], kind: RecordType) -> bool {
        let bucket = self.bucket_of(key, kind);
        match self.find(bucket, key, kind) {
            Some(idx) => {
                self.remove(idx);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Modes
    // =========================================================================

    /// While set, misses are cached at the LRU head and nothing is counted
    pub fn set_dump_mode(&mut self, on: bool) {
        self.dump_mode = on;
    }

    /// While set, `put` and `delete` go straight to the backend and `get`
    /// misses are not cached
    pub fn set_bypass(&mut self, on: bool) {
        self.bypass = on;
    }

    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    fn counting(&self) -> bool {
        !self.dump_mode && !self.bypass
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn bucket_of(&self, key: &[u8], kind: RecordType) -> usize {
        let hash = key
            .iter()
            .fold(0u32, |h, &b| (h << 5).wrapping_add(h).wrapping_add(u32::from(b)));
        (hash.wrapping_add(kind.as_u32()) as usize) % self.buckets.len()
    }

    fn find(&mut self, bucket: usize, key: &[u8], kind: RecordType) -> Option<usize> {
        let counting = self.counting();
        let mut cur = self.buckets[bucket].head;
        while let Some(idx) = cur {
            let entry = self.arena.get(idx)?;
            if counting {
                self.stats.checks += 1;
            }
            if entry.matches(key, kind) {
                return Some(idx);
            }
            cur = entry.links(Ring::Chain).next;
        }
        None
    }

    /// Move an entry to the most-recently-used end
    fn touch(&mut self, idx: usize) {
        self.arena.unlink(&mut self.lru, idx, Ring::Lru);
        self.arena.push_back(&mut self.lru, idx, Ring::Lru);
    }

    /// Unlink and free an entry, releasing its bytes
    fn remove(&mut self, idx: usize) {
        let Some(bucket) = self.arena.get(idx).map(|e| e.bucket) else {
            return;
        };
        self.arena.unlink(&mut self.buckets[bucket], idx, Ring::Chain);
        self.arena.unlink(&mut self.lru, idx, Ring::Lru);
        if let Some(entry) = self.arena.release(idx) {
            self.size -= entry.charge();
        }
    }

    /// Evict from the LRU head until `need` more bytes fit under the ceiling
    ///
    /// `protect` is never evicted. An insertion bigger than the whole
    /// ceiling empties the cache and is then admitted anyway.
    fn make_room<B: Backend + ?Sized>(
        &mut self,
        need: usize,
        protect: Option<usize>,
        backend: &mut B,
    ) -> Result<()> {
        while self.size + need > self.ceiling {
            let Some(victim) = self.lru.head else {
                break;
            };
            let victim = if Some(victim) == protect {
                match self.arena.get(victim).and_then(|e| e.links(Ring::Lru).next) {
                    Some(next) => next,
                    None => break,
                }
            } else {
                victim
            };
            self.evict(victim, backend)?;
        }
        Ok(())
    }

    fn evict<B: Backend + ?Sized>(&mut self, idx: usize, backend: &mut B) -> Result<()> {
        let Some(entry) = self.arena.get(idx) else {
            return Ok(());
        };

        if entry.dirty {
            match write_back(backend, &entry.key, entry.kind, entry.data.as_ref()) {
                Ok(()) => self.stats.dbwrites += 1,
                Err(e) => match self.policy {
                    WriteBackPolicy::Retain => {
                        warn!(kind = ?entry.kind, error = %e, "write-back failed; entry retained");
                        return Err(e);
                    }
                    WriteBackPolicy::Discard => {
                        warn!(kind = ?entry.kind, error = %e, "write-back failed; dirty entry discarded");
                    }
                },
            }
        }

        debug!(kind = ?entry.kind, bytes = entry.charge(), "cache evict");
        self.stats.evictions += 1;
        self.remove(idx);
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.size,
            entries: self.arena.len(),
            ..self.stats
        }
    }

    /// Payload bytes currently cached
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Is (key, kind) cached, as a payload or a tombstone?
    pub fn contains(&self, key: &[u8], kind: RecordType) -> bool {
        self.lookup(key, kind).is_some()
    }

    /// Dirty bit of a cached record, `None` when not cached
    pub fn is_dirty(&self, key: &[u8], kind: RecordType) -> Option<bool> {
        self.lookup(key, kind).map(|e| e.dirty)
    }

    /// Cached keys from least to most recently used
    pub fn lru_order(&self) -> Vec<(Vec<u8>, RecordType)> {
        self.arena
            .walk(&self.lru, Ring::Lru)
            .into_iter()
            .filter_map(|idx| self.arena.get(idx))
            .map(|e| (e.key.clone(), e.kind))
            .collect()
    }

    /// Keys of every cached record of one type
    pub fn cached_keys(&self, kind: RecordType) -> Vec<Vec<u8>> {
        self.arena
            .walk(&self.lru, Ring::Lru)
            .into_iter()
            .filter_map(|idx| self.arena.get(idx))
            .filter(|e| e.kind == kind && e.data.is_some())
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn cached_objects(&self) -> Vec<Vec<u8>> {
        self.cached_keys(RecordType::Object)
    }

    pub fn cached_attributes(&self) -> Vec<AttrKey> {
        self.cached_keys(RecordType::Attribute)
            .iter()
            .filter_map(|k| AttrKey::from_bytes(k).ok())
            .collect()
    }

    /// Lookup without touching counters or recency
    fn lookup(&self, key: &[u8], kind: RecordType) -> Option<&Entry> {
        let bucket = self.bucket_of(key, kind);
        self.arena
            .walk(&self.buckets[bucket], Ring::Chain)
            .into_iter()
            .filter_map(|idx| self.arena.get(idx))
            .find(|e| e.matches(key, kind))
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}

/// Read through the accessor matching the record type
fn fetch<B: Backend + ?Sized>(backend: &mut B, key: &[u8], kind: RecordType) -> Result<Option<Bytes>> {
    match kind {
        RecordType::Attribute => backend.get_attribute(&AttrKey::from_bytes(key)?),
        _ => backend.get(key, kind),
    }
}

/// Persist one record through the accessor matching its type. `None` data
/// deletes.
fn write_back<B: Backend + ?Sized>(
    backend: &mut B,
    key: &[u8],
    kind: RecordType,
    data: Option<&Bytes>,
) -> Result<()> {
    match (kind, data) {
        (RecordType::Attribute, Some(data)) => backend.put_attribute(&AttrKey::from_bytes(key)?, data),
        (RecordType::Attribute, None) => backend.delete_attribute(&AttrKey::from_bytes(key)?),
        (_, Some(data)) => backend.put(key, data, kind),
        (_, None) => backend.delete(key, kind),
    }
}
