//! Chained hash table over an entry arena

use std::cell::Cell;

use tracing::{debug, warn};

use crate::error::{Result, StoreError};

use super::{table_size_for, HashKey, HashStats, KeyKind};

/// Load factor used when none is configured
const DEFAULT_HASH_FACTOR: usize = 2;

/// Tables above this many buckets are shrunk when oversized
const SHRINK_THRESHOLD: usize = 512;

struct Slot<V> {
    key: HashKey,
    data: V,
    flags: u32,
    next: Option<usize>,
}

/// Position of the first/next traversal
#[derive(Debug, Clone, Copy)]
struct Cursor {
    bucket: usize,
    slot: usize,
}

/// A hash table keyed by strings or integers
///
/// Buckets hold the head of a singly linked chain of arena slots; new
/// entries go to the head of their chain. Lookups take `&self` and record
/// statistics through interior mutability, so the table is `Send` but not
/// `Sync` and is meant to live behind the store's lock.
///
/// A table created with [`HashTable::uninit`] has no buckets. Lookups on it
/// find nothing, and mutations fail with [`StoreError::Uninitialized`]
/// without touching anything.
pub struct HashTable<V> {
    /// Label used in statistics rows and log lines
    name: String,

    /// Kind of key accepted by this table
    kind: KeyKind,

    /// Chain heads, length is a power of two (or zero when uninitialised)
    buckets: Vec<Option<usize>>,

    /// Entry storage; chains link through indices into this vector
    slots: Vec<Option<Slot<V>>>,

    /// Vacated slot indices available for reuse
    free: Vec<usize>,

    /// `buckets.len() - 1`
    mask: u32,

    /// Live entry count
    entries: usize,

    /// Buckets per entry targeted by `resize`
    hash_factor: usize,

    stats: Cell<HashStats>,
    cursor: Cell<Option<Cursor>>,
}

impl<V> HashTable<V> {
    /// Create a table with room for `capacity` buckets, rounded up to the
    /// next power of two
    pub fn new(name: impl Into<String>, capacity: usize, kind: KeyKind) -> Self {
        let mut table = Self::uninit(name);
        table.init(capacity, kind);
        table
    }

    /// Create a table with no buckets
    pub fn uninit(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: KeyKind::Str,
            buckets: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            mask: 0,
            entries: 0,
            hash_factor: DEFAULT_HASH_FACTOR,
            stats: Cell::new(HashStats::default()),
            cursor: Cell::new(None),
        }
    }

    /// Set the load factor used by [`HashTable::resize`]
    pub fn with_hash_factor(mut self, factor: usize) -> Self {
        self.hash_factor = factor.max(1);
        self
    }

    pub fn set_hash_factor(&mut self, factor: usize) {
        self.hash_factor = factor.max(1);
    }

    /// (Re)initialise the table, dropping every entry and resetting statistics
    pub fn init(&mut self, capacity: usize, kind: KeyKind) {
        let size = table_size_for(capacity);
        self.kind = kind;
        self.buckets = vec![None; size];
        self.slots.clear();
        self.free.clear();
        self.mask = (size - 1) as u32;
        self.entries = 0;
        self.stats.set(HashStats::for_size(size));
        self.cursor.set(None);
    }

    pub fn is_initialized(&self) -> bool {
        !self.buckets.is_empty()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the payload stored under `key`
    pub fn find(&self, key: &HashKey) -> Option<&V> {
        self.locate(key)
            .and_then(|idx| self.slots[idx].as_ref())
            .map(|slot| &slot.data)
    }

    /// Find the payload stored under `key` for modification
    pub fn find_mut(&mut self, key: &HashKey) -> Option<&mut V> {
        let idx = self.locate(key)?;
        self.slots[idx].as_mut().map(|slot| &mut slot.data)
    }

    /// Find the flag word stored with `key`
    pub fn find_flags(&self, key: &HashKey) -> Option<u32> {
        self.locate(key)
            .and_then(|idx| self.slots[idx].as_ref())
            .map(|slot| slot.flags)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.locate(key).is_some()
    }

    /// Walk the chain for `key`, recording lookup statistics
    fn locate(&self, key: &HashKey) -> Option<usize> {
        if !self.is_initialized() || key.kind() != self.kind {
            return None;
        }

        let mut checked = 0u32;
        let mut found = None;
        let mut cur = self.buckets[key.bucket(self.mask)];
        while let Some(idx) = cur {
            let Some(slot) = self.slots[idx].as_ref() else {
                break;
            };
            checked += 1;
            if slot.key == *key {
                found = Some(idx);
                break;
            }
            cur = slot.next;
        }

        let mut stats = self.stats.get();
        stats.record_lookup(checked, found.is_some());
        self.stats.set(stats);
        found
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert a new entry. An existing entry with an equal key is never
    /// overwritten.
    pub fn insert(&mut self, key: HashKey, data: V) -> Result<()> {
        self.insert_with_flags(key, data, 0)
    }

    /// Insert a new entry carrying a flag word (see [`super::HASH_ALIAS`])
    pub fn insert_with_flags(&mut self, key: HashKey, data: V, flags: u32) -> Result<()> {
        if !self.is_initialized() {
            warn!(table = %self.name, key = %key, "insert into uninitialized hash table");
            return Err(StoreError::Uninitialized);
        }
        if key.kind() != self.kind {
            return Err(StoreError::KeyKindMismatch {
                expected: self.kind.as_str(),
            });
        }
        if self.locate(&key).is_some() {
            warn!(table = %self.name, key = %key, "duplicate key rejected");
            return Err(StoreError::DuplicateKey(key.to_string()));
        }

        let bucket = key.bucket(self.mask);
        let head = self.buckets[bucket];
        let slot = Slot {
            key,
            data,
            flags,
            next: head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        if head.is_none() {
            self.update_stats(|s| s.nulls = s.nulls.saturating_sub(1));
        }
        self.buckets[bucket] = Some(idx);
        self.entries += 1;
        Ok(())
    }

    /// Remove the entry for `key`, returning its payload
    pub fn delete(&mut self, key: &HashKey) -> Option<V> {
        if !self.is_initialized() || key.kind() != self.kind {
            return None;
        }

        let bucket = key.bucket(self.mask);
        let mut prev: Option<usize> = None;
        let mut cur = self.buckets[bucket];
        while let Some(idx) = cur {
            let (matches, next) = match self.slots[idx].as_ref() {
                Some(slot) => (slot.key == *key, slot.next),
                None => return None,
            };
            if matches {
                return self.unlink(bucket, prev, idx).map(|slot| slot.data);
            }
            prev = Some(idx);
            cur = next;
        }
        None
    }

    /// Swap in a new payload for an existing key. Returns false when the key
    /// is absent; nothing is inserted in that case.
    pub fn replace(&mut self, key: &HashKey, data: V) -> bool {
        match self.find_mut(key) {
            Some(slot) => {
                *slot = data;
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose payload equals `data`
    pub fn delete_all(&mut self, data: &V) -> usize
    where
        V: PartialEq,
    {
        let mut removed = 0;
        for bucket in 0..self.buckets.len() {
            let mut prev: Option<usize> = None;
            let mut cur = self.buckets[bucket];
            while let Some(idx) = cur {
                let (matches, next) = match self.slots[idx].as_ref() {
                    Some(slot) => (slot.data == *data, slot.next),
                    None => break,
                };
                if matches {
                    self.unlink(bucket, prev, idx);
                    removed += 1;
                } else {
                    prev = Some(idx);
                }
                cur = next;
            }
        }
        removed
    }

    /// Repoint every entry whose payload equals `old` at a copy of `new`
    pub fn replace_all(&mut self, old: &V, new: &V) -> usize
    where
        V: PartialEq + Clone,
    {
        let mut replaced = 0;
        for slot in self.slots.iter_mut().flatten() {
            if slot.data == *old {
                slot.data = new.clone();
                replaced += 1;
            }
        }
        replaced
    }

    /// Drop every entry and zero the statistics. A non-zero `size` that
    /// differs from the current bucket count reallocates the bucket array.
    pub fn flush(&mut self, size: usize) {
        if !self.is_initialized() {
            return;
        }
        if size != 0 && table_size_for(size) != self.buckets.len() {
            let kind = self.kind;
            self.init(size, kind);
            return;
        }

        self.buckets.iter_mut().for_each(|b| *b = None);
        self.slots.clear();
        self.free.clear();
        self.entries = 0;
        self.stats.set(HashStats::for_size(self.buckets.len()));
        self.cursor.set(None);
    }

    /// Rebuild the bucket array for the current population
    ///
    /// The new size is `entries × hash_factor`, at least `min_size`, rounded
    /// to a power of two, and halved again when that leaves a large table
    /// more than a third oversized. Entries are re-chained in place. Any
    /// traversal in progress is invalidated.
    pub fn resize(&mut self, min_size: usize) -> Result<()> {
        if !self.is_initialized() {
            warn!(table = %self.name, "resize of uninitialized hash table");
            return Err(StoreError::Uninitialized);
        }

        let wanted = self.entries.saturating_mul(self.hash_factor).max(min_size);
        let mut size = table_size_for(wanted);
        let needed = self.entries as f64 * 1.33 * self.hash_factor as f64;
        if size > SHRINK_THRESHOLD && size as f64 > needed {
            size /= 2;
        }
        if size == self.buckets.len() {
            return Ok(());
        }

        // Collect live slots in chain order, then relink into the new array
        let mut live = Vec::with_capacity(self.entries);
        for head in &self.buckets {
            let mut cur = *head;
            while let Some(idx) = cur {
                live.push(idx);
                cur = self.slots[idx].as_ref().and_then(|s| s.next);
            }
        }

        let old_size = self.buckets.len();
        self.buckets = vec![None; size];
        self.mask = (size - 1) as u32;
        let mut nulls = size;
        for idx in live {
            if let Some(slot) = self.slots[idx].as_mut() {
                let bucket = slot.key.bucket(self.mask);
                if self.buckets[bucket].is_none() {
                    nulls -= 1;
                }
                slot.next = self.buckets[bucket];
                self.buckets[bucket] = Some(idx);
            }
        }

        self.update_stats(|s| {
            s.size = size;
            s.nulls = nulls;
        });
        self.cursor.set(None);
        debug!(table = %self.name, old_size, new_size = size, entries = self.entries, "hash table resized");
        Ok(())
    }

    /// Unlink `idx` from `bucket`, given its chain predecessor
    fn unlink(&mut self, bucket: usize, prev: Option<usize>, idx: usize) -> Option<Slot<V>> {
        let slot = self.slots[idx].take()?;
        match prev {
            Some(p) => {
                if let Some(prev_slot) = self.slots[p].as_mut() {
                    prev_slot.next = slot.next;
                }
            }
            None => self.buckets[bucket] = slot.next,
        }

        if self.buckets[bucket].is_none() {
            self.update_stats(|s| s.nulls += 1);
        }
        if matches!(self.cursor.get(), Some(c) if c.slot == idx) {
            self.cursor.set(None);
        }

        self.free.push(idx);
        self.entries -= 1;
        self.update_stats(|s| s.deletes = s.deletes.wrapping_add(1));
        Some(slot)
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Start an unordered traversal, returning the first entry
    pub fn first(&self) -> Option<(&HashKey, &V)> {
        self.cursor.set(None);
        self.scan_from(0)
    }

    /// Continue the traversal started by [`HashTable::first`]
    ///
    /// Returns `None` at the end, or when the traversal was invalidated by a
    /// resize, flush, or deletion of the entry the cursor rests on.
    pub fn next_entry(&self) -> Option<(&HashKey, &V)> {
        let cursor = self.cursor.get()?;
        let Some(slot) = self.slots.get(cursor.slot).and_then(|s| s.as_ref()) else {
            self.cursor.set(None);
            return None;
        };

        match slot.next {
            Some(next) => {
                self.cursor.set(Some(Cursor {
                    bucket: cursor.bucket,
                    slot: next,
                }));
                self.slots[next].as_ref().map(|s| (&s.key, &s.data))
            }
            None => self.scan_from(cursor.bucket + 1),
        }
    }

    fn scan_from(&self, start: usize) -> Option<(&HashKey, &V)> {
        for bucket in start..self.buckets.len() {
            if let Some(idx) = self.buckets[bucket] {
                self.cursor.set(Some(Cursor { bucket, slot: idx }));
                return self.slots[idx].as_ref().map(|s| (&s.key, &s.data));
            }
        }
        self.cursor.set(None);
        None
    }

    /// Iterate over every entry in bucket order without disturbing the cursor
    pub fn iter(&self) -> impl Iterator<Item = (&HashKey, &V)> + '_ {
        self.buckets.iter().flat_map(move |head| {
            let mut cur = *head;
            std::iter::from_fn(move || {
                let slot = self.slots[cur?].as_ref()?;
                cur = slot.next;
                Some((&slot.key, &slot.data))
            })
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> + '_ {
        self.iter().map(|(k, _)| k)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of buckets
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    pub fn stats(&self) -> HashStats {
        let mut stats = self.stats.get();
        stats.size = self.buckets.len();
        stats.entries = self.entries;
        stats
    }

    /// Zero the lookup and deletion counters, keeping the table shape
    pub fn reset_stats(&self) {
        self.update_stats(HashStats::reset_counters);
    }

    /// One formatted statistics row for reports
    pub fn stats_row(&self) -> String {
        self.stats().row(&self.name)
    }

    fn update_stats(&self, f: impl FnOnce(&mut HashStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}
