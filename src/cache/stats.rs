//! Cache statistics

use std::fmt;

/// Counters kept by the object cache
///
/// Accesses made in dump or bypass mode are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` calls
    pub reads: u64,
    /// `get` calls served from memory
    pub rhits: u64,
    /// Misses that went to the backing store
    pub dbreads: u64,
    /// Misses the backing store could not satisfy either
    pub fails: u64,
    /// `put` calls
    pub writes: u64,
    /// `put` calls that found the entry cached
    pub whits: u64,
    /// `delete` calls
    pub dels: u64,
    /// Write-backs to the backing store
    pub dbwrites: u64,
    /// Chain entries compared during lookups
    pub checks: u64,
    /// `sync` calls
    pub syncs: u64,
    /// Entries evicted to make room
    pub evictions: u64,
    /// Payload bytes currently cached
    pub size: usize,
    /// Entries currently cached
    pub entries: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reads   {:>10}  Hits    {:>10}  DbReads {:>10}  Fails {:>8}", self.reads, self.rhits, self.dbreads, self.fails)?;
        writeln!(f, "Writes  {:>10}  Hits    {:>10}  DbWrite {:>10}  Dels  {:>8}", self.writes, self.whits, self.dbwrites, self.dels)?;
        write!(f, "Checks  {:>10}  Syncs   {:>10}  Evicted {:>10}  Size  {:>8} ({} entries)", self.checks, self.syncs, self.evictions, self.size, self.entries)
    }
}
