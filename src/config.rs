//! Configuration for worldstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a worldstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the file backend
    /// Internal structure:
    ///   {data_dir}/
    ///     └── records.log      (append-only record log)
    pub data_dir: PathBuf,

    /// Sync strategy: how often the file backend fsyncs
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Number of cache hash buckets
    pub cache_width: usize,

    /// Ceiling on cached payload bytes before eviction kicks in
    pub cache_size: usize,

    /// What happens to a dirty entry whose write-back fails during eviction
    pub write_back_policy: WriteBackPolicy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Load factor used when resizing hash indexes (slots per entry)
    pub hash_factor: usize,

    /// Flags given to user attributes defined without explicit flags
    pub default_attr_flags: u32,
}

/// Backend sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Policy applied when writing back a dirty entry fails during eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBackPolicy {
    /// Keep the entry cached and dirty, and fail the operation that needed
    /// the room. Nothing is lost; the write-back is retried next time.
    Retain,

    /// Log the failure and evict anyway. The pending change is lost.
    Discard,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./worldstore_data"),
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            cache_width: 200,
            cache_size: 1_000_000, // 1 MB
            write_back_policy: WriteBackPolicy::Retain,
            hash_factor: 2,
            default_attr_flags: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the store cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cache_width == 0 {
            return Err(StoreError::Config("cache_width must be non-zero".into()));
        }
        if self.cache_size == 0 {
            return Err(StoreError::Config("cache_size must be non-zero".into()));
        }
        if self.hash_factor == 0 {
            return Err(StoreError::Config("hash_factor must be non-zero".into()));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(StoreError::Config(
                "sync_strategy entry count must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the file backend)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the backend sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the number of cache buckets
    pub fn cache_width(mut self, width: usize) -> Self {
        self.config.cache_width = width;
        self
    }

    /// Set the cache byte ceiling
    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.cache_size = size;
        self
    }

    /// Set the eviction write-back failure policy
    pub fn write_back_policy(mut self, policy: WriteBackPolicy) -> Self {
        self.config.write_back_policy = policy;
        self
    }

    /// Set the hash index load factor
    pub fn hash_factor(mut self, factor: usize) -> Self {
        self.config.hash_factor = factor;
        self
    }

    /// Set the default flags for user-defined attributes
    pub fn default_attr_flags(mut self, flags: u32) -> Self {
        self.config.default_attr_flags = flags;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
