//! # worldstore
//!
//! The object store of a text-based virtual world server:
//! - Chained hash indexes for every name and number lookup
//! - A write-back LRU cache of typed records in front of a blocking backend
//! - Checkpoints of the object table into that backend
//! - A flatfile interchange codec that reads four historical dialects and
//!   writes the current one
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │                 (one parking_lot::Mutex)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Database                              │
//! │        World (objects + AttrRegistry)   ObjectCache          │
//! └──────────┬───────────────────────────────────┬──────────────┘
//!            │ load / write                      │ get / put / delete
//!            ▼                                   ▼
//!   ┌─────────────────┐                 ┌─────────────────┐
//!   │    Flatfile     │                 │     Backend     │
//!   │ (codec + locks) │                 │ (memory / file) │
//!   └─────────────────┘                 └─────────────────┘
//! ```
//!
//! Live mutation always goes through the cache. Flatfile loads populate the
//! world directly with the cache bypassed; writes sync the cache first and
//! then walk the table.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod htab;
pub mod backend;
pub mod cache;
pub mod world;
pub mod lock;
pub mod flatfile;
pub mod database;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, SyncStrategy, WriteBackPolicy};
pub use backend::{AttrKey, Backend, FileBackend, MemoryBackend, RecordType};
pub use cache::{CacheStats, ObjectCache};
pub use database::Database;
pub use flatfile::{Dialect, LoadReport, WriteOptions, WriteReport};
pub use store::Store;
pub use world::{Dbref, Object, ObjectType, NOTHING};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of worldstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
