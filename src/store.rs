//! Store Module
//!
//! Thread-safe surface over a [`Database`].
//!
//! ## Concurrency Model: one lock
//!
//! - Every operation takes the same `parking_lot::Mutex`. Reads reorder the
//!   LRU list and may evict, so there is no read-only path.
//! - Backend I/O during eviction or sync happens under the lock; nothing can
//!   mutate the record being written back.
//! - Flatfile load and write hold the lock for their whole duration and
//!   bracket the backend with `lock()`/`unlock()` as well.

use std::io::{Read, Write};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use crate::backend::{Backend, FileBackend, MemoryBackend, RecordType};
use crate::cache::CacheStats;
use crate::config::Config;
use crate::database::Database;
use crate::error::Result;
use crate::flatfile::{read_snapshot, LoadReport, WriteOptions, WriteReport};
use crate::world::{AttrRegistry, Dbref, Object};

/// The object store
pub struct Store<B: Backend> {
    db: Mutex<Database<B>>,
}

impl Store<FileBackend> {
    /// Open or create a file-backed store under `config.data_dir`
    pub fn open(config: Config) -> Result<Self> {
        let backend = FileBackend::open_with_config(&config)?;
        Self::with_backend(config, backend)
    }
}

impl Store<MemoryBackend> {
    /// A store that lives only as long as the process
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<B: Backend> Store<B> {
    pub fn with_backend(config: Config, backend: B) -> Result<Self> {
        let db = Database::open(config, backend)?;
        Ok(Self { db: Mutex::new(db) })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn atr_get(&self, dbref: Dbref, attrnum: i32) -> Result<Option<String>> {
        self.db.lock().atr_get(dbref, attrnum)
    }

    pub fn atr_add(&self, dbref: Dbref, attrnum: i32, value: &str) -> Result<()> {
        self.db.lock().atr_add(dbref, attrnum, value)
    }

    pub fn atr_clear(&self, dbref: Dbref, attrnum: i32) -> Result<bool> {
        self.db.lock().atr_clear(dbref, attrnum)
    }

    pub fn atr_list(&self, dbref: Dbref) -> Result<Vec<i32>> {
        self.db.lock().atr_list(dbref)
    }

    /// Look up an attribute by name, defining it if needed
    pub fn make_attr(&self, name: &str) -> Result<i32> {
        self.db.lock().attrs_mut().make(name)
    }

    /// Run `f` against the attribute registry
    pub fn with_attrs<R>(&self, f: impl FnOnce(&AttrRegistry) -> R) -> R {
        f(self.db.lock().attrs())
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub fn record_get(&self, key: &[u8], kind: RecordType) -> Result<Option<Bytes>> {
        self.db.lock().record_get(key, kind)
    }

    pub fn record_put(&self, key: &[u8], kind: RecordType, data: impl Into<Bytes>) -> Result<()> {
        self.db.lock().record_put(key, kind, data.into())
    }

    pub fn record_delete(&self, key: &[u8], kind: RecordType) -> Result<()> {
        self.db.lock().record_delete(key, kind)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Run `f` against one object; `None` if there is no such object
    pub fn with_object<R>(&self, dbref: Dbref, f: impl FnOnce(&Object) -> R) -> Option<R> {
        self.db.lock().object(dbref).map(f)
    }

    /// Run `f` against one object and mark it for the next checkpoint
    pub fn update_object<R>(&self, dbref: Dbref, f: impl FnOnce(&mut Object) -> R) -> Result<R> {
        let mut db = self.db.lock();
        Ok(f(db.object_for_update(dbref)?))
    }

    pub fn create_object(&self, object: Object) -> Dbref {
        self.db.lock().create_object(object)
    }

    pub fn db_top(&self) -> Dbref {
        self.db.lock().world().db_top()
    }

    // =========================================================================
    // Durability
    // =========================================================================

    pub fn sync(&self) -> Result<usize> {
        self.db.lock().sync()
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.db.lock().checkpoint()
    }

    /// Checkpoint and hand back the backend
    pub fn close(self) -> Result<B> {
        let mut db = self.db.into_inner();
        db.checkpoint()?;
        info!("store closed");
        Ok(db.into_backend())
    }

    // =========================================================================
    // Flatfiles
    // =========================================================================

    /// Replace the whole world with a flatfile, in any dialect
    ///
    /// The stream is parsed completely before anything is touched; a
    /// corrupt stream leaves the store as it was. A backend write failure
    /// part way through the install is rolled back the same way.
    pub fn load_flatfile<R: Read>(&self, input: R) -> Result<LoadReport> {
        let mut db = self.db.lock();
        let snapshot = read_snapshot(input, db.config().default_attr_flags)?;

        db.backend_mut().lock()?;
        let result = db.install(snapshot);
        db.backend_mut().unlock()?;
        result
    }

    /// Write the whole world as a flatfile
    pub fn write_flatfile<W: Write>(&self, out: W, options: WriteOptions) -> Result<WriteReport> {
        let mut db = self.db.lock();
        db.backend_mut().lock()?;
        let result = db.write_flatfile(out, options);
        db.backend_mut().unlock()?;
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn cache_stats(&self) -> CacheStats {
        self.db.lock().cache_stats()
    }

    /// Run `f` against the backend
    pub fn with_backend_ref<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(self.db.lock().backend())
    }

    /// Run `f` against the whole database, under the lock
    pub fn with_database<R>(&self, f: impl FnOnce(&mut Database<B>) -> R) -> R {
        f(&mut self.db.lock())
    }
}
