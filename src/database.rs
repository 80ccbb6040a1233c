//! Database Module
//!
//! The single-threaded core: the in-memory world, the object cache and the
//! backing store it writes through to.
//!
//! ## Responsibilities
//! - Attribute values by (object, attribute number), always through the cache
//! - Generic record access for the other record types
//! - Checkpoint the world into the backend and restore it on open
//! - Install a parsed snapshot, bypassing the cache
//! - Act as a [`SnapshotSource`] for the flatfile writer
//!
//! ## Checkpoint Records
//! ```text
//!   DbInfo  "TM3"           db_top, attr_next, record_players
//!   AttrNum block (u32 LE)  user definitions, 256 numbers per block
//!   Object  block (u32 LE)  objects, 64 per block
//!   Attribute AttrKey       one value per (object, attribute)
//! ```
//!
//! Only blocks holding something dirty are rewritten; blocks that no longer
//! hold anything are deleted.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{AttrKey, Backend, RecordType};
use crate::cache::{CacheStats, ObjectCache};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::flatfile::{
    write_snapshot, LoadReport, Snapshot, SnapshotSource, WriteOptions, WriteReport,
};
use crate::world::{AttrDef, AttrRegistry, Dbref, Object, World, A_USER_START};

/// Key of the database parameter record
const DBINFO_KEY: &[u8] = b"TM3";

/// Attribute numbers per definition block
const ATTRS_PER_BLOCK: i32 = 256;

/// Objects per object block
const OBJECTS_PER_BLOCK: i32 = 64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct DbInfo {
    db_top: Dbref,
    attr_next: i32,
    record_players: i32,
}

fn block_key(block: i32) -> [u8; 4] {
    (block as u32).to_le_bytes()
}

/// World, cache and backend, owned together
///
/// Not thread-safe on its own; [`crate::Store`] wraps it in a lock.
pub struct Database<B: Backend> {
    world: World,
    cache: ObjectCache,
    backend: B,
    config: Config,

    /// Object blocks present in the backend after the last checkpoint
    stored_blocks: i32,
}

impl<B: Backend> Database<B> {
    /// Open a database over `backend`, restoring any checkpoint it holds
    pub fn open(config: Config, backend: B) -> Result<Self> {
        config.validate()?;

        let mut db = Self {
            world: World::new(config.default_attr_flags),
            cache: ObjectCache::from_config(&config),
            backend,
            config,
            stored_blocks: 0,
        };
        db.restore()?;

        // Warm-up reads should not skew the counters
        db.cache.reset(&mut db.backend)?;
        Ok(db)
    }

    /// Rebuild the world from checkpoint records
    fn restore(&mut self) -> Result<()> {
        let Some(raw) = self.record_get(DBINFO_KEY, RecordType::DbInfo)? else {
            debug!("no checkpoint found; starting empty");
            return Ok(());
        };
        let info: DbInfo = bincode::deserialize(&raw)?;

        let mut attrs = AttrRegistry::new(self.config.default_attr_flags);
        let last_block = (info.attr_next - 1).max(A_USER_START) / ATTRS_PER_BLOCK;
        for block in A_USER_START / ATTRS_PER_BLOCK..=last_block {
            let Some(raw) = self.record_get(&block_key(block), RecordType::AttrNum)? else {
                continue;
            };
            let defs: Vec<AttrDef> = bincode::deserialize(&raw)?;
            for def in defs {
                attrs.restore(def)?;
            }
        }
        attrs.set_next_free(info.attr_next);
        attrs.rehash(self.config.hash_factor)?;
        attrs.take_dirty();

        let mut world = World::new(self.config.default_attr_flags);
        world.attrs = attrs;
        world.record_players = info.record_players;
        world.grow(usize::try_from(info.db_top).unwrap_or(0));

        let blocks = (info.db_top + OBJECTS_PER_BLOCK - 1) / OBJECTS_PER_BLOCK;
        for block in 0..blocks {
            let Some(raw) = self.record_get(&block_key(block), RecordType::Object)? else {
                continue;
            };
            let objects: Vec<Object> = bincode::deserialize(&raw)?;
            for (offset, obj) in objects.into_iter().enumerate() {
                world.set(block * OBJECTS_PER_BLOCK + offset as Dbref, obj);
            }
        }
        world.iter_mut().for_each(|(_, obj)| obj.dirty = false);

        self.world = world;
        self.stored_blocks = blocks;
        info!(
            db_top = info.db_top,
            attr_next = info.attr_next,
            "checkpoint restored"
        );
        Ok(())
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    fn object_ref(&self, dbref: Dbref) -> Result<&Object> {
        self.world.get(dbref).ok_or(StoreError::NoSuchObject(dbref))
    }

    fn object_mut(&mut self, dbref: Dbref) -> Result<&mut Object> {
        self.world.get_mut(dbref).ok_or(StoreError::NoSuchObject(dbref))
    }

    /// Value of one attribute, or `None` if the object does not carry it
    pub fn atr_get(&mut self, dbref: Dbref, attrnum: i32) -> Result<Option<String>> {
        if !self.object_ref(dbref)?.has_attr(attrnum) {
            return Ok(None);
        }
        let key = AttrKey::new(dbref, attrnum).to_bytes();
        let data = self.cache.get(&key, RecordType::Attribute, &mut self.backend)?;
        Ok(data.map(|d| String::from_utf8_lossy(&d).into_owned()))
    }

    /// Set one attribute; an empty value clears it
    pub fn atr_add(&mut self, dbref: Dbref, attrnum: i32, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.atr_clear(dbref, attrnum).map(|_| ());
        }
        let obj = self.object_mut(dbref)?;
        if obj.note_attr(attrnum) {
            obj.dirty = true;
        }
        let key = AttrKey::new(dbref, attrnum).to_bytes();
        self.cache.put(
            &key,
            RecordType::Attribute,
            Bytes::copy_from_slice(value.as_bytes()),
            &mut self.backend,
        )
    }

    /// Remove one attribute. Returns whether the object carried it.
    pub fn atr_clear(&mut self, dbref: Dbref, attrnum: i32) -> Result<bool> {
        let obj = self.object_mut(dbref)?;
        if !obj.forget_attr(attrnum) {
            return Ok(false);
        }
        obj.dirty = true;
        let key = AttrKey::new(dbref, attrnum).to_bytes();
        self.cache.delete(&key, RecordType::Attribute, &mut self.backend)?;
        Ok(true)
    }

    /// Attribute numbers present on an object, ascending
    pub fn atr_list(&self, dbref: Dbref) -> Result<Vec<i32>> {
        Ok(self.object_ref(dbref)?.attrs.clone())
    }

    // =========================================================================
    // Generic Records
    // =========================================================================

    pub fn record_get(&mut self, key: &[u8], kind: RecordType) -> Result<Option<Bytes>> {
        self.cache.get(key, kind, &mut self.backend)
    }

    pub fn record_put(&mut self, key: &[u8], kind: RecordType, data: Bytes) -> Result<()> {
        self.cache.put(key, kind, data, &mut self.backend)
    }

    pub fn record_delete(&mut self, key: &[u8], kind: RecordType) -> Result<()> {
        self.cache.delete(key, kind, &mut self.backend)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub fn object(&self, dbref: Dbref) -> Option<&Object> {
        self.world.get(dbref)
    }

    /// Mutable access; the object is marked for the next checkpoint
    pub fn object_for_update(&mut self, dbref: Dbref) -> Result<&mut Object> {
        let obj = self.object_mut(dbref)?;
        obj.dirty = true;
        Ok(obj)
    }

    pub fn create_object(&mut self, object: Object) -> Dbref {
        self.world.create(object)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn attrs(&self) -> &AttrRegistry {
        &self.world.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttrRegistry {
        &mut self.world.attrs
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Write back every dirty cache entry
    pub fn sync(&mut self) -> Result<usize> {
        self.cache.sync(&mut self.backend)
    }

    /// Persist the world: parameter record, dirty definition and object
    /// blocks, then every dirty cache entry
    pub fn checkpoint(&mut self) -> Result<()> {
        let info = DbInfo {
            db_top: self.world.db_top(),
            attr_next: self.world.attrs.next_free(),
            record_players: self.world.record_players,
        };
        self.record_put(
            DBINFO_KEY,
            RecordType::DbInfo,
            Bytes::from(bincode::serialize(&info)?),
        )?;

        let attr_blocks = self.checkpoint_attr_defs()?;
        let object_blocks = self.checkpoint_objects()?;
        let written = self.sync()?;
        self.backend.flush()?;

        debug!(attr_blocks, object_blocks, written, "checkpoint written");
        Ok(())
    }

    fn checkpoint_attr_defs(&mut self) -> Result<usize> {
        let dirty: BTreeSet<i32> = self
            .world
            .attrs
            .take_dirty()
            .into_iter()
            .map(|num| num / ATTRS_PER_BLOCK)
            .collect();

        for &block in &dirty {
            let lo = block * ATTRS_PER_BLOCK;
            let defs: Vec<AttrDef> = self
                .world
                .attrs
                .user_defs()
                .into_iter()
                .filter(|def| (lo..lo + ATTRS_PER_BLOCK).contains(&def.number))
                .cloned()
                .collect();

            if defs.is_empty() {
                self.record_delete(&block_key(block), RecordType::AttrNum)?;
            } else {
                let raw = bincode::serialize(&defs)?;
                self.record_put(&block_key(block), RecordType::AttrNum, Bytes::from(raw))?;
            }
        }
        Ok(dirty.len())
    }

    fn checkpoint_objects(&mut self) -> Result<usize> {
        let db_top = self.world.db_top();
        let blocks = (db_top + OBJECTS_PER_BLOCK - 1) / OBJECTS_PER_BLOCK;
        let mut written = 0;

        for block in 0..blocks {
            let lo = block * OBJECTS_PER_BLOCK;
            let hi = (lo + OBJECTS_PER_BLOCK).min(db_top);
            let dirty = (lo..hi).any(|dbref| self.world.get(dbref).is_some_and(|o| o.dirty));
            if !dirty {
                continue;
            }

            let objects: Vec<&Object> = (lo..hi).filter_map(|dbref| self.world.get(dbref)).collect();
            let raw = bincode::serialize(&objects)?;
            self.record_put(&block_key(block), RecordType::Object, Bytes::from(raw))?;
            for dbref in lo..hi {
                if let Some(obj) = self.world.get_mut(dbref) {
                    obj.dirty = false;
                }
            }
            written += 1;
        }

        for block in blocks..self.stored_blocks {
            self.record_delete(&block_key(block), RecordType::Object)?;
        }
        self.stored_blocks = blocks;
        Ok(written)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Replace the whole world with a parsed snapshot
    ///
    /// Attribute values go straight to the backend with per-write durability
    /// off. The new values are written first; if any write fails, the ones
    /// already written are rolled back and the old world stays in place.
    /// Only once every new value is stored are the old world's leftover
    /// values deleted.
    pub fn install(&mut self, snapshot: Snapshot) -> Result<LoadReport> {
        self.cache.reset(&mut self.backend)?;
        self.cache.set_bypass(true);
        self.backend.set_synchronous(false)?;

        let result = self.install_bypassed(snapshot);

        self.cache.set_bypass(false);
        self.backend.set_synchronous(true)?;
        result
    }

    fn install_bypassed(&mut self, snapshot: Snapshot) -> Result<LoadReport> {
        let report = snapshot.report();
        let top = usize::try_from(snapshot.db_top()).unwrap_or(0).max(snapshot.min_size);
        let mut attrs = snapshot.attrs;
        attrs.rehash(self.config.hash_factor)?;

        let old_keys: HashSet<AttrKey> = self
            .world
            .iter()
            .flat_map(|(dbref, obj)| obj.attrs.iter().map(move |&num| AttrKey::new(dbref, num)))
            .collect();

        // Previous value of every key written so far, for rollback
        let mut written: Vec<(AttrKey, Option<Bytes>)> = Vec::new();
        for (&dbref, so) in &snapshot.objects {
            for (attrnum, value) in so.attrs() {
                let key = AttrKey::new(dbref, attrnum);
                let stored = self.write_install_value(&key, value, old_keys.contains(&key));
                match stored {
                    Ok(previous) => written.push((key, previous)),
                    Err(e) => {
                        self.roll_back_install(&written);
                        return Err(e);
                    }
                }
            }
        }

        let mut world = World::new(self.config.default_attr_flags);
        world.attrs = attrs;
        world.record_players = snapshot.record_players;
        world.min_size = snapshot.min_size;
        world.grow(top);
        for (dbref, so) in snapshot.objects {
            world.set(dbref, so.object);
        }
        world.iter_mut().for_each(|(_, obj)| obj.dirty = true);
        world.attrs.mark_all_dirty();
        self.world = world;

        let new_keys: HashSet<AttrKey> = written.iter().map(|(key, _)| *key).collect();
        let mut orphaned = 0usize;
        for key in old_keys.difference(&new_keys) {
            if let Err(e) = self.backend.delete_attribute(key) {
                // Unlisted on every object, so never read back
                warn!(object = key.object, attrnum = key.attrnum, error = %e, "stale attribute left in backend");
                orphaned += 1;
            }
        }

        info!(objects = report.objects, db_top = top, orphaned, "snapshot installed");
        Ok(report)
    }

    /// Store one value of the incoming world, returning what it replaced
    fn write_install_value(&mut self, key: &AttrKey, value: &str, existed: bool) -> Result<Option<Bytes>> {
        let previous = if existed {
            self.backend.get_attribute(key)?
        } else {
            None
        };
        self.backend.put_attribute(key, value.as_bytes())?;
        Ok(previous)
    }

    /// Undo the writes of a failed install, newest first
    fn roll_back_install(&mut self, written: &[(AttrKey, Option<Bytes>)]) {
        for (key, previous) in written.iter().rev() {
            let restored = match previous {
                Some(data) => self.backend.put_attribute(key, data),
                None => self.backend.delete_attribute(key),
            };
            if let Err(e) = restored {
                warn!(object = key.object, attrnum = key.attrnum, error = %e, "install rollback failed");
            }
        }
        debug!(undone = written.len(), "install rolled back");
    }

    /// Write the live world as a flatfile
    ///
    /// The cache is synced first; the walk itself runs in dump mode so it
    /// neither skews statistics nor flushes the working set.
    pub fn write_flatfile<W: Write>(&mut self, out: W, options: WriteOptions) -> Result<WriteReport> {
        self.sync()?;
        self.cache.set_dump_mode(true);
        let result = write_snapshot(out, self, options);
        self.cache.set_dump_mode(false);
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B: Backend> SnapshotSource for Database<B> {
    fn db_top(&self) -> Dbref {
        self.world.db_top()
    }

    fn record_players(&self) -> i32 {
        self.world.record_players
    }

    fn registry(&self) -> &AttrRegistry {
        &self.world.attrs
    }

    fn object(&self, dbref: Dbref) -> Option<&Object> {
        self.world.get(dbref)
    }

    fn attr_text(&mut self, dbref: Dbref, attrnum: i32) -> Result<Option<String>> {
        self.atr_get(dbref, attrnum)
    }
}
