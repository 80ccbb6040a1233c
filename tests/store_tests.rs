//! Tests for the Store facade and the database beneath it
//!
//! These tests verify:
//! - Attribute get/add/clear/list through the write-back cache
//! - Generic records and object updates
//! - Checkpoint and restore, in memory and on disk
//! - Flatfile load replaces the world, and a corrupt load changes nothing
//! - Flatfile write reflects the live world and leaves statistics alone
//! - Concurrent use from several threads

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use worldstore::config::SyncStrategy;
use worldstore::flatfile::{EXPORT_VERSION, TRAILER};
use worldstore::world::flags::{TYPE_PLAYER, TYPE_ROOM};
use worldstore::world::{A_DESC, A_LOCK, A_SEX};
use worldstore::{
    AttrKey, Config, Dialect, FileBackend, MemoryBackend, Object, ObjectType, RecordType, Store,
    StoreError, WriteOptions,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> Store<MemoryBackend> {
    Store::in_memory(Config::default()).unwrap()
}

/// Store with Limbo (#0, a room) and Wizard (#1, a player)
fn setup_world() -> Store<MemoryBackend> {
    let store = setup_store();
    store.create_object(Object::new("Limbo", ObjectType::Room, 1));
    store.create_object(Object::new("Wizard", ObjectType::Player, 1));
    store.atr_add(0, A_DESC, "A plain room.").unwrap();
    store.atr_add(1, A_SEX, "none").unwrap();
    store
}

fn setup_file_store(temp_dir: &TempDir) -> Store<FileBackend> {
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    Store::open(config).unwrap()
}

/// Current-dialect stream holding `names` as rooms, each with a Desc
fn flatfile_with_rooms(names: &[&str]) -> String {
    let mut text = format!("+T{}\n+S{}\n+N256\n-R0\n", EXPORT_VERSION, names.len());
    for (dbref, name) in names.iter().enumerate() {
        text.push_str(&format!(
            "!{}\n\"{}\"\n-1\n-1\n-1\n-1\n-1\n-1\n\n1\n-1\n0\n{}\n0\n0\n0\n0\n1\n1\n1\n>{}\n\"{} desc\"\n<\n",
            dbref, name, TYPE_ROOM, A_DESC, name
        ));
    }
    text.push_str(TRAILER);
    text.push('\n');
    text
}

// =============================================================================
// Attributes
// =============================================================================

#[test]
fn test_atr_add_get_clear() {
    let store = setup_world();

    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));
    assert_eq!(store.atr_list(0).unwrap(), vec![A_DESC]);

    assert!(store.atr_clear(0, A_DESC).unwrap());
    assert!(!store.atr_clear(0, A_DESC).unwrap());
    assert_eq!(store.atr_get(0, A_DESC).unwrap(), None);
    assert!(store.atr_list(0).unwrap().is_empty());
}

#[test]
fn test_atr_add_empty_value_clears() {
    let store = setup_world();

    store.atr_add(1, A_SEX, "").unwrap();

    assert_eq!(store.atr_get(1, A_SEX).unwrap(), None);
    assert!(store.atr_list(1).unwrap().is_empty());
}

#[test]
fn test_atr_overwrite() {
    let store = setup_world();

    store.atr_add(0, A_DESC, "A dusty room.").unwrap();

    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A dusty room."));
    assert_eq!(store.atr_list(0).unwrap(), vec![A_DESC]);
}

#[test]
fn test_atr_on_missing_object() {
    let store = setup_world();

    assert!(matches!(store.atr_get(7, A_DESC), Err(StoreError::NoSuchObject(7))));
    assert!(matches!(store.atr_add(-1, A_DESC, "x"), Err(StoreError::NoSuchObject(-1))));
    assert!(matches!(store.atr_list(7), Err(StoreError::NoSuchObject(7))));
}

#[test]
fn test_absent_attribute_skips_backend() {
    let store = setup_world();
    store.with_database(|db| db.backend_mut().reset_counters());

    assert_eq!(store.atr_get(0, A_SEX).unwrap(), None);

    assert_eq!(store.with_backend_ref(|b| b.counters().attr_gets), 0);
}

#[test]
fn test_atr_add_is_written_back_on_sync() {
    let store = setup_world();
    let key = AttrKey::new(0, A_DESC);

    assert!(store.with_backend_ref(|b| b.peek_attribute(&key).is_none()));

    store.sync().unwrap();

    assert!(store.with_backend_ref(|b| b.peek_attribute(&key).is_some()));
}

#[test]
fn test_make_attr() {
    let store = setup_store();

    let color = store.make_attr("Color").unwrap();

    assert_eq!(color, 256);
    assert_eq!(store.make_attr("COLOR").unwrap(), color);
    assert_eq!(store.make_attr("Desc").unwrap(), A_DESC);
    assert_eq!(store.with_attrs(|attrs| attrs.next_free()), 257);
}

// =============================================================================
// Records and Objects
// =============================================================================

#[test]
fn test_generic_records() {
    let store = setup_store();

    store.record_put(b"mail:1", RecordType::Module, "hello").unwrap();
    assert_eq!(store.record_get(b"mail:1", RecordType::Module).unwrap().unwrap(), "hello");
    assert!(store.record_get(b"mail:1", RecordType::Object).unwrap().is_none());

    store.record_delete(b"mail:1", RecordType::Module).unwrap();
    assert!(store.record_get(b"mail:1", RecordType::Module).unwrap().is_none());
}

#[test]
fn test_update_and_read_object() {
    let store = setup_world();

    store.update_object(1, |obj| obj.pennies = 50).unwrap();

    assert_eq!(store.with_object(1, |obj| obj.pennies), Some(50));
    assert_eq!(store.with_object(1, |obj| obj.is_player()), Some(true));
    assert_eq!(store.with_object(9, |obj| obj.pennies), None);
    assert!(matches!(
        store.update_object(9, |obj| obj.pennies = 1),
        Err(StoreError::NoSuchObject(9))
    ));
}

#[test]
fn test_create_object_appends() {
    let store = setup_world();

    let dbref = store.create_object(Object::new("Crate", ObjectType::Thing, 1));

    assert_eq!(dbref, 2);
    assert_eq!(store.db_top(), 3);
}

// =============================================================================
// Checkpoint and Restore
// =============================================================================

#[test]
fn test_close_then_reopen_in_memory() {
    let store = setup_world();
    let color = store.make_attr("Color").unwrap();
    store.atr_add(1, color, "blue").unwrap();
    store.update_object(1, |obj| obj.pennies = 25).unwrap();

    let backend = store.close().unwrap();
    let store = Store::with_backend(Config::default(), backend).unwrap();

    assert_eq!(store.db_top(), 2);
    assert_eq!(store.with_object(0, |obj| obj.name.clone()).as_deref(), Some("Limbo"));
    assert_eq!(store.with_object(1, |obj| obj.pennies), Some(25));
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));
    assert_eq!(store.atr_get(1, color).unwrap().as_deref(), Some("blue"));
    assert_eq!(store.with_attrs(|attrs| attrs.lookup_name("color").map(|d| d.number)), Some(color));
    assert_eq!(store.make_attr("Shape").unwrap(), color + 1);
}

#[test]
fn test_reopen_with_larger_hash_factor() {
    let store = setup_world();
    let numbers: Vec<i32> = (0..300)
        .map(|n| store.make_attr(&format!("Attr{}", n)).unwrap())
        .collect();
    let backend = store.close().unwrap();

    let config = Config::builder().hash_factor(8).build();
    let store = Store::with_backend(config, backend).unwrap();

    for (n, &number) in numbers.iter().enumerate() {
        let found = store.with_attrs(|attrs| attrs.lookup_name(&format!("attr{}", n)).map(|d| d.number));
        assert_eq!(found, Some(number));
    }
    assert_eq!(store.make_attr("Fresh").unwrap(), numbers[299] + 1);
}

#[test]
fn test_reopen_starts_with_cold_cache() {
    let store = setup_world();
    let backend = store.close().unwrap();

    let store = Store::with_backend(Config::default(), backend).unwrap();

    let stats = store.cache_stats();
    assert_eq!(stats.reads, 0);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_unchanged_checkpoint_rewrites_only_parameters() {
    let store = setup_world();
    store.checkpoint().unwrap();
    store.with_database(|db| db.backend_mut().reset_counters());

    store.checkpoint().unwrap();

    let counters = store.with_backend_ref(|b| b.counters());
    assert_eq!(counters.puts, 1);
    assert_eq!(counters.attr_puts, 0);
    assert_eq!(counters.deletes, 0);
}

#[test]
fn test_checkpoint_deletes_dropped_blocks() {
    let store = setup_store();
    for n in 0..70 {
        store.create_object(Object::new(format!("Room {}", n), ObjectType::Room, 0));
    }
    store.checkpoint().unwrap();
    let second_block = 1u32.to_le_bytes();
    assert!(store.with_backend_ref(|b| b.peek(&second_block, RecordType::Object).is_some()));

    store.load_flatfile(flatfile_with_rooms(&["Only"]).as_bytes()).unwrap();
    store.checkpoint().unwrap();

    assert!(store.with_backend_ref(|b| b.peek(&second_block, RecordType::Object).is_none()));
}

#[test]
fn test_file_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = setup_file_store(&temp_dir);
        store.create_object(Object::new("Limbo", ObjectType::Room, 0));
        store.atr_add(0, A_DESC, "On disk.").unwrap();
        store.close().unwrap();
    }

    let store = setup_file_store(&temp_dir);

    assert_eq!(store.db_top(), 1);
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("On disk."));
    assert!(store.with_backend_ref(|b| !b.is_empty()));
}

// =============================================================================
// Flatfile Load
// =============================================================================

#[test]
fn test_load_flatfile_replaces_world() {
    let store = setup_world();
    store.checkpoint().unwrap();

    let report = store
        .load_flatfile(flatfile_with_rooms(&["Hall", "Kitchen"]).as_bytes())
        .unwrap();

    assert_eq!(report.objects, 2);
    assert_eq!(report.dialect, Dialect::TinyMush);
    assert_eq!(store.db_top(), 2);
    assert_eq!(store.with_object(1, |obj| obj.name.clone()).as_deref(), Some("Kitchen"));
    assert_eq!(store.atr_get(1, A_DESC).unwrap().as_deref(), Some("Kitchen desc"));
    assert_eq!(store.atr_get(1, A_SEX).unwrap(), None);

    // The old world's values are gone from the backend too
    let stale = AttrKey::new(1, A_SEX);
    assert!(store.with_backend_ref(|b| b.peek_attribute(&stale).is_none()));
    assert!(store.with_backend_ref(|b| !b.is_locked() && b.is_synchronous()));
}

#[test]
fn test_load_flatfile_grows_to_size_record() {
    let store = setup_store();
    let text = flatfile_with_rooms(&["Hall"]).replacen("+S1\n", "+S5\n", 1);

    store.load_flatfile(text.as_bytes()).unwrap();

    assert_eq!(store.db_top(), 5);
    assert_eq!(store.with_object(4, |obj| obj.is_going()), Some(true));
}

#[test]
fn test_corrupt_load_leaves_store_untouched() {
    let store = setup_world();
    let mut text = flatfile_with_rooms(&["Hall", "Kitchen", "Cellar"]);
    text.truncate(text.len() - TRAILER.len() - 1);

    let result = store.load_flatfile(text.as_bytes());

    assert!(matches!(result, Err(StoreError::CorruptSnapshot { .. })));
    assert_eq!(store.db_top(), 2);
    assert_eq!(store.with_object(0, |obj| obj.name.clone()).as_deref(), Some("Limbo"));
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));
    assert!(store.with_backend_ref(|b| !b.is_locked()));
}

#[test]
fn test_failed_install_rolls_back_written_values() {
    let store = setup_world();
    store.sync().unwrap();
    // Limbo's new Desc is written, Kitchen's is refused
    store.with_database(|db| db.backend_mut().fail_nth_write(2));

    let result = store.load_flatfile(flatfile_with_rooms(&["Hall", "Kitchen"]).as_bytes());

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(store.db_top(), 2);
    assert_eq!(store.with_object(0, |obj| obj.name.clone()).as_deref(), Some("Limbo"));
    assert_eq!(store.atr_list(0).unwrap(), vec![A_DESC]);
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));
    assert_eq!(store.atr_get(1, A_SEX).unwrap().as_deref(), Some("none"));
    let refused = AttrKey::new(1, A_DESC);
    assert!(store.with_backend_ref(|b| b.peek_attribute(&refused).is_none()));
    assert!(store.with_backend_ref(|b| !b.is_locked() && b.is_synchronous()));
}

#[test]
fn test_load_into_rejecting_backend_keeps_world() {
    let store = setup_world();
    store.sync().unwrap();
    store.with_database(|db| db.backend_mut().set_fail_writes(true));

    let result = store.load_flatfile(flatfile_with_rooms(&["Hall"]).as_bytes());

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));

    store.with_database(|db| db.backend_mut().set_fail_writes(false));
    store.load_flatfile(flatfile_with_rooms(&["Hall"]).as_bytes()).unwrap();
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("Hall desc"));
}

#[test]
fn test_imported_file_store_reopens() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = setup_file_store(&temp_dir);
        store
            .load_flatfile(flatfile_with_rooms(&["Hall", "Kitchen"]).as_bytes())
            .unwrap();
        store.close().unwrap();
    }

    let store = setup_file_store(&temp_dir);

    assert_eq!(store.db_top(), 2);
    assert_eq!(store.atr_get(0, A_DESC).unwrap().as_deref(), Some("Hall desc"));
}

// =============================================================================
// Flatfile Write
// =============================================================================

#[test]
fn test_write_flatfile_loads_into_fresh_store() {
    let store = setup_world();
    store.atr_add(0, A_LOCK, "#1").unwrap();

    let mut out = Vec::new();
    let report = store.write_flatfile(&mut out, WriteOptions::export()).unwrap();

    assert_eq!(report.objects, 2);
    let copy = setup_store();
    copy.load_flatfile(out.as_slice()).unwrap();

    assert_eq!(copy.db_top(), 2);
    assert_eq!(copy.with_object(1, |obj| obj.flags1 & 0x7), Some(TYPE_PLAYER));
    assert_eq!(copy.with_object(1, |obj| obj.name.clone()).as_deref(), Some("Wizard"));
    assert_eq!(copy.atr_get(0, A_DESC).unwrap().as_deref(), Some("A plain room."));
    assert_eq!(copy.atr_get(1, A_SEX).unwrap().as_deref(), Some("none"));
    assert_eq!(copy.atr_get(0, A_LOCK).unwrap().as_deref(), Some("(#1)"));
    assert_eq!(copy.atr_list(0).unwrap(), store.atr_list(0).unwrap());
}

#[test]
fn test_write_flatfile_does_not_skew_stats() {
    let store = setup_world();
    store.atr_get(0, A_DESC).unwrap();
    let before = store.cache_stats();

    store.write_flatfile(Vec::new(), WriteOptions::export()).unwrap();

    let after = store.cache_stats();
    assert_eq!(after.reads, before.reads);
    assert_eq!(after.rhits, before.rhits);
    assert_eq!(after.syncs, before.syncs + 1);
    assert!(store.with_backend_ref(|b| !b.is_locked()));
}

#[test]
fn test_write_flatfile_rejects_old_dialect() {
    let store = setup_world();
    let options = WriteOptions {
        dialect: Dialect::Legacy,
        version: 1,
    };

    let result = store.write_flatfile(Vec::new(), options);

    assert!(matches!(result, Err(StoreError::UnsupportedDialect(_))));
    assert!(store.with_backend_ref(|b| !b.is_locked()));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_attribute_writers() {
    let store = Arc::new(setup_store());
    for n in 0..4 {
        store.create_object(Object::new(format!("Thing {}", n), ObjectType::Thing, 0));
    }

    let handles: Vec<_> = (0..4)
        .map(|dbref| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..50 {
                    store.atr_add(dbref, 300 + i, &format!("{}:{}", dbref, i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for dbref in 0..4 {
        assert_eq!(store.atr_list(dbref).unwrap().len(), 50);
        assert_eq!(
            store.atr_get(dbref, 349).unwrap(),
            Some(format!("{}:49", dbref))
        );
    }
}
