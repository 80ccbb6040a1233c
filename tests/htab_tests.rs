//! Tests for the hash index
//!
//! These tests verify:
//! - Insert/find/delete/replace semantics, duplicates rejected
//! - String and integer keys, kind mismatches
//! - Uninitialized tables are safe no-ops
//! - first/next traversal and cursor invalidation
//! - Resize preserves the key set
//! - Alias flags, delete_all/replace_all, flush and statistics

use std::collections::{BTreeMap, BTreeSet};

use worldstore::htab::{fnv1a_32, table_size_for, HashKey, HashTable, KeyKind, HASH_ALIAS};
use worldstore::StoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_str_table(capacity: usize) -> HashTable<u32> {
    HashTable::new("test", capacity, KeyKind::Str)
}

fn key(s: &str) -> HashKey {
    HashKey::from(s)
}

fn collect_keys(table: &HashTable<u32>) -> BTreeSet<String> {
    table.keys().map(|k| k.to_string()).collect()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_table_size_rounds_to_power_of_two() {
    assert_eq!(table_size_for(0), 1);
    assert_eq!(table_size_for(1), 1);
    assert_eq!(table_size_for(5), 8);
    assert_eq!(table_size_for(512), 512);

    let table = setup_str_table(100);
    assert_eq!(table.size(), 128);
}

#[test]
fn test_fnv1a_known_values() {
    assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
    assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
}

#[test]
fn test_insert_and_find() {
    let mut table = setup_str_table(16);

    table.insert(key("alpha"), 1).unwrap();
    table.insert(key("beta"), 2).unwrap();

    assert_eq!(table.find(&key("alpha")), Some(&1));
    assert_eq!(table.find(&key("beta")), Some(&2));
    assert_eq!(table.find(&key("gamma")), None);
    assert_eq!(table.len(), 2);
}

#[test]
fn test_duplicate_insert_rejected() {
    let mut table = setup_str_table(16);

    table.insert(key("alpha"), 1).unwrap();
    let result = table.insert(key("alpha"), 99);

    assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
    assert_eq!(table.find(&key("alpha")), Some(&1));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_delete() {
    let mut table = setup_str_table(16);
    table.insert(key("alpha"), 1).unwrap();

    assert_eq!(table.delete(&key("alpha")), Some(1));
    assert_eq!(table.find(&key("alpha")), None);
    assert_eq!(table.delete(&key("alpha")), None);
    assert!(table.is_empty());
}

#[test]
fn test_replace_existing_and_missing() {
    let mut table = setup_str_table(16);
    table.insert(key("alpha"), 1).unwrap();

    assert!(table.replace(&key("alpha"), 10));
    assert_eq!(table.find(&key("alpha")), Some(&10));

    assert!(!table.replace(&key("missing"), 5));
    assert_eq!(table.find(&key("missing")), None);
}

#[test]
fn test_integer_keys() {
    let mut table: HashTable<&str> = HashTable::new("ints", 8, KeyKind::Int);

    for n in 0..100i32 {
        table.insert(HashKey::from(n), "x").unwrap();
    }

    assert_eq!(table.len(), 100);
    assert!(table.contains(&HashKey::from(42)));
    assert!(!table.contains(&HashKey::from(100)));
}

#[test]
fn test_key_kind_mismatch() {
    let mut table = setup_str_table(8);

    let result = table.insert(HashKey::from(7), 1);

    assert!(matches!(result, Err(StoreError::KeyKindMismatch { .. })));
    assert_eq!(table.find(&HashKey::from(7)), None);
}

#[test]
fn test_last_insert_wins_after_delete() {
    let mut table = setup_str_table(4);
    let mut model = BTreeMap::new();

    for round in 0..5u32 {
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            let value = round * 10 + i as u32;
            if (round + i as u32) % 3 == 0 {
                table.delete(&key(name));
                model.remove(*name);
            } else if table.insert(key(name), value).is_ok() {
                model.insert(name.to_string(), value);
            }
        }
    }

    for name in ["a", "b", "c", "d", "e", "f"] {
        assert_eq!(table.find(&key(name)), model.get(name));
    }
    assert_eq!(table.len(), model.len());
}

// =============================================================================
// Uninitialized Tables
// =============================================================================

#[test]
fn test_uninitialized_table_is_safe() {
    let mut table: HashTable<u32> = HashTable::uninit("empty");

    assert!(!table.is_initialized());
    assert_eq!(table.find(&key("x")), None);
    assert_eq!(table.delete(&key("x")), None);
    assert!(!table.replace(&key("x"), 1));
    assert!(table.first().is_none());
    table.flush(0);

    assert!(matches!(table.insert(key("x"), 1), Err(StoreError::Uninitialized)));
    assert!(matches!(table.resize(16), Err(StoreError::Uninitialized)));
    assert_eq!(table.len(), 0);
}

#[test]
fn test_init_makes_table_usable() {
    let mut table: HashTable<u32> = HashTable::uninit("late");
    table.init(10, KeyKind::Str);

    table.insert(key("x"), 1).unwrap();

    assert_eq!(table.size(), 16);
    assert_eq!(table.find(&key("x")), Some(&1));
}

// =============================================================================
// Traversal
// =============================================================================

#[test]
fn test_first_next_visits_every_entry() {
    let mut table = setup_str_table(4);
    for (i, name) in ["a", "b", "c", "d", "e", "f", "g"].iter().enumerate() {
        table.insert(key(name), i as u32).unwrap();
    }

    let mut seen = BTreeSet::new();
    let mut entry = table.first();
    while let Some((k, _)) = entry {
        assert!(seen.insert(k.to_string()), "visited {} twice", k);
        entry = table.next_entry();
    }

    assert_eq!(seen, collect_keys(&table));
    assert_eq!(seen.len(), 7);
}

#[test]
fn test_resize_invalidates_cursor() {
    let mut table = setup_str_table(4);
    for name in ["a", "b", "c"] {
        table.insert(key(name), 0).unwrap();
    }

    assert!(table.first().is_some());
    table.resize(64).unwrap();

    assert!(table.next_entry().is_none());
}

#[test]
fn test_deleting_cursor_entry_ends_traversal() {
    let mut table = setup_str_table(1);
    table.insert(key("a"), 1).unwrap();
    table.insert(key("b"), 2).unwrap();

    let (first, _) = table.first().unwrap();
    let first = first.clone();
    table.delete(&first);

    assert!(table.next_entry().is_none());
}

// =============================================================================
// Resize
// =============================================================================

#[test]
fn test_resize_preserves_key_set() {
    let mut table = setup_str_table(2);
    for n in 0..300u32 {
        table.insert(key(&format!("key{}", n)), n).unwrap();
    }
    let before = collect_keys(&table);

    table.resize(0).unwrap();

    // 600 rounds to 1024, which is more than a third oversized
    assert_eq!(table.size(), 512);
    assert_eq!(collect_keys(&table), before);
    assert_eq!(table.len(), 300);
    for n in 0..300u32 {
        assert_eq!(table.find(&key(&format!("key{}", n))), Some(&n));
    }
}

#[test]
fn test_resize_respects_min_size_and_hash_factor() {
    let mut table = HashTable::new("factor", 4, KeyKind::Str).with_hash_factor(4);
    for n in 0..10u32 {
        table.insert(key(&n.to_string()), n).unwrap();
    }

    table.resize(0).unwrap();
    assert_eq!(table.size(), 64);

    table.resize(256).unwrap();
    assert_eq!(table.size(), 256);
}

#[test]
fn test_resize_shrinks_oversized_large_table() {
    let mut table = setup_str_table(4096);
    for n in 0..200u32 {
        table.insert(key(&n.to_string()), n).unwrap();
    }

    table.resize(0).unwrap();

    // 200 * 2 = 400 -> 512, not above the shrink threshold
    assert_eq!(table.size(), 512);
    assert_eq!(table.len(), 200);
}

// =============================================================================
// Aliases, Bulk Removal and Flush
// =============================================================================

#[test]
fn test_alias_flags() {
    let mut table = setup_str_table(8);
    table.insert(key("north"), 1).unwrap();
    table.insert_with_flags(key("n"), 1, HASH_ALIAS).unwrap();

    assert_eq!(table.find_flags(&key("north")), Some(0));
    assert_eq!(table.find_flags(&key("n")), Some(HASH_ALIAS));
}

#[test]
fn test_delete_all_and_replace_all() {
    let mut table = setup_str_table(2);
    table.insert(key("north"), 1).unwrap();
    table.insert_with_flags(key("n"), 1, HASH_ALIAS).unwrap();
    table.insert(key("south"), 2).unwrap();

    assert_eq!(table.replace_all(&2, &3), 1);
    assert_eq!(table.find(&key("south")), Some(&3));

    assert_eq!(table.delete_all(&1), 2);
    assert_eq!(table.len(), 1);
    assert_eq!(collect_keys(&table), BTreeSet::from(["south".to_string()]));
}

#[test]
fn test_flush_empties_and_resizes() {
    let mut table = setup_str_table(8);
    table.insert(key("a"), 1).unwrap();
    table.find(&key("a"));

    table.flush(0);
    assert!(table.is_empty());
    assert_eq!(table.size(), 8);
    assert_eq!(table.stats().scans, 0);

    table.insert(key("b"), 2).unwrap();
    table.flush(100);
    assert!(table.is_empty());
    assert_eq!(table.size(), 128);
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_stats_count_lookups() {
    let mut table = setup_str_table(8);
    table.insert(key("a"), 1).unwrap();
    table.reset_stats();

    table.find(&key("a"));
    table.find(&key("a"));
    table.find(&key("zzz"));

    let stats = table.stats();
    assert_eq!(stats.scans, 3);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.size, 8);
    assert_eq!(stats.nulls, 7);
    assert!(stats.max_scan >= 1);
}

#[test]
fn test_stats_row_names_table() {
    let table = setup_str_table(8);

    let row = table.stats_row();

    assert!(row.starts_with("test"));
    assert!(row.contains('8'));
}
