//! Tests for the backing stores
//!
//! These tests verify:
//! - (key, type) record identity in both backends
//! - Attribute accessors and their counters
//! - Lock bracketing and the durability toggle
//! - FileBackend replay on reopen, torn-tail truncation, corruption
//!   detection and compaction

use std::fs::{self, OpenOptions};
use std::io::Write;

use tempfile::TempDir;
use worldstore::backend::FRAME_HEADER_SIZE;
use worldstore::config::SyncStrategy;
use worldstore::{AttrKey, Backend, FileBackend, MemoryBackend, RecordType, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_file_backend() -> (TempDir, FileBackend) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FileBackend::open(temp_dir.path(), SyncStrategy::EveryWrite).unwrap();
    (temp_dir, backend)
}

fn reopen(temp_dir: &TempDir) -> FileBackend {
    FileBackend::open(temp_dir.path(), SyncStrategy::EveryWrite).unwrap()
}

fn log_len(backend: &FileBackend) -> u64 {
    fs::metadata(backend.path()).unwrap().len()
}

// =============================================================================
// Attribute Keys and Record Types
// =============================================================================

#[test]
fn test_attr_key_encoding() {
    let key = AttrKey::new(12, 300);

    let bytes = key.to_bytes();

    assert_eq!(bytes.len(), AttrKey::ENCODED_LEN);
    assert_eq!(&bytes[..4], &12i32.to_le_bytes());
    assert_eq!(AttrKey::from_bytes(&bytes).unwrap(), key);
}

#[test]
fn test_attr_key_rejects_wrong_length() {
    let result = AttrKey::from_bytes(b"short");

    assert!(matches!(result, Err(StoreError::Serialization(_))));
}

#[test]
fn test_record_type_from_u32() {
    assert_eq!(RecordType::try_from(3).unwrap(), RecordType::Object);
    assert_eq!(RecordType::Module.as_u32(), 5);
    assert!(matches!(
        RecordType::try_from(99),
        Err(StoreError::UnknownRecordType(99))
    ));
}

// =============================================================================
// MemoryBackend
// =============================================================================

#[test]
fn test_memory_type_partitions_keys() {
    let mut backend = MemoryBackend::new();

    backend.put(b"k", b"object", RecordType::Object).unwrap();
    backend.put(b"k", b"module", RecordType::Module).unwrap();

    assert_eq!(backend.get(b"k", RecordType::Object).unwrap().unwrap(), &b"object"[..]);
    assert_eq!(backend.get(b"k", RecordType::Module).unwrap().unwrap(), &b"module"[..]);
    assert!(backend.get(b"k", RecordType::DbInfo).unwrap().is_none());
    assert_eq!(backend.len(), 2);
}

#[test]
fn test_memory_delete_missing_is_ok() {
    let mut backend = MemoryBackend::new();

    backend.delete(b"nothing", RecordType::Object).unwrap();

    assert!(backend.is_empty());
}

#[test]
fn test_memory_attribute_accessors_are_counted() {
    let mut backend = MemoryBackend::new();
    let key = AttrKey::new(1, 6);

    backend.put_attribute(&key, b"A plain room.").unwrap();
    let value = backend.get_attribute(&key).unwrap();
    backend.delete_attribute(&key).unwrap();

    assert_eq!(value.unwrap(), &b"A plain room."[..]);
    let counters = backend.counters();
    assert_eq!(counters.attr_puts, 1);
    assert_eq!(counters.attr_gets, 1);
    assert_eq!(counters.attr_deletes, 1);
    assert_eq!(counters.puts, 0);
    assert!(backend.peek_attribute(&key).is_none());
}

#[test]
fn test_memory_attribute_shares_generic_keyspace() {
    let mut backend = MemoryBackend::new();
    let key = AttrKey::new(4, 200);

    backend.put_attribute(&key, b"v").unwrap();

    assert_eq!(
        backend.peek(&key.to_bytes(), RecordType::Attribute).unwrap(),
        &b"v"[..]
    );
}

#[test]
fn test_memory_fail_writes() {
    let mut backend = MemoryBackend::new();
    backend.put(b"k", b"v", RecordType::Object).unwrap();
    backend.set_fail_writes(true);

    assert!(matches!(
        backend.put(b"k", b"w", RecordType::Object),
        Err(StoreError::Backend(_))
    ));
    assert!(matches!(
        backend.delete(b"k", RecordType::Object),
        Err(StoreError::Backend(_))
    ));
    assert_eq!(backend.peek(b"k", RecordType::Object).unwrap(), &b"v"[..]);
    assert!(backend.get(b"k", RecordType::Object).unwrap().is_some());
}

#[test]
fn test_memory_lock_nesting_and_sync_toggle() {
    let mut backend = MemoryBackend::new();
    assert!(backend.is_synchronous());

    backend.lock().unwrap();
    backend.lock().unwrap();
    backend.unlock().unwrap();
    assert!(backend.is_locked());
    backend.unlock().unwrap();
    assert!(!backend.is_locked());
    assert_eq!(backend.counters().locks, 2);

    backend.set_synchronous(false).unwrap();
    assert!(!backend.is_synchronous());
    backend.set_synchronous(true).unwrap();
    assert!(backend.is_synchronous());
}

// =============================================================================
// FileBackend Basics
// =============================================================================

#[test]
fn test_file_put_get_delete() {
    let (_temp, mut backend) = setup_file_backend();

    backend.put(b"block1", b"objects", RecordType::Object).unwrap();
    backend.put(b"block1", b"attrs", RecordType::AttrNum).unwrap();
    backend.delete(b"block1", RecordType::AttrNum).unwrap();

    assert_eq!(backend.get(b"block1", RecordType::Object).unwrap().unwrap(), &b"objects"[..]);
    assert!(backend.get(b"block1", RecordType::AttrNum).unwrap().is_none());
    assert_eq!(backend.len(), 1);
}

#[test]
fn test_file_delete_missing_appends_nothing() {
    let (_temp, mut backend) = setup_file_backend();
    backend.put(b"k", b"v", RecordType::Object).unwrap();
    let before = log_len(&backend);

    backend.delete(b"other", RecordType::Object).unwrap();

    assert_eq!(log_len(&backend), before);
}

#[test]
fn test_file_lock_depth() {
    let (_temp, mut backend) = setup_file_backend();

    backend.lock().unwrap();
    assert!(backend.is_locked());
    backend.unlock().unwrap();
    assert!(!backend.is_locked());
}

// =============================================================================
// FileBackend Replay
// =============================================================================

#[test]
fn test_file_reopen_replays_log() {
    let (temp, mut backend) = setup_file_backend();
    let attr = AttrKey::new(0, 6);
    backend.put(b"k1", b"one", RecordType::Object).unwrap();
    backend.put(b"k1", b"uno", RecordType::Object).unwrap();
    backend.put(b"k2", b"two", RecordType::Object).unwrap();
    backend.delete(b"k2", RecordType::Object).unwrap();
    backend.put_attribute(&attr, b"Limbo").unwrap();
    drop(backend);

    let mut backend = reopen(&temp);

    assert_eq!(backend.len(), 2);
    assert_eq!(backend.get(b"k1", RecordType::Object).unwrap().unwrap(), &b"uno"[..]);
    assert!(backend.get(b"k2", RecordType::Object).unwrap().is_none());
    assert_eq!(backend.get_attribute(&attr).unwrap().unwrap(), &b"Limbo"[..]);
}

#[test]
fn test_file_appends_continue_after_reopen() {
    let (temp, mut backend) = setup_file_backend();
    backend.put(b"a", b"1", RecordType::Module).unwrap();
    drop(backend);

    let mut backend = reopen(&temp);
    backend.put(b"b", b"2", RecordType::Module).unwrap();
    drop(backend);

    let mut backend = reopen(&temp);
    assert_eq!(backend.get(b"a", RecordType::Module).unwrap().unwrap(), &b"1"[..]);
    assert_eq!(backend.get(b"b", RecordType::Module).unwrap().unwrap(), &b"2"[..]);
}

#[test]
fn test_file_batched_sync_strategy() {
    let temp = TempDir::new().unwrap();
    let mut backend =
        FileBackend::open(temp.path(), SyncStrategy::EveryNEntries { count: 3 }).unwrap();

    backend.set_synchronous(false).unwrap();
    for n in 0..10u8 {
        backend.put(&[n], &[n], RecordType::Object).unwrap();
    }
    backend.set_synchronous(true).unwrap();
    drop(backend);

    let backend = reopen(&temp);
    assert_eq!(backend.len(), 10);
}

// =============================================================================
// FileBackend Damage Handling
// =============================================================================

#[test]
fn test_file_torn_tail_is_truncated() {
    let (temp, mut backend) = setup_file_backend();
    backend.put(b"k1", b"v1", RecordType::Object).unwrap();
    backend.put(b"k2", b"v2", RecordType::Object).unwrap();
    let intact = log_len(&backend);
    let path = backend.path().to_path_buf();
    drop(backend);

    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; FRAME_HEADER_SIZE - 3]).unwrap();
    }

    let mut backend = reopen(&temp);
    assert_eq!(backend.len(), 2);
    assert_eq!(backend.get(b"k2", RecordType::Object).unwrap().unwrap(), &b"v2"[..]);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact);
}

#[test]
fn test_file_short_final_frame_is_dropped() {
    let (temp, mut backend) = setup_file_backend();
    backend.put(b"k1", b"v1", RecordType::Object).unwrap();
    let first = log_len(&backend);
    backend.put(b"k2", b"v2", RecordType::Object).unwrap();
    let path = backend.path().to_path_buf();
    let full = log_len(&backend);
    drop(backend);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full - 1).unwrap();
    drop(file);

    let mut backend = reopen(&temp);
    assert_eq!(backend.len(), 1);
    assert!(backend.get(b"k2", RecordType::Object).unwrap().is_none());
    assert_eq!(fs::metadata(&path).unwrap().len(), first);
}

#[test]
fn test_file_corruption_before_tail_fails_open() {
    let (temp, mut backend) = setup_file_backend();
    backend.put(b"k1", b"v1", RecordType::Object).unwrap();
    backend.put(b"k2", b"v2", RecordType::Object).unwrap();
    let path = backend.path().to_path_buf();
    drop(backend);

    let mut image = fs::read(&path).unwrap();
    image[FRAME_HEADER_SIZE] ^= 0xFF;
    fs::write(&path, &image).unwrap();

    let result = FileBackend::open(temp.path(), SyncStrategy::EveryWrite);
    assert!(matches!(result, Err(StoreError::BackendCorruption(_))));
}

#[test]
fn test_file_damaged_length_mid_log_fails_open() {
    let (temp, mut backend) = setup_file_backend();
    backend.put(b"k0", b"v0", RecordType::Object).unwrap();
    let second_frame = log_len(&backend) as usize;
    for n in 1..5u8 {
        backend.put(&[b'k', b'0' + n], &[b'v', b'0' + n], RecordType::Object).unwrap();
    }
    let path = backend.path().to_path_buf();
    let full = log_len(&backend);
    drop(backend);

    // High byte of the second frame's length field
    let mut image = fs::read(&path).unwrap();
    image[second_frame + FRAME_HEADER_SIZE - 1] ^= 0x80;
    fs::write(&path, &image).unwrap();

    let result = FileBackend::open(temp.path(), SyncStrategy::EveryWrite);

    assert!(matches!(result, Err(StoreError::BackendCorruption(_))));
    assert_eq!(fs::metadata(&path).unwrap().len(), full);
}

// =============================================================================
// FileBackend Compaction
// =============================================================================

#[test]
fn test_file_compact_keeps_live_records() {
    let (temp, mut backend) = setup_file_backend();
    for round in 0..20u8 {
        backend.put(b"hot", &[round], RecordType::Object).unwrap();
    }
    backend.put(b"gone", b"x", RecordType::Object).unwrap();
    backend.delete(b"gone", RecordType::Object).unwrap();
    backend.put(b"info", b"top", RecordType::DbInfo).unwrap();
    let before = log_len(&backend);

    backend.compact().unwrap();

    assert!(log_len(&backend) < before);
    assert_eq!(backend.len(), 2);

    backend.put(b"after", b"y", RecordType::Object).unwrap();
    drop(backend);

    let mut backend = reopen(&temp);
    assert_eq!(backend.len(), 3);
    assert_eq!(backend.get(b"hot", RecordType::Object).unwrap().unwrap(), &[19u8][..]);
    assert_eq!(backend.get(b"info", RecordType::DbInfo).unwrap().unwrap(), &b"top"[..]);
    assert_eq!(backend.get(b"after", RecordType::Object).unwrap().unwrap(), &b"y"[..]);
    assert!(backend.get(b"gone", RecordType::Object).unwrap().is_none());
}
