//! Benchmarks for worldstore
//!
//! Hash index lookups, object cache hits and misses, and a full flatfile
//! write/read cycle.

use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use worldstore::flatfile::{read_snapshot, write_snapshot};
use worldstore::htab::{HashKey, HashTable, KeyKind};
use worldstore::world::A_DESC;
use worldstore::{
    Backend, Config, MemoryBackend, Object, ObjectCache, ObjectType, RecordType, Store,
    WriteBackPolicy, WriteOptions,
};

// =============================================================================
// Helpers
// =============================================================================

fn populated_table(count: usize) -> HashTable<usize> {
    let mut table = HashTable::new("bench", count, KeyKind::Str);
    for i in 0..count {
        table
            .insert(HashKey::from(format!("attr{}", i).as_str()), i)
            .expect("insert");
    }
    table
}

fn populated_store(objects: i32) -> Store<MemoryBackend> {
    let store = Store::in_memory(Config::default()).expect("open store");
    for n in 0..objects {
        let dbref = store.create_object(Object::new(format!("Room {}", n), ObjectType::Room, 0));
        store
            .atr_add(dbref, A_DESC, &format!("Description of room {}.", n))
            .expect("atr_add");
    }
    store
}

// =============================================================================
// Hash Index
// =============================================================================

fn bench_htab(c: &mut Criterion) {
    let mut group = c.benchmark_group("htab");
    group.throughput(Throughput::Elements(1));

    for count in [100, 10_000] {
        let table = populated_table(count);
        group.bench_with_input(BenchmarkId::new("find", count), &count, |b, &count| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % count;
                let key = HashKey::from(format!("attr{}", i).as_str());
                black_box(table.find(&key).copied())
            });
        });
    }

    group.bench_function("insert_delete", |b| {
        let mut table = populated_table(1_000);
        b.iter(|| {
            let key = HashKey::from("transient");
            table.insert(key.clone(), 0).expect("insert");
            black_box(table.delete(&key))
        });
    });

    group.finish();
}

// =============================================================================
// Object Cache
// =============================================================================

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hit", |b| {
        let mut backend = MemoryBackend::new();
        let mut cache = ObjectCache::new(200, 1_000_000, WriteBackPolicy::Retain);
        for i in 0..1_000u32 {
            cache
                .put(&i.to_le_bytes(), RecordType::Module, Bytes::from_static(b"payload"), &mut backend)
                .expect("put");
        }
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) % 1_000;
            black_box(cache.get(&i.to_le_bytes(), RecordType::Module, &mut backend).expect("get"))
        });
    });

    // A ceiling of one payload forces every read back to the backend
    group.bench_function("miss", |b| {
        let mut backend = MemoryBackend::new();
        for i in 0..1_000u32 {
            backend
                .put(&i.to_le_bytes(), b"payload", RecordType::Module)
                .expect("put");
        }
        let mut cache = ObjectCache::new(200, 7, WriteBackPolicy::Retain);
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) % 1_000;
            black_box(cache.get(&i.to_le_bytes(), RecordType::Module, &mut backend).expect("get"))
        });
    });

    group.finish();
}

// =============================================================================
// Flatfile
// =============================================================================

fn bench_flatfile(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatfile");

    for objects in [100, 1_000] {
        let store = populated_store(objects);
        let mut image = Vec::new();
        store
            .write_flatfile(&mut image, WriteOptions::export())
            .expect("write flatfile");

        group.throughput(Throughput::Elements(objects as u64));
        group.bench_with_input(BenchmarkId::new("write", objects), &objects, |b, _| {
            b.iter(|| {
                let mut out = Vec::with_capacity(image.len());
                black_box(store.write_flatfile(&mut out, WriteOptions::export()).expect("write"))
            });
        });
        group.bench_with_input(BenchmarkId::new("read", objects), &objects, |b, _| {
            b.iter(|| black_box(read_snapshot(image.as_slice(), 0).expect("read").objects.len()));
        });
        group.bench_with_input(BenchmarkId::new("round_trip", objects), &objects, |b, _| {
            b.iter(|| {
                let mut snapshot = read_snapshot(image.as_slice(), 0).expect("read");
                let mut out = Vec::with_capacity(image.len());
                black_box(write_snapshot(&mut out, &mut snapshot, WriteOptions::export()).expect("write"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_htab, bench_cache, bench_flatfile);
criterion_main!(benches);
