#![allow(missing_docs)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use objstream::{Array, ObjStream, ObjectRef, Serializable, StreamInspector, Value};
use std::hint::black_box;

#[derive(Debug, Default, Serializable)]
#[serial(name = "bench.Item", suid = 1)]
struct BenchItem {
    id: i64,
    label: Option<String>,
    payload: Vec<i64>,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "bench.Node", suid = 1)]
struct BenchNode {
    value: i32,
    left: Option<ObjectRef>,
    right: Option<ObjectRef>,
}

fn generate_items(count: usize) -> Value {
    let items = (0..count)
        .map(|i| {
            Value::object(BenchItem {
                id: i as i64,
                label: Some(format!("label-{}", i % 16)),
                payload: vec![i as i64; 128], // ~1KB
            })
        })
        .collect();
    Value::from(Array::of_objects(items))
}

// Complete binary tree; every node is referenced from its parent and from a flat index.
fn generate_tree(depth: u32) -> Value {
    fn build(depth: u32, counter: &mut i32, index: &mut Vec<Value>) -> Option<ObjectRef> {
        if depth == 0 {
            return None;
        }
        let left = build(depth - 1, counter, index);
        let right = build(depth - 1, counter, index);
        *counter += 1;
        let node = ObjectRef::new(BenchNode {
            value: *counter,
            left,
            right,
        });
        index.push(Value::from(node.clone()));
        Some(node)
    }
    let mut counter = 0;
    let mut index = Vec::new();
    build(depth, &mut counter, &mut index);
    Value::from(Array::of_objects(index))
}

// --- BENCHMARKS ---

fn bench_writers(c: &mut Criterion) {
    let item_count = 10_000;
    let items = generate_items(item_count);
    let tree = generate_tree(14);

    println!("Writers Item count: {}", item_count);

    let mut group = c.benchmark_group("Serialization Write");
    group.throughput(Throughput::Bytes((item_count * 1032) as u64));

    group.bench_function("objstream_items", |b| {
        b.iter(|| {
            ObjStream::to_bytes(black_box(&items)).expect("Failed to write items");
        });
    });

    group.bench_function("objstream_shared_tree", |b| {
        b.iter(|| {
            ObjStream::to_bytes(black_box(&tree)).expect("Failed to write tree");
        });
    });

    group.finish();
}

fn bench_readers(c: &mut Criterion) {
    let item_count = 10_000;

    println!("Readers Item count: {}", item_count);

    let items = ObjStream::to_bytes(&generate_items(item_count)).expect("Failed to write items");
    let tree = ObjStream::to_bytes(&generate_tree(14)).expect("Failed to write tree");
    println!("Stream sizes: items {} bytes, tree {} bytes", items.len(), tree.len());

    let mut group = c.benchmark_group("Deserialization Read");

    // 1. Full graph reads
    group.bench_function("objstream_items", |b| {
        b.iter(|| {
            let res = ObjStream::from_bytes(black_box(&items)).expect("Failed to read items");
            black_box(res);
        });
    });

    group.bench_function("objstream_shared_tree", |b| {
        b.iter(|| {
            let res = ObjStream::from_bytes(black_box(&tree)).expect("Failed to read tree");
            black_box(res);
        });
    });

    // 2. Structural decode without class resolution
    group.bench_function("inspector_items", |b| {
        b.iter(|| {
            let report = StreamInspector::inspect(black_box(&items)).expect("Failed to inspect");
            black_box(report);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_writers, bench_readers);
criterion_main!(benches);
