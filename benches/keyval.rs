//! Benchmarks for spark-keyval
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use spark_keyval::{keyval, lens, store, Keyval, KeyvalOptions, MapRequest, ModelOutput, Remove};

fn counters() -> Keyval {
    keyval(|_| {
        let n = store(json!(0));
        let doubled = n.map(|n| json!(n.as_i64().unwrap_or(0) * 2));
        ModelOutput::new("id")
            .state("id", store(json!(0)))
            .state("n", n)
            .state("doubled", doubled)
    })
    .unwrap()
}

fn tree() -> Keyval {
    keyval(|this| {
        ModelOutput::new("id")
            .state("id", store(json!("")))
            .state("childs", this.fork())
    })
    .unwrap()
}

fn batch_of(count: usize) -> Value {
    Value::Array((0..count).map(|i| json!({"id": i, "n": i})).collect())
}

// =============================================================================
// EDIT BENCHMARKS
// =============================================================================

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");

    for count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("modelled", count), &count, |b, &count| {
            let items = batch_of(count);
            b.iter(|| {
                let kv = counters();
                kv.edit().add.emit(items.clone());
                black_box(kv.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("plain", count), &count, |b, &count| {
            let items = batch_of(count);
            b.iter(|| {
                let kv = Keyval::with_options(KeyvalOptions::field("id"));
                kv.edit().add.emit(items.clone());
                black_box(kv.len())
            })
        });
    }

    group.finish();
}

fn bench_update_one(c: &mut Criterion) {
    let kv = counters();
    kv.edit().add.emit(batch_of(1000));
    let mut n = 0;

    c.bench_function("update_one_of_1000", |b| {
        b.iter(|| {
            n += 1;
            kv.edit().update.emit(json!({"id": 500, "n": n}));
        })
    });
}

fn bench_map_many(c: &mut Criterion) {
    let kv = counters();
    kv.edit().add.emit(batch_of(1000));
    let keys: Vec<i64> = (0..1000).step_by(10).collect();

    c.bench_function("map_100_of_1000", |b| {
        b.iter(|| {
            let request = MapRequest::new(keys.iter().copied(), |item| {
                json!({"n": item["n"].as_i64().unwrap_or(0) + 1})
            });
            kv.edit().map.emit(request);
        })
    });
}

fn bench_remove_and_restore(c: &mut Criterion) {
    let kv = counters();
    kv.edit().add.emit(batch_of(1000));

    c.bench_function("remove_and_restore_one", |b| {
        b.iter(|| {
            kv.edit().remove.emit(Remove::key(black_box(250)));
            kv.edit().add.emit(json!({"id": 250, "n": 250}));
        })
    });
}

// =============================================================================
// TREE / LENS BENCHMARKS
// =============================================================================

fn chain(depth: usize) -> Value {
    let mut node = json!({"id": format!("n{}", depth - 1), "childs": []});
    for level in (0..depth - 1).rev() {
        node = json!({"id": format!("n{level}"), "childs": [node]});
    }
    node
}

fn bench_deep_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_tree");

    for depth in [10, 50] {
        group.bench_with_input(BenchmarkId::new("build", depth), &depth, |b, &depth| {
            let input = chain(depth);
            b.iter(|| {
                let kv = tree();
                kv.edit().add.emit(input.clone());
                black_box(kv.len())
            })
        });
    }

    group.finish();
}

fn bench_lens_read(c: &mut Criterion) {
    let kv = counters();
    kv.edit().add.emit(batch_of(1000));
    let doubled = lens(&kv).item(999).field("doubled").unwrap().store();

    c.bench_function("lens_follow_update", |b| {
        let mut n = 0;
        b.iter(|| {
            n += 1;
            kv.edit().update.emit(json!({"id": 999, "n": n}));
            black_box(doubled.get())
        })
    });
}

criterion_group!(edit_benches, bench_add, bench_update_one, bench_map_many, bench_remove_and_restore);

criterion_group!(structure_benches, bench_deep_tree, bench_lens_read);

criterion_main!(edit_benches, structure_benches);
