//! Benchmarks for reagraph-core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reagraph_core::{action, atom, computed, create_context, Atom};

// =============================================================================
// ATOM BENCHMARKS
// =============================================================================

fn bench_atom_get(c: &mut Criterion) {
    let ctx = create_context();
    let a = atom(42i32);
    c.bench_function("atom_get", |b| b.iter(|| black_box(a.get(&ctx).unwrap())));
}

fn bench_atom_set(c: &mut Criterion) {
    let ctx = create_context();
    let a = atom(0i32);
    let mut n = 0;
    c.bench_function("atom_set", |b| {
        b.iter(|| {
            n += 1;
            a.set(&ctx, black_box(n)).unwrap()
        })
    });
}

fn bench_atom_set_same_value(c: &mut Criterion) {
    let ctx = create_context();
    let a = atom(42i32);
    c.bench_function("atom_set_same_value", |b| {
        b.iter(|| a.set(&ctx, black_box(42)).unwrap())
    });
}

// =============================================================================
// COMPUTED BENCHMARKS
// =============================================================================

fn bench_computed_get_cached(c: &mut Criterion) {
    let ctx = create_context();
    let a = atom(42i32);
    let doubled = computed({
        let a = a.clone();
        move |spy| Ok(spy.get(&a)? * 2)
    });
    doubled.get(&ctx).unwrap();

    c.bench_function("computed_get_cached", |b| {
        b.iter(|| black_box(doubled.get(&ctx).unwrap()))
    });
}

fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [1, 5, 10, 20] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let ctx = create_context();
            let root = atom(0i32);
            let mut tail: Atom<i32> = root.clone();
            for _ in 0..depth {
                let prev = tail.clone();
                tail = computed(move |spy| Ok(spy.get(&prev)? + 1));
            }
            let _sub = tail.subscribe(&ctx, |v| {
                black_box(*v);
            });

            let mut n = 0;
            b.iter(|| {
                n += 1;
                root.set(&ctx, n).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_diamond_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");

    for width in [2, 10, 50] {
        group.bench_with_input(BenchmarkId::new("width", width), &width, |b, &width| {
            let ctx = create_context();
            let root = atom(0i32);
            let branches: Vec<Atom<i32>> = (0..width)
                .map(|i| {
                    let root = root.clone();
                    computed(move |spy| Ok(spy.get(&root)? + i))
                })
                .collect();
            let sum = computed({
                let branches = branches.clone();
                move |spy| {
                    let mut total = 0;
                    for branch in &branches {
                        total += spy.get(branch)?;
                    }
                    Ok(total)
                }
            });
            let _sub = sum.subscribe(&ctx, |v| {
                black_box(*v);
            });

            let mut n = 0;
            b.iter(|| {
                n += 1;
                root.set(&ctx, n).unwrap();
            });
        });
    }

    group.finish();
}

// =============================================================================
// ACTION BENCHMARKS
// =============================================================================

fn bench_batched_dispatch(c: &mut Criterion) {
    let ctx = create_context();
    let count = atom(0i64);
    let increment = action::<i64>("increment");
    count.on(&increment, |n, by| n + by);
    let _sub = count.subscribe(&ctx, |v| {
        black_box(*v);
    });

    c.bench_function("dispatch_batch_10", |b| {
        b.iter(|| {
            ctx.transact(|tx| {
                for _ in 0..10 {
                    tx.dispatch(&increment, black_box(1))?;
                }
                Ok(())
            })
            .unwrap()
        })
    });
}

criterion_group!(atom_benches, bench_atom_get, bench_atom_set, bench_atom_set_same_value);

criterion_group!(
    computed_benches,
    bench_computed_get_cached,
    bench_computed_chain,
    bench_diamond_fan_out
);

criterion_group!(action_benches, bench_batched_dispatch);

criterion_main!(atom_benches, computed_benches, action_benches);
