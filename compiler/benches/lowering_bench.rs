use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rcc::ir::{Bound, CallKind, Expr, Stmt, Type};
use rcc::pipeline::split_async_stages;
use rcc::split::fork_async_producers;
use rcc::stage::{StageEnv, StageInfo};
use rcc::tighten::{expand_acquire_nodes, tighten_consume_regions, tighten_fork_nodes};

// ── Stress-tree generators ──────────────────────────────────────────────────

fn byte_realize(name: &str, body: Stmt) -> Stmt {
    Stmt::realize(
        name,
        vec![Type::UInt8],
        vec![Bound::new(Expr::int(0), Expr::int(256))],
        Expr::BoolImm(true),
        body,
    )
}

fn read_stage(name: &str) -> Expr {
    Expr::call(name, vec![Expr::int(0)], CallKind::Stage, Type::UInt8)
}

fn stage_pair(name: &str, consumer_body: Stmt) -> Stmt {
    Stmt::block(
        Stmt::produce(
            name,
            Stmt::provide(name, vec![Expr::int(7)], vec![Expr::int(0)]),
        ),
        Stmt::consume(name, consumer_body),
    )
}

/// `n` independent async stages in sequence.
fn wide_pipeline(n: usize) -> (Stmt, StageEnv) {
    let mut env = StageEnv::new();
    let mut body: Option<Stmt> = None;
    for i in 0..n {
        let name = format!("stage{}", i);
        env.insert(StageInfo::asynchronous(name.as_str()));
        let tree = byte_realize(&name, stage_pair(&name, Stmt::evaluate(read_stage(&name))));
        body = Some(match body {
            Some(prev) => Stmt::block(prev, tree),
            None => tree,
        });
    }
    (body.unwrap(), env)
}

/// `n` async stages nested inside each other's consume regions; each stage
/// reads the one enclosing it.
fn deep_pipeline(n: usize) -> (Stmt, StageEnv) {
    let mut env = StageEnv::new();
    for i in 0..n {
        env.insert(StageInfo::asynchronous(format!("stage{}", i)));
    }
    let mut tree = Stmt::evaluate(read_stage(&format!("stage{}", n - 1)));
    for i in (1..n).rev() {
        let name = format!("stage{}", i);
        let parent = format!("stage{}", i - 1);
        let body = Stmt::block(
            Stmt::produce(
                name.as_str(),
                Stmt::provide(
                    name.as_str(),
                    vec![read_stage(&parent)],
                    vec![Expr::int(0)],
                ),
            ),
            Stmt::consume(name.as_str(), tree),
        );
        tree = byte_realize(&name, body);
    }
    let tree = byte_realize("stage0", stage_pair("stage0", tree));
    (tree, env)
}

// ── Benchmarks ──────────────────────────────────────────────────────────────

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_async_stages");
    for &n in &[4usize, 16, 64] {
        let (wide, wide_env) = wide_pipeline(n);
        group.bench_with_input(BenchmarkId::new("wide", n), &n, |b, _| {
            b.iter(|| split_async_stages(black_box(&wide), &wide_env).unwrap())
        });

        let (deep, deep_env) = deep_pipeline(n);
        group.bench_with_input(BenchmarkId::new("deep", n), &n, |b, _| {
            b.iter(|| split_async_stages(black_box(&deep), &deep_env).unwrap())
        });
    }
    group.finish();
}

fn bench_individual_stages(c: &mut Criterion) {
    let (tree, env) = wide_pipeline(32);
    let narrowed = tighten_consume_regions(&tree);
    let forked = fork_async_producers(&narrowed, &env).unwrap();
    let expanded = expand_acquire_nodes(&forked);

    let mut group = c.benchmark_group("stages");
    group.bench_function("tighten_consume", |b| {
        b.iter(|| tighten_consume_regions(black_box(&tree)))
    });
    group.bench_function("fork_producers", |b| {
        b.iter(|| fork_async_producers(black_box(&narrowed), &env).unwrap())
    });
    group.bench_function("expand_acquire", |b| {
        b.iter(|| expand_acquire_nodes(black_box(&forked)))
    });
    group.bench_function("tighten_fork", |b| {
        b.iter(|| tighten_fork_nodes(black_box(&expanded)))
    });
    group.finish();
}

criterion_group!(benches, bench_full_pipeline, bench_individual_stages);
criterion_main!(benches);
