use std::hint::black_box;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use permission_rete::{BoolExpr, Constraint, Fact, NumExpr, ReteNetwork};

/// `constraints` constraints over `accounts` shared stake alphas, each also
/// requiring its own permission to exist.
fn make_network(constraints: usize, accounts: usize) -> ReteNetwork {
    let mut net = ReteNetwork::new();
    for i in 0..constraints {
        let account = format!("acct-{}", i % accounts);
        let perm = format!("perm-{i}");
        net.add_constraint(Constraint::new(
            perm.clone(),
            BoolExpr::and(
                BoolExpr::gt(NumExpr::stake_of(account), NumExpr::literal(1000)),
                BoolExpr::permission_exists(perm.clone()),
            ),
        ))
        .unwrap();
        net.add_fact(Fact::permission_exists(perm, Some(true)));
    }
    net
}

fn bench_stake_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("stake_update_64_constraints", |b| {
        b.iter_custom(|iters| {
            let mut net = make_network(64, 8);
            let start = Instant::now();
            for i in 0..iters {
                // Alternate across the threshold so every update flips activations.
                let amount = if i % 2 == 0 { 500 } else { 1500 };
                black_box(net.add_fact(Fact::stake_of("acct-0", Some(amount))));
            }
            start.elapsed()
        });
    });

    group.bench_function("unchanged_fact_noop", |b| {
        let mut net = make_network(64, 8);
        net.add_fact(Fact::stake_of("acct-0", Some(1500)));
        b.iter(|| black_box(net.add_fact(Fact::stake_of("acct-0", Some(1500)))));
    });

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_constraint_with_backfill", |b| {
        b.iter_custom(|iters| {
            let mut net = make_network(0, 1);
            for i in 0..8 {
                net.add_fact(Fact::stake_of(format!("acct-{i}"), Some(2000)));
            }
            let start = Instant::now();
            for i in 0..iters {
                let account = format!("acct-{}", i % 8);
                black_box(
                    net.add_constraint(Constraint::new(
                        format!("bench-{i}"),
                        BoolExpr::gte(
                            NumExpr::add(NumExpr::stake_of(account), NumExpr::literal(1)),
                            NumExpr::literal(1000),
                        ),
                    ))
                    .unwrap(),
                );
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(propagation, bench_stake_update, bench_compile);
criterion_main!(propagation);
