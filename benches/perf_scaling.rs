use std::cell::Cell;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use retort::{Fact, ReteNetwork, Variant};

fn role(s: &str, r: &str, o: &str) -> Fact {
    Fact::of("role_assertion", &[("subject", s), ("role", r), ("object", o)])
}

/// Alpha dispatch must stay near-constant as the number of alpha memories
/// grows: each property chain axiom installs new memories keyed by role.
fn bench_alpha_dispatch_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("alpha_dispatch/memory_scaling");
    for memory_count in [16usize, 64, 256, 1024] {
        let mut net = ReteNetwork::new();
        for i in 0..memory_count {
            net.add_fact(
                Fact::of("property_chain", &[
                    ("chain", &format!("p{i},q{i}")),
                    ("super", &format!("r{i}")),
                ]),
                "axioms",
            );
        }
        let counter = Cell::new(0u64);
        group.bench_with_input(
            BenchmarkId::from_parameter(memory_count),
            &memory_count,
            |b, _| {
                b.iter(|| {
                    let n = counter.get();
                    counter.set(n + 1);
                    net.add_fact(role(&format!("s{n}"), "unrelated", &format!("o{n}")), "wm")
                })
            },
        );
    }
    group.finish();
}

fn bench_subclass_closure_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("inference/subclass_chain");
    for depth in [8usize, 32, 64] {
        let src = build_chain_ontology(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &src, |b, src| {
            b.iter(|| {
                let mut net = ReteNetwork::new();
                net.add_source(black_box(src), "bench", Variant::Ascii)
                    .expect("load");
                black_box(net.fact_count())
            })
        });
    }
    group.finish();
}

fn bench_reql_filter_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("reql/filter_scan");
    for fact_count in [100usize, 400, 1600] {
        let mut net = ReteNetwork::new();
        for i in 0..fact_count {
            net.add_fact(role(&format!("p{i}"), "score", &i.to_string()), "data");
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(fact_count),
            &fact_count,
            |b, _| {
                b.iter(|| {
                    net.reql(
                        black_box("SELECT ?p WHERE { ?p score ?s . FILTER(?s >= 50) }"),
                        0,
                    )
                    .expect("query")
                })
            },
        );
    }
    group.finish();
}

fn build_chain_ontology(depth: usize) -> String {
    let mut src = String::new();
    for i in 0..depth {
        src.push_str(&format!("SubClassOf(C{i}, C{})\n", i + 1));
    }
    src.push_str("C0(instance)\n");
    src
}

criterion_group!(
    benches,
    bench_alpha_dispatch_scaling,
    bench_subclass_closure_scaling,
    bench_reql_filter_scaling
);
criterion_main!(benches);
