//! Benchmarks for fingerprinting and plan construction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rankflow::core::{to_canonical_json, Fingerprint};
use rankflow::pipeline::{DependencyGraph, StageSpec};
use serde_json::json;
use std::collections::BTreeMap;

/// A layered pipeline: each stage consumes the two outputs of the layer above.
fn layered(width: usize, depth: usize) -> Vec<StageSpec> {
    let mut specs = Vec::with_capacity(width * depth);
    for layer in 0..depth {
        for i in 0..width {
            let mut spec = StageSpec::new(format!("s{layer}_{i}"), "task")
                .with_parameter("threshold", 4.5)
                .with_parameter("axes", json!(["freq", "time"]))
                .with_output(format!("o{layer}_{i}"));
            if layer > 0 {
                spec = spec
                    .with_input("left", format!("o{}_{i}", layer - 1))
                    .with_input("right", format!("o{}_{}", layer - 1, (i + 1) % width));
            }
            specs.push(spec);
        }
    }
    specs.reverse();
    specs
}

fn fingerprint_benchmark(c: &mut Criterion) {
    let params = json!({
        "threshold": 5.0,
        "window": {"freq": 32, "time": 128},
        "flags": ["rfi", "edges", "zeros"],
    });
    c.bench_function("canonical_json", |b| b.iter(|| to_canonical_json(black_box(&params))));

    let spec = StageSpec::new("flag", "rfi_mask")
        .with_parameter("threshold", 5.0)
        .with_input("data", "vis")
        .with_outputs(["mask", "stats"]);
    let inputs = BTreeMap::from([("data".to_string(), Fingerprint::of_bytes(b"vis"))]);
    c.bench_function("stage_fingerprint", |b| b.iter(|| black_box(&spec).fingerprint(black_box(&inputs))));
}

fn plan_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_plan");
    for (width, depth) in [(4, 4), (16, 16), (32, 64)] {
        let specs = layered(width, depth);
        group.bench_with_input(BenchmarkId::from_parameter(width * depth), &specs, |b, specs| {
            b.iter(|| DependencyGraph::new(specs.clone()).build());
        });
    }
    group.finish();
}

criterion_group!(benches, fingerprint_benchmark, plan_benchmark);
criterion_main!(benches);
