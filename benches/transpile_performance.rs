//! Transpilation Performance Benchmarks
//!
//! Measures each pass separately and the whole pipeline on modules of growing size.
//!
//! Run with: cargo bench --bench transpile_performance

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use py2rust::analyzer::analyze;
use py2rust::codegen::lower;
use py2rust::frontend::parse_source;
use py2rust::inference::infer;
use py2rust::{transpile_source, TranspileOptions};

/// A module with `n` functions and `n` classes
fn sample_module(n: usize) -> String {
    let mut src = String::from("import math\n\n");
    for i in 0..n {
        src.push_str(&format!(
            "def scale_{i}(x: float, k: int) -> float:\n    total = 0.0\n    for j in range(k):\n        total += x * j\n    return total / math.sqrt(k + 1)\n\n"
        ));
        src.push_str(&format!(
            "class Point{i}:\n    def __init__(self, x: float, y: float):\n        self.x = x\n        self.y = y\n\n    def norm(self) -> float:\n        return math.sqrt(self.x * self.x + self.y * self.y)\n\n"
        ));
    }
    src
}

fn bench_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("passes");

    for size in [10usize, 50, 200] {
        let src = sample_module(size);
        let module = parse_source(&src, "bench.py").unwrap();
        let inference = infer(&module).unwrap();
        let findings = analyze(&module).unwrap();

        group.bench_with_input(BenchmarkId::new("parse", size), &src, |b, src| {
            b.iter(|| parse_source(black_box(src), "bench.py").unwrap());
        });

        group.bench_with_input(BenchmarkId::new("analyze", size), &module, |b, module| {
            b.iter(|| analyze(black_box(module)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("infer", size), &module, |b, module| {
            b.iter(|| infer(black_box(module)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("lower", size), &module, |b, module| {
            b.iter(|| lower(black_box(module), &inference, &findings).unwrap());
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for size in [10usize, 50, 200] {
        let src = sample_module(size);
        group.bench_with_input(BenchmarkId::new("transpile", size), &src, |b, src| {
            b.iter(|| {
                let output =
                    transpile_source(black_box(src), "bench.py", TranspileOptions::new("bench"))
                        .unwrap();
                black_box(output);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_passes, bench_pipeline);
criterion_main!(benches);
