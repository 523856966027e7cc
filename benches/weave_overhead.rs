//! Weaving throughput benchmark
//!
//! Measures the cost of the rewrite itself, which runs once per selected
//! method inside the host's build:
//!
//! 1. `weave_method` on bodies of growing size and return count
//! 2. A full `WeavingPipeline` pass over a class with mixed selection
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench weave_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tejer::bytecode::{Condition, Instruction, Label};
use tejer::config::InstrumentationConfig;
use tejer::method::{AccessFlags, ClassUnit, MethodHeader, MethodUnit};
use tejer::pipeline::WeavingPipeline;
use tejer::weaver;

const MARKER: &str = "org.example.DebugLog";

/// Method with `returns` guarded early returns, then a final return
fn create_bench_method(name: &str, returns: u32, marked: bool) -> MethodUnit {
    let mut insns = Vec::new();
    for i in 0..returns {
        insns.push(Instruction::Iload(0));
        insns.push(Instruction::Iconst(i as i32));
        insns.push(Instruction::IfIcmp {
            cond: Condition::Ne,
            target: Label(i),
        });
        insns.push(Instruction::Iconst(i as i32 * 10));
        insns.push(Instruction::Ireturn);
        insns.push(Instruction::Label(Label(i)));
    }
    insns.push(Instruction::Iload(0));
    insns.push(Instruction::Ireturn);

    let mut header = MethodHeader::new(name, Some("(I)I".parse().unwrap()));
    header.access = AccessFlags::STATIC;
    if marked {
        header.annotations.insert(MARKER);
    }
    MethodUnit::new(header, insns, 2, 1)
}

fn bench_weave_method(c: &mut Criterion) {
    let mut group = c.benchmark_group("weave_method");
    let config = InstrumentationConfig::enabled_with([MARKER]);

    for returns in [1u32, 8, 64, 512] {
        let method = create_bench_method("bench", returns, true);
        group.bench_with_input(BenchmarkId::from_parameter(returns), &method, |b, method| {
            b.iter(|| {
                let mut m = method.clone();
                weaver::weave_method(black_box(&mut m), &config).unwrap();
                m
            })
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let methods = (0..100)
        .map(|i| create_bench_method(&format!("m{}", i), 4, i % 2 == 0))
        .collect();
    let class = ClassUnit::new("org/example/Bench", methods);

    let pipeline = WeavingPipeline::new(InstrumentationConfig::enabled_with([MARKER])).unwrap();
    c.bench_function("pipeline_100_methods", |b| {
        b.iter(|| pipeline.weave_class(black_box(&class)).unwrap())
    });

    let verifying = WeavingPipeline::new(InstrumentationConfig::enabled_with([MARKER]))
        .unwrap()
        .with_verification(true);
    c.bench_function("pipeline_100_methods_verified", |b| {
        b.iter(|| verifying.weave_class(black_box(&class)).unwrap())
    });
}

criterion_group!(benches, bench_weave_method, bench_pipeline);
criterion_main!(benches);
