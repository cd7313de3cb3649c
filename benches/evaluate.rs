use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use formulary::{parse, EntityContext, Evaluator, Record, Variable, VariableRegistry};

/// A formula summing `n` weighted surcharges, each guarded by a comparison
/// on its own field.
fn surcharge_formula(n: usize) -> String {
    (0..n)
        .map(|i| format!("(f{i} >= 1 ? f{i} * 0.5 : 0)"))
        .collect::<Vec<_>>()
        .join(" + ")
}

fn shipment(n: usize) -> EntityContext {
    let record = (0..n).fold(Record::new(), |record, i| {
        record.set(&format!("f{i}"), 10_i64)
    });
    EntityContext::new(record)
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_eval");

    for &n in &[5, 20, 50] {
        let evaluator = Evaluator::new(Arc::new(VariableRegistry::new()));
        let source = surcharge_formula(n);
        let ctx = shipment(n);
        evaluator.compile(&source).unwrap();

        group.bench_function(format!("{n}_terms_cached"), |b| {
            b.iter(|| evaluator.evaluate(black_box(&source), black_box(&ctx)));
        });
    }

    let registry = Arc::new(VariableRegistry::new());
    registry
        .register(Variable::field("weight", "shipment.weight"))
        .unwrap();
    registry
        .register(Variable::constant("fuel_pct", 12.5))
        .unwrap();
    let evaluator = Evaluator::new(registry);
    let ctx = EntityContext::new(Record::new().set("shipment.weight", 1200_i64));
    let source = "max(weight * 0.42, 75) * (1 + fuel_pct / 100)";
    group.bench_function("registered_variables", |b| {
        b.iter(|| evaluator.evaluate(black_box(source), black_box(&ctx)));
    });

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    for &n in &[5, 20, 50] {
        let source = surcharge_formula(n);
        group.bench_function(format!("{n}_terms_parse"), |b| {
            b.iter(|| black_box(parse(black_box(&source)).unwrap()));
        });

        let evaluator = Evaluator::new(Arc::new(VariableRegistry::new()));
        group.bench_function(format!("{n}_terms_compile"), |b| {
            b.iter(|| {
                evaluator.clear_cache();
                black_box(evaluator.compile(black_box(&source)).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_traced(c: &mut Criterion) {
    let mut group = c.benchmark_group("traced_eval");

    for &n in &[5, 20] {
        let evaluator = Evaluator::new(Arc::new(VariableRegistry::new()));
        let source = surcharge_formula(n);
        let ctx = shipment(n);
        group.bench_function(format!("{n}_terms"), |b| {
            b.iter(|| black_box(evaluator.evaluate_traced(black_box(&source), &ctx)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_compilation, bench_traced);
criterion_main!(benches);
