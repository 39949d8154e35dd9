use criterion::{black_box, criterion_group, criterion_main, Criterion};
use expert_trace_core::logits::RoutingLogits;
use expert_trace_core::selection::{select_experts, ExpertLayout};

fn bench_selection(c: &mut Criterion) {
    let rows: Vec<Vec<f32>> = (0..32)
        .map(|r| (0..64).map(|e| ((r * 31 + e * 17) % 97) as f32 * 0.01).collect())
        .collect();
    let logits = RoutingLogits::from_rows(&rows).unwrap();

    c.bench_function("select_experts_32x64_top2", |b| {
        b.iter(|| select_experts(black_box(&logits), 2, ExpertLayout::PerRow))
    });
}

criterion_group!(benches, bench_selection);
criterion_main!(benches);
