//! # Aggregation Benchmarks
//!
//! Measures the coordinator's weighted aggregation and the client-side
//! privacy primitives over MLP-sized parameter states.
//!
//! Run: `cargo bench --bench aggregation`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fedprivacy::config::FederationConfig;
use fedprivacy::data::Sample;
use fedprivacy::federated::{ClientUpdate, Coordinator, UpdateMode};
use fedprivacy::model::{Mlp, TrainableModel};
use fedprivacy::privacy::{clip, gaussian_mechanism};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn rows(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| Sample::new(vec![i as f32 / n as f32; 16], i % 4))
        .collect()
}

fn coordinator(num_clients: usize) -> Coordinator<Mlp> {
    let model = Mlp::new(16, 4, &mut StdRng::seed_from_u64(0));
    let config = FederationConfig {
        num_clients,
        participation_fraction: 1.0,
        ..Default::default()
    };
    Coordinator::new(
        model,
        (0..num_clients).map(|_| rows(8)).collect(),
        vec![rows(8)],
        config,
    )
    .unwrap()
}

/// Benchmark weighted aggregation by number of participants
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for clients in [4usize, 16, 64] {
        let coord = coordinator(clients);
        let state = coord.global_state();
        let selected: Vec<usize> = (0..clients).collect();
        let updates: Vec<ClientUpdate> = selected
            .iter()
            .map(|&client_id| ClientUpdate {
                client_id,
                mode: UpdateMode::Parameters,
                state: state.clone(),
                weight: 8.0,
                loss: 0.0,
                noise_std: 0.0,
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(clients), &updates, |b, updates| {
            b.iter(|| black_box(coord.aggregate(&selected, updates).unwrap()))
        });
    }

    group.finish();
}

/// Benchmark clipping and the Gaussian mechanism on the hidden weight
fn bench_privacy(c: &mut Criterion) {
    let mut group = c.benchmark_group("privacy");

    let model = Mlp::new(16, 4, &mut StdRng::seed_from_u64(1));
    let state = model.parameters();
    let weight = state.get("hidden.weight").unwrap().clone();

    group.bench_function("clip_l2", |b| {
        b.iter(|| black_box(clip(&weight, 0.5, 2.0)))
    });

    group.bench_function("gaussian_mechanism", |b| {
        let mut rng = StdRng::seed_from_u64(2);
        b.iter(|| black_box(gaussian_mechanism(&weight, 1.0, 1.0, 1e-5, &mut rng).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_privacy);
criterion_main!(benches);
