//! Performance benchmarks for ride_core using Criterion.rs.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ride_core::catalog::PricingCatalog;
use ride_core::dispatch::Dispatcher;
use ride_core::ecs::{Decision, MatchRequest};
use ride_core::fare::{QuoteRequest, VehicleClass};
use ride_core::matching::{CandidateRanking, EtaRanking, RankingContext};
use ride_core::pool::{
    Accommodations, Candidate, CandidateFilter, CandidatePool, CandidateRole, SharedCandidatePool,
};
use ride_core::test_helpers::{test_cell, test_config, test_distant_cell, test_engine};

fn spread_pool(count: u64) -> SharedCandidatePool {
    let disk = test_cell().grid_disk::<Vec<_>>(10);
    SharedCandidatePool::new((0..count).map(|i| {
        let cell = disk[(i as usize) % disk.len()];
        Candidate::driver(i + 1, VehicleClass::Mini, cell)
    }))
}

fn bench_quotes(c: &mut Criterion) {
    let catalog = PricingCatalog::default();
    let now = chrono::Utc::now();
    let request = QuoteRequest::new(VehicleClass::Sedan, 12.5, 34.0)
        .with_demand_multiplier(1.3)
        .with_insurance(true);

    c.bench_function("fare_quote", |b| {
        b.iter(|| black_box(catalog.quote(black_box(&request), now)))
    });
}

fn bench_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("eta_ranking");
    for size in [10u64, 100, 1000] {
        let pool = spread_pool(size);
        let filter = CandidateFilter {
            role: CandidateRole::Driver,
            pickup: test_cell(),
            vehicle_class: Some(VehicleClass::Mini),
            required: Default::default(),
            gender: None,
            match_radius: 20,
            eta_speed_kmh: 40.0,
        };
        let listed = pool.list_available(&filter);
        let context = RankingContext {
            shared: false,
            accommodations: Accommodations::default(),
            preferred: None,
            seed: 42,
        };
        group.bench_with_input(BenchmarkId::from_parameter(size), &listed, |b, listed| {
            b.iter(|| black_box(EtaRanking.rank(listed.clone(), &context)))
        });
    }
    group.finish();
}

fn bench_session_lifecycle(c: &mut Criterion) {
    c.bench_function("session_lifecycle", |b| {
        b.iter(|| {
            let mut engine = test_engine(Arc::new(spread_pool(200)));
            for _ in 0..50 {
                let quote = engine
                    .quote(&QuoteRequest::new(VehicleClass::Mini, 8.0, 20.0))
                    .expect("quote");
                let session = engine
                    .request_match(MatchRequest::new(quote.id, test_cell(), test_distant_cell()))
                    .expect("session");
                let snapshot = engine.match_status(session).expect("status");
                if let Some(candidate) = snapshot.active {
                    engine
                        .match_respond(session, candidate.id, Decision::Accept)
                        .expect("accept");
                    engine.trip_started(session).expect("start");
                    engine.trip_completed(session).expect("complete");
                }
                black_box(engine.take_result(session));
            }
        });
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_shards");
    for shards in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, &shards| {
            b.iter(|| {
                let pool: Arc<dyn CandidatePool> = Arc::new(spread_pool(400));
                let mut dispatcher =
                    Dispatcher::new(&test_config(), pool, shards).expect("dispatcher");
                let per_shard = 100 / shards;
                black_box(dispatcher.run(|_, engine| {
                    (0..per_shard)
                        .filter(|_| {
                            engine
                                .quote(&QuoteRequest::new(VehicleClass::Mini, 8.0, 20.0))
                                .map(|quote| {
                                    engine
                                        .request_match(MatchRequest::new(
                                            quote.id,
                                            test_cell(),
                                            test_distant_cell(),
                                        ))
                                        .is_ok()
                                })
                                .unwrap_or(false)
                        })
                        .count()
                }))
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_quotes,
    bench_ranking,
    bench_session_lifecycle,
    bench_dispatch
);
criterion_main!(benches);
