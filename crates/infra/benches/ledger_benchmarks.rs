use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rentledger_core::{InstrumentId, Money};
use rentledger_infra::{InMemoryLedgerStore, LedgerStore, RentalEngine};
use rentledger_inventory::{Instrument, NewInstrument};
use rentledger_rental::RentalPolicy;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Engine over a fresh store with `units` available units of one instrument.
fn seeded_engine(rt: &Runtime, units: usize) -> RentalEngine<InMemoryLedgerStore> {
    let store = InMemoryLedgerStore::new();
    let engine = RentalEngine::new(
        store.clone(),
        RentalPolicy {
            quota: usize::MAX,
            ..RentalPolicy::default()
        },
    );

    rt.block_on(async {
        let instrument = Instrument::new(NewInstrument {
            id: InstrumentId::new(),
            name: "violin".to_string(),
            kind: "string".to_string(),
            brand: "Yamaha".to_string(),
            base_cost: Money::from_minor(10_000).unwrap(),
        })
        .unwrap();
        store.register_instrument(&instrument).await.unwrap();

        for n in 0..units {
            engine
                .provision(
                    &format!("V-{n:05}"),
                    instrument.id_typed(),
                    "good",
                    Money::from_minor(15_000).unwrap(),
                )
                .await
                .unwrap();
        }
    });

    engine
}

fn bench_rent_terminate_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("rental_cycle");
    group.sample_size(500);

    // Each cycle appends one episode, so the ledger grows during the run.
    let engine = seeded_engine(&rt, 1);
    group.bench_function("rent_then_terminate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rented = engine.rent("V-00000", "s-1").await.unwrap();
                let termination = engine.terminate("V-00000").await.unwrap();
                black_box((rented, termination));
            })
        });
    });

    group.finish();
}

fn bench_listing(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("listing");

    for units in [10usize, 100, 1_000].iter() {
        let engine = seeded_engine(&rt, *units);
        group.throughput(Throughput::Elements(*units as u64));
        group.bench_with_input(BenchmarkId::new("list_available", units), units, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let listings = engine.queries().list_available().await.unwrap();
                    black_box(listings);
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rent_terminate_cycle, bench_listing);
criterion_main!(benches);
