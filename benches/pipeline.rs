//! Integration benchmark for the scale processing pipeline.
//!
//! Feeds advertisements from a FakeScanner through run_with_io, the same way
//! the tests in app.rs do.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use scale_listener::app::{Options, ScanFuture, Scanner, run_with_io};
use scale_listener::{AdvertisementResult, Backend, RawAdvertisement, WEIGHT_SERVICE_KEY};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const TEST_DEVICE: &str = "E9:BA:38:40:EF:95";

/// Stabilized kg frame reading 72.35 kg
fn scale_payload() -> Vec<u8> {
    vec![
        0x02, // Unit: kg
        0x24, // Control: stabilized
        0xE7, 0x07, 0x01, 0x0F, 0x07, 0x1E, 0x0C, // Date and time
        0xF4, 0x01, // Impedance
        0x86, 0x38, // Weight: 14470 * 0.01 / 2
    ]
}

fn advertisement(device: &str) -> RawAdvertisement {
    RawAdvertisement::new(device).with_service_data(WEIGHT_SERVICE_KEY, scale_payload())
}

/// A fake scanner that yields pre-built advertisements.
struct FakeScanner {
    advertisements: Vec<RawAdvertisement>,
}

impl Scanner for FakeScanner {
    fn start_scan(&self, _backend: Backend) -> ScanFuture<'_> {
        let advertisements = self.advertisements.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<AdvertisementResult>(advertisements.len().max(1));
            tokio::spawn(async move {
                for adv in advertisements {
                    let _ = tx.send(Ok(adv)).await;
                }
            });
            Ok(rx)
        })
    }
}

fn default_options() -> Options {
    Options {
        mac: Some(TEST_DEVICE.to_string()),
        ..Options::default()
    }
}

fn run_once(rt: &Runtime, scanner: &FakeScanner, options: Options, capacity: usize) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(capacity);
    rt.block_on(async {
        run_with_io(options, scanner, &mut out).await.unwrap();
    });
    out
}

/// Benchmark the full application pipeline: scanner -> filter -> decode -> gate -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("single_frame", |b| {
        b.iter(|| {
            let scanner = FakeScanner {
                advertisements: vec![advertisement(TEST_DEVICE)],
            };
            black_box(run_once(&rt, &scanner, default_options(), 256))
        })
    });

    group.finish();
}

/// Benchmark bursts of repeated frames, where all but the first are debounced
fn bench_burst_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_pipeline");
    let rt = Runtime::new().unwrap();

    for burst in [1, 10, 100] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &size| {
            let advertisements: Vec<RawAdvertisement> =
                (0..size).map(|_| advertisement(TEST_DEVICE)).collect();

            b.iter(|| {
                let scanner = FakeScanner {
                    advertisements: advertisements.clone(),
                };
                let options = Options {
                    debounce: Duration::from_secs(3600),
                    ..default_options()
                };
                black_box(run_once(&rt, &scanner, options, 256))
            })
        });
    }

    group.finish();
}

/// Benchmark a busy environment where most advertisements come from other devices
fn bench_filtered_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_pipeline");
    let rt = Runtime::new().unwrap();

    let mut advertisements: Vec<RawAdvertisement> = (0..99)
        .map(|i| advertisement(&format!("11:22:33:44:55:{i:02X}")))
        .collect();
    advertisements.push(advertisement(TEST_DEVICE));

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_mixed_devices", |b| {
        b.iter(|| {
            let scanner = FakeScanner {
                advertisements: advertisements.clone(),
            };
            black_box(run_once(&rt, &scanner, default_options(), 256))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_app_pipeline,
    bench_burst_pipeline,
    bench_filtered_pipeline
);
criterion_main!(benches);
