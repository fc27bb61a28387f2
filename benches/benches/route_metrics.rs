//! Benchmarks for mesh routing hot paths.
//!
//! Performance-critical paths:
//! - `RouteMetrics::record_request`: once per completed request
//! - `RouteMetricsCollection::update_all_at`: decay sweep across routes
//! - `protocol::encode` / `protocol::decode`: every heartbeat sent and received

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use meshgate::mesh::metrics::{RouteMetrics, RouteMetricsCollection};
use meshgate::mesh::protocol::{self, MessageKind};
use meshgate::mesh::MeshServerBroadcastData;
use std::time::{Duration, Instant};

fn bench_record_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_metrics");

    group.bench_function("record_request", |b| {
        let mut metrics = RouteMetrics::new();
        let mut ms = 0u64;
        b.iter(|| {
            ms = (ms + 37) % 5_000;
            metrics.record_request(black_box(ms));
        });
    });

    group.bench_function("effective_response_time", |b| {
        let mut metrics = RouteMetrics::new();
        for ms in [12, 40, 33, 30_000, 18, 25, 9, 14, 60, 21] {
            metrics.record_request(ms);
        }
        b.iter(|| black_box(metrics.effective_response_time()));
    });

    group.finish();
}

fn bench_decay_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("decay_sweep");

    for routes in [4usize, 32, 256] {
        let mut collection = RouteMetricsCollection::new();
        for i in 0..routes {
            collection.route_mut(&format!("category{}/module{i}", i % 8)).record_request(25);
        }
        let later = Instant::now() + Duration::from_secs(120);

        group.throughput(Throughput::Elements(routes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(routes), &routes, |b, _| {
            b.iter(|| collection.update_all_at(Duration::from_secs(60), black_box(later)));
        });
    }

    group.finish();
}

fn status(routes: usize) -> MeshServerBroadcastData {
    MeshServerBroadcastData {
        hostname: "inference-node-01".into(),
        system_description: "Linux (Ubuntu 24.04) (x86_64)".into(),
        platform: "Linux".into(),
        enabled_routes: Some((0..routes).map(|i| format!("vision/custom{i}")).collect()),
        is_broadcasting: true,
        is_monitoring: true,
        accept_forwarded_requests: true,
        allow_request_forwarding: true,
        known_hostnames: Some(vec!["inference-node-02".into(), "inference-node-03".into()]),
        code: 200,
    }
}

fn bench_heartbeat_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("heartbeat_codec");

    for routes in [2usize, 20, 100] {
        let status = status(routes);
        let Ok(bytes) = protocol::encode("meshgate", MessageKind::Heartbeat, &status) else {
            continue;
        };

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", routes), &status, |b, status| {
            b.iter(|| protocol::encode("meshgate", MessageKind::Heartbeat, black_box(status)));
        });
        group.bench_with_input(BenchmarkId::new("decode", routes), &bytes, |b, bytes| {
            b.iter(|| protocol::decode(black_box(bytes), "meshgate"));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_record_request,
    bench_decay_sweep,
    bench_heartbeat_codec
);
criterion_main!(benches);
