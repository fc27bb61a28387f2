//! Benchmarks for the request queue core.
//!
//! Performance-critical paths:
//! - `BackendRouteMap::lookup`: once per inference request
//! - `CommandDispatcher::send_request`: enqueue, dequeue and correlate a response

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use meshgate::modules::BackendRouteMap;
use meshgate::queue::{CommandDispatcher, QueueService, RequestPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn route_map(modules: usize) -> BackendRouteMap {
    let map = BackendRouteMap::new();
    for i in 0..modules {
        let queue = format!("queue{i}");
        map.register(&format!("vision/custom{i}"), "POST", &queue, "custom");
        map.register(&format!("text/summary{i}"), "POST", &queue, "summarize");
    }
    map
}

fn bench_route_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_lookup");

    for modules in [4usize, 64] {
        let map = route_map(modules);
        group.bench_with_input(BenchmarkId::new("exact", modules), &map, |b, map| {
            b.iter(|| map.lookup(black_box("vision/custom1"), "POST"));
        });
        group.bench_with_input(BenchmarkId::new("prefix", modules), &map, |b, map| {
            b.iter(|| map.lookup(black_box("vision/custom1/model/v2"), "POST"));
        });
    }

    group.finish();
}

fn bench_dispatch_round_trip(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let queues = Arc::new(QueueService::new());
    queues.ensure_queue_exists("vision_queue");
    let dispatcher = CommandDispatcher::new(Arc::clone(&queues), Duration::from_secs(5));

    let worker_queues = Arc::clone(&queues);
    let token = CancellationToken::new();
    let worker_token = token.clone();
    runtime.spawn(async move {
        while let Some(request) = worker_queues.dequeue("vision_queue", &worker_token).await {
            worker_queues.set_result(&request.reqid, Some(r#"{"success":true}"#.into()));
        }
    });

    let dispatcher = &dispatcher;
    c.bench_function("dispatch_round_trip", |b| {
        b.to_async(&runtime).iter(|| async move {
            let payload = RequestPayload::new("detect");
            black_box(
                dispatcher
                    .send_request("vision_queue", payload, &CancellationToken::new())
                    .await,
            )
        });
    });

    token.cancel();
}

criterion_group!(benches, bench_route_lookup, bench_dispatch_round_trip);
criterion_main!(benches);
