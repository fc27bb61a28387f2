//! Per-route response time tracking with inactivity decay.
//!
//! Each route keeps the last [`SAMPLE_COUNT`] round-trip times in a ring.
//! The effective response time is the plain mean of the ring, so a single
//! slow request weighs a tenth of the score and unfilled slots count as zero.
//!
//! When a route sees no traffic for longer than the inactivity threshold a
//! zero-valued decay sample is pushed. Decay samples are tagged so they never
//! inflate the request counter, which lets a real 0 ms response still count.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Number of samples kept per route.
pub const SAMPLE_COUNT: usize = 10;

/// One slot of the sample ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseSample {
    /// Round-trip time in milliseconds.
    pub value_ms: u64,
    /// `true` when pushed by inactivity decay rather than a real request.
    pub is_decay: bool,
}

/// Rolling response time statistics for one route on one server.
#[derive(Debug, Clone)]
pub struct RouteMetrics {
    samples: [ResponseSample; SAMPLE_COUNT],
    next: usize,
    number_of_requests: u64,
    last_request: Instant,
}

impl Default for RouteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteMetrics {
    /// Creates metrics with an all-zero ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: [ResponseSample::default(); SAMPLE_COUNT],
            next: 0,
            number_of_requests: 0,
            last_request: Instant::now(),
        }
    }

    /// Mean of the ring in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn effective_response_time(&self) -> f64 {
        let total: u64 = self.samples.iter().map(|s| s.value_ms).sum();
        total as f64 / SAMPLE_COUNT as f64
    }

    /// Real requests recorded since creation or the last reset.
    #[must_use]
    pub fn number_of_requests(&self) -> u64 {
        self.number_of_requests
    }

    /// The ring in storage order.
    #[must_use]
    pub fn samples(&self) -> &[ResponseSample; SAMPLE_COUNT] {
        &self.samples
    }

    /// Records a completed request.
    pub fn record_request(&mut self, response_ms: u64) {
        self.record_request_at(response_ms, Instant::now());
    }

    /// Records a completed request as of `now`.
    pub fn record_request_at(&mut self, response_ms: u64, now: Instant) {
        self.push(ResponseSample {
            value_ms: response_ms,
            is_decay: false,
        });
        self.number_of_requests += 1;
        self.last_request = now;
    }

    /// Pushes a decay sample as of `now`.
    pub fn record_decay_at(&mut self, now: Instant) {
        self.push(ResponseSample {
            value_ms: 0,
            is_decay: true,
        });
        self.last_request = now;
    }

    /// Applies decay if the route has been idle longer than `inactivity`.
    ///
    /// Returns `true` when a decay sample was pushed.
    pub fn update_at(&mut self, inactivity: Duration, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_request) > inactivity {
            self.record_decay_at(now);
            true
        } else {
            false
        }
    }

    /// [`update_at`](Self::update_at) against the current time.
    pub fn update(&mut self, inactivity: Duration) -> bool {
        self.update_at(inactivity, Instant::now())
    }

    fn push(&mut self, sample: ResponseSample) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % SAMPLE_COUNT;
    }
}

/// Route metrics of one server, keyed case-insensitively by route.
#[derive(Debug, Clone, Default)]
pub struct RouteMetricsCollection {
    routes: HashMap<String, RouteMetrics>,
}

impl RouteMetricsCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for `route`, created on first use.
    pub fn route_mut(&mut self, route: &str) -> &mut RouteMetrics {
        self.routes.entry(route.to_lowercase()).or_default()
    }

    /// Metrics for `route` if any were recorded.
    #[must_use]
    pub fn route(&self, route: &str) -> Option<&RouteMetrics> {
        self.routes.get(&route.to_lowercase())
    }

    /// Effective response time for `route`; zero when never used.
    #[must_use]
    pub fn effective_response_time(&self, route: &str) -> f64 {
        self.route(route)
            .map_or(0.0, RouteMetrics::effective_response_time)
    }

    /// Applies inactivity decay to every route.
    pub fn update_all_at(&mut self, inactivity: Duration, now: Instant) {
        for metrics in self.routes.values_mut() {
            metrics.update_at(inactivity, now);
        }
    }

    /// `(route, effective response time, request count)` for every route, sorted by route.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, f64, u64)> {
        let mut rows: Vec<_> = self
            .routes
            .iter()
            .map(|(route, m)| (route.clone(), m.effective_response_time(), m.number_of_requests()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
