//! Process metrics
//!
//! Vote/cache counters plus per-route request latency histograms, rendered
//! in the Prometheus text exposition format by `GET /metrics`.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value (milliseconds)
    pub fn observe(&self, value: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative (upper bound, count) pairs, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }
        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct RouteMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Metrics registry shared by the coordinator and the HTTP layer
#[derive(Debug)]
pub struct MetricsRegistry {
    routes: Mutex<BTreeMap<String, Arc<RouteMetrics>>>,

    pub upvotes: Counter,
    pub unvotes: Counter,
    pub duplicate_votes: Counter,
    pub missing_votes: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_errors: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(BTreeMap::new()),
            upvotes: Counter::new(),
            unvotes: Counter::new(),
            duplicate_votes: Counter::new(),
            missing_votes: Counter::new(),
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            cache_errors: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a route template (e.g. `/api/features/:id`)
    pub fn route(&self, route: &str) -> Arc<RouteMetrics> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.entry(route.to_string()).or_default().clone()
    }

    pub fn record_request(&self, route: &str, duration: Duration, success: bool) {
        let metrics = self.route(route);
        metrics.requests_total.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("featurevote_upvotes_total", "Votes created", &self.upvotes),
            ("featurevote_unvotes_total", "Votes removed", &self.unvotes),
            (
                "featurevote_duplicate_votes_total",
                "Upvotes rejected because the user already voted",
                &self.duplicate_votes,
            ),
            (
                "featurevote_missing_votes_total",
                "Unvotes rejected because no vote existed",
                &self.missing_votes,
            ),
            ("featurevote_cache_hits_total", "Vote count cache hits", &self.cache_hits),
            ("featurevote_cache_misses_total", "Vote count cache misses", &self.cache_misses),
            (
                "featurevote_cache_errors_total",
                "Failed cache operations",
                &self.cache_errors,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP featurevote_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE featurevote_uptime_seconds gauge\n");
        let _ = writeln!(out, "featurevote_uptime_seconds {}", self.uptime_seconds());

        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());

        out.push_str("# HELP featurevote_requests_total Requests per route\n");
        out.push_str("# TYPE featurevote_requests_total counter\n");
        for (route, m) in routes.iter() {
            let _ = writeln!(
                out,
                "featurevote_requests_total{{route=\"{}\"}} {}",
                route,
                m.requests_total.get()
            );
        }

        out.push_str("# HELP featurevote_request_errors_total Non-2xx responses per route\n");
        out.push_str("# TYPE featurevote_request_errors_total counter\n");
        for (route, m) in routes.iter() {
            let _ = writeln!(
                out,
                "featurevote_request_errors_total{{route=\"{}\"}} {}",
                route,
                m.requests_error.get()
            );
        }

        out.push_str("# HELP featurevote_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE featurevote_request_duration_ms histogram\n");
        for (route, m) in routes.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "featurevote_request_duration_ms_bucket{{route=\"{}\",le=\"{}\"}} {}",
                    route, le, count
                );
            }
            let _ = writeln!(
                out,
                "featurevote_request_duration_ms_sum{{route=\"{}\"}} {}",
                route,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "featurevote_request_duration_ms_count{{route=\"{}\"}} {}",
                route,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
