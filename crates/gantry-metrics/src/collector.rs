// Copyright 2026 Gantry Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::snapshot::{
    LatencyHistogram, LatencySummary, MetricsSnapshot, RouteSnapshot, StatusClassCounts,
};

const HISTOGRAM_BUCKETS: usize = 6;

/// Per-route aggregate storage.
#[derive(Debug, Default)]
struct RouteStats {
    requests: u64,
    errors: u64,
    latency_sum_us: u64,
}

/// Thread-safe request metrics collector.
///
/// Scalar counters are lock-free atomics updated on every request; the
/// latency histogram and the per-route map sit behind short-held locks.
#[derive(Debug)]
pub struct Collector {
    start: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limit_rejections: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_count: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    histogram: Mutex<[u64; HISTOGRAM_BUCKETS]>,
    routes: RwLock<HashMap<String, RouteStats>>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            rate_limit_rejections: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_3xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            histogram: Mutex::new([0; HISTOGRAM_BUCKETS]),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Records one completed request.
    pub fn record_request(&self, route: &str, latency: Duration, status: u16, from_cache: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if from_cache {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        match status {
            200..=299 => {
                self.status_2xx.fetch_add(1, Ordering::Relaxed);
            }
            300..=399 => {
                self.status_3xx.fetch_add(1, Ordering::Relaxed);
            }
            400..=499 => {
                self.status_4xx.fetch_add(1, Ordering::Relaxed);
            }
            500.. => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                self.status_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let latency_us = latency.as_micros() as u64;
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);

        {
            let mut histogram = self.histogram.lock().unwrap();
            histogram[bucket_index(latency_us)] += 1;
        }

        {
            let mut routes = self.routes.write().unwrap();
            let stats = routes.entry(route.to_owned()).or_default();
            stats.requests += 1;
            stats.latency_sum_us += latency_us;
            if status >= 500 {
                stats.errors += 1;
            }
        }
    }

    /// Records a request rejected by the rate limiter.
    pub fn record_rate_limited(&self) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot suitable for JSON serialization.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let errors = self.total_errors.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let count = self.latency_count.load(Ordering::Relaxed);
        let sum_us = self.latency_sum_us.load(Ordering::Relaxed);
        let min_us = self.latency_min_us.load(Ordering::Relaxed);

        let histogram = {
            let buckets = self.histogram.lock().unwrap();
            LatencyHistogram {
                le_1ms: buckets[0],
                le_5ms: buckets[1],
                le_10ms: buckets[2],
                le_50ms: buckets[3],
                le_100ms: buckets[4],
                over_100ms: buckets[5],
            }
        };

        let routes = {
            let routes = self.routes.read().unwrap();
            routes
                .iter()
                .map(|(path, stats)| {
                    (
                        path.clone(),
                        RouteSnapshot {
                            requests: stats.requests,
                            errors: stats.errors,
                            avg_latency_us: if stats.requests > 0 {
                                stats.latency_sum_us as f64 / stats.requests as f64
                            } else {
                                0.0
                            },
                        },
                    )
                })
                .collect()
        };

        MetricsSnapshot {
            uptime_seconds: self.start.elapsed().as_secs_f64(),
            total_requests: total,
            total_errors: errors,
            error_rate: ratio(errors, total),
            cache_hits: hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_rate: ratio(hits, total),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            latency_us: LatencySummary {
                count,
                sum_us,
                min_us: if min_us == u64::MAX { 0 } else { min_us },
                max_us: self.latency_max_us.load(Ordering::Relaxed),
                avg_us: if count > 0 {
                    sum_us as f64 / count as f64
                } else {
                    0.0
                },
            },
            latency_histogram: histogram,
            status_codes: StatusClassCounts {
                class_2xx: self.status_2xx.load(Ordering::Relaxed),
                class_3xx: self.status_3xx.load(Ordering::Relaxed),
                class_4xx: self.status_4xx.load(Ordering::Relaxed),
                class_5xx: self.status_5xx.load(Ordering::Relaxed),
            },
            routes,
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Bucket edges: 1ms, 5ms, 10ms, 50ms, 100ms, +inf.
fn bucket_index(latency_us: u64) -> usize {
    match latency_us / 1000 {
        0 => 0,
        1..=4 => 1,
        5..=9 => 2,
        10..=49 => 3,
        50..=99 => 4,
        _ => 5,
    }
}
