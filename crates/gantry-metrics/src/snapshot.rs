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

use serde::Serialize;

/// Latency aggregates in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub sum_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
}

/// Fixed latency histogram with millisecond bucket edges.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyHistogram {
    #[serde(rename = "0-1ms")]
    pub le_1ms: u64,
    #[serde(rename = "1-5ms")]
    pub le_5ms: u64,
    #[serde(rename = "5-10ms")]
    pub le_10ms: u64,
    #[serde(rename = "10-50ms")]
    pub le_50ms: u64,
    #[serde(rename = "50-100ms")]
    pub le_100ms: u64,
    #[serde(rename = "100ms+")]
    pub over_100ms: u64,
}

/// Response counts by status class.
#[derive(Debug, Clone, Serialize)]
pub struct StatusClassCounts {
    #[serde(rename = "2xx")]
    pub class_2xx: u64,
    #[serde(rename = "3xx")]
    pub class_3xx: u64,
    #[serde(rename = "4xx")]
    pub class_4xx: u64,
    #[serde(rename = "5xx")]
    pub class_5xx: u64,
}

/// Per-route aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_us: f64,
}

/// Complete metrics snapshot, serialized on the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub rate_limit_rejections: u64,
    pub latency_us: LatencySummary,
    pub latency_histogram: LatencyHistogram,
    pub status_codes: StatusClassCounts,
    pub routes: HashMap<String, RouteSnapshot>,
}
