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

//! Gantry Metrics
//!
//! Request metrics for the gateway: lock-free counters, a fixed-bucket
//! latency histogram, and per-route aggregates, exposed as a serializable
//! point-in-time snapshot.

pub mod collector;
pub mod snapshot;

pub use collector::Collector;
pub use snapshot::{
    LatencyHistogram, LatencySummary, MetricsSnapshot, RouteSnapshot, StatusClassCounts,
};
