//! Per-client rate limiting.
//!
//! The limiter combines a token bucket (burst control and refill) with a
//! 60-second sliding window of admission timestamps (diagnostics and reset
//! computation). Client state is sharded: each shard owns a mutex and a map
//! from client key to state, so contention is bounded by the shard count
//! and admissions for the same key are serialized.
//!
//! A nonzero per-route rate overrides the default refill rate for that
//! admission only; shard configuration is never mutated from request input.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::debug;

/// Length of the sliding window, and the horizon reported in reset times.
const WINDOW_SECS: i64 = 60;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens left after this admission; 0 when denied.
    pub remaining: i64,
    /// Unix timestamp at which the bucket is expected to admit again.
    pub reset: i64,
}

/// Per-client token bucket state.
#[derive(Debug)]
struct ClientState {
    tokens: f64,
    last_refill: i64,
    window: VecDeque<i64>,
}

struct Shard {
    clients: Mutex<HashMap<String, ClientState>>,
}

/// Sharded hybrid token-bucket / sliding-window rate limiter.
pub struct RateLimiter {
    shards: Vec<Shard>,
    default_rate: u32,
    burst: u32,
}

impl RateLimiter {
    /// Creates a limiter with `num_shards` shards, refilling
    /// `default_rate_per_minute` tokens per minute up to `burst_size`.
    pub fn new(num_shards: usize, default_rate_per_minute: u32, burst_size: u32) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| Shard {
                clients: Mutex::new(HashMap::new()),
            })
            .collect();
        Self {
            shards,
            default_rate: default_rate_per_minute,
            burst: burst_size,
        }
    }

    /// Checks whether `client_key` may proceed, consuming one token on
    /// admission.
    ///
    /// A nonzero `custom_rate` (requests per minute) replaces the default
    /// refill rate for this client on this call. Denial is a normal
    /// outcome, not an error.
    pub fn admit(&self, client_key: &str, custom_rate: u32) -> Decision {
        self.admit_at(client_key, custom_rate, unix_now())
    }

    fn admit_at(&self, client_key: &str, custom_rate: u32, now: i64) -> Decision {
        let rate = if custom_rate > 0 {
            custom_rate
        } else {
            self.default_rate
        } as f64;

        let shard = &self.shards[self.shard_index(client_key)];
        let mut clients = shard.clients.lock().unwrap();
        let state = clients
            .entry(client_key.to_owned())
            .or_insert_with(|| ClientState {
                tokens: self.burst as f64,
                last_refill: now,
                window: VecDeque::new(),
            });

        // Drop window entries older than one minute.
        let cutoff = now - WINDOW_SECS;
        while state.window.front().is_some_and(|&ts| ts < cutoff) {
            state.window.pop_front();
        }

        // Refill based on elapsed time, capped at the burst size.
        let elapsed = now - state.last_refill;
        if elapsed > 0 {
            state.tokens =
                (state.tokens + rate * elapsed as f64 / 60.0).min(self.burst as f64);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.window.push_back(now);
            return Decision {
                allowed: true,
                remaining: state.tokens.floor() as i64,
                reset: now + WINDOW_SECS,
            };
        }

        let deficit = 1.0 - state.tokens;
        let wait = ((deficit / rate) * 60.0).ceil() as i64;
        Decision {
            allowed: false,
            remaining: 0,
            reset: now + wait,
        }
    }

    /// Drops clients whose window is empty and whose last refill is older
    /// than `max_idle`. Returns the number of entries removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let cutoff = unix_now() - max_idle.as_secs() as i64;
        let mut dropped = 0;
        for shard in &self.shards {
            let mut clients = shard.clients.lock().unwrap();
            let before = clients.len();
            clients.retain(|_, state| !state.window.is_empty() || state.last_refill >= cutoff);
            dropped += before - clients.len();
        }
        dropped
    }

    /// Spawns a background task sweeping idle clients every `interval`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = limiter.sweep_idle(max_idle);
                if dropped > 0 {
                    debug!(dropped, "dropped idle rate limit clients");
                }
            }
        })
    }

    /// Number of client entries currently tracked across all shards.
    pub fn tracked_clients(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.clients.lock().unwrap().len())
            .sum()
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hash: u64 = 0;
        for byte in key.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(byte as u64);
        }
        (hash % self.shards.len() as u64) as usize
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
