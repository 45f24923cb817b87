//! Duplicate-request coalescing (singleflight).
//!
//! Concurrent requests that share a key are funneled into a single
//! upstream execution: the first caller for a key becomes the executor,
//! every other caller enrolls as a waiter and receives a clone of the
//! executor's outcome. Completed groups linger for a fixed TTL so that
//! stragglers arriving just after completion still get the shared result;
//! after the TTL the group is reaped and the next caller re-executes.
//!
//! The group registry is a concurrent map whose entry API gives the
//! atomic load-or-store this requires; the executor-vs-waiter decision is
//! taken under the group's own lock.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};
use crate::response::ProxyResponse;

type Outcome = Result<ProxyResponse>;

/// How long a waiter blocks before giving up on its executor.
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct GroupState {
    executing: bool,
    result: Option<Outcome>,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct Group {
    state: Mutex<GroupState>,
}

enum Role {
    Executor,
    Waiter(oneshot::Receiver<Outcome>),
}

/// Singleflight coalescer keyed by request identity.
pub struct Coalescer {
    groups: Arc<DashMap<String, Arc<Group>>>,
    reap_ttl: Duration,
    wait_timeout: Duration,
}

impl Coalescer {
    /// Creates a coalescer whose completed groups are reaped `reap_ttl`
    /// after their executor finishes.
    pub fn new(reap_ttl: Duration) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            reap_ttl,
            wait_timeout: WAIT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Runs `fut` under `key`, guaranteeing at most one in-flight
    /// execution per key.
    ///
    /// Callers that find an execution in progress block until its outcome
    /// is broadcast, or surface [`GatewayError::CoalesceTimeout`] after
    /// the wait bound. A panic inside the executor's future is converted
    /// to an error before waiters are notified, so a poisoned execution
    /// cannot hang its peers.
    pub async fn run<F>(&self, key: &str, fut: F) -> Outcome
    where
        F: std::future::Future<Output = Outcome>,
    {
        let group = {
            let entry = self
                .groups
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Group::default()));
            Arc::clone(entry.value())
        };

        let role = {
            let mut state = group.state.lock().unwrap();
            if let Some(result) = &state.result {
                // Completed but not yet reaped: share the stored outcome.
                return result.clone();
            }
            if state.executing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Waiter(rx)
            } else {
                state.executing = true;
                Role::Executor
            }
        };

        match role {
            Role::Executor => {
                let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(GatewayError::UpstreamTransport(
                        "coalesced upstream call panicked".to_owned(),
                    )),
                };

                let waiters = {
                    let mut state = group.state.lock().unwrap();
                    state.result = Some(outcome.clone());
                    std::mem::take(&mut state.waiters)
                };
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }

                let groups = Arc::clone(&self.groups);
                let key = key.to_owned();
                let reap_ttl = self.reap_ttl;
                tokio::spawn(async move {
                    tokio::time::sleep(reap_ttl).await;
                    groups.remove(&key);
                });

                outcome
            }
            Role::Waiter(rx) => match tokio::time::timeout(self.wait_timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) | Err(_) => Err(GatewayError::CoalesceTimeout),
            },
        }
    }

    /// Number of live groups, reaped or not yet created excluded.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
