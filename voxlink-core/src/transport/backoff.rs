//! Reconnection with exponential backoff.
//!
//! `Reconnector::with_backoff` keeps calling a connect function until it
//! succeeds, reporting every state transition. It has no retry cap: callers
//! that need to give up drop the future (e.g. by tearing down the session).
//!
//! A connection that drops before `stable_after_ms` does not reset the
//! attempt count: the next `with_backoff` waits as if the previous attempt
//! had failed, so a server that accepts and hangs up is not hammered.

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use tracing::{info, warn};

use crate::{
    error::Result,
    ipc::events::{ConnectionState, ConnectionStateEvent},
};

/// Delay schedule between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Wait after the first failure. Default: 200 ms.
    pub first_retry_ms: u64,
    /// Wait after the second failure, doubling afterwards. Default: 500 ms.
    pub base_ms: u64,
    /// Upper bound for any wait. Default: 10 s.
    pub max_ms: u64,
    /// A connection must last this long before the attempt count resets.
    /// Default: 5 s.
    pub stable_after_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first_retry_ms: 200,
            base_ms: 500,
            max_ms: 10_000,
            stable_after_ms: 5_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based).
    ///
    /// `1 → first_retry`, `n ≥ 2 → min(base · 2^(n-2), max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = if attempt <= 1 {
            self.first_retry_ms
        } else {
            let factor = 2u64.saturating_pow(attempt - 2);
            self.base_ms.saturating_mul(factor).min(self.max_ms)
        };
        Duration::from_millis(ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }
}

/// Synchronous state-change callback: `(state, failed attempts so far)`.
pub type StateObserver = Arc<dyn Fn(ConnectionState, u32) + Send + Sync>;

const EVENT_CAP: usize = 64;

#[derive(Debug, Default)]
struct LinkHistory {
    connected_at: Option<Instant>,
    /// Attempts carried over from connections that dropped too soon.
    carried: u32,
}

pub struct Reconnector {
    policy: BackoffPolicy,
    state: Mutex<ConnectionState>,
    link: Mutex<LinkHistory>,
    observer: Option<StateObserver>,
    events: broadcast::Sender<ConnectionStateEvent>,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAP);
        Self {
            policy,
            state: Mutex::new(ConnectionState::Disconnected),
            link: Mutex::new(LinkHistory::default()),
            observer: None,
            events,
        }
    }

    /// Call `observer` on every transition, before `with_backoff` continues.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStateEvent> {
        self.events.subscribe()
    }

    /// Record that an established connection went away.
    ///
    /// A drop within `stable_after` of connecting counts as one more failed
    /// attempt for the next `with_backoff`.
    pub fn mark_disconnected(&self) {
        let attempt = {
            let mut link = self.link.lock();
            let short_lived = link
                .connected_at
                .take()
                .is_some_and(|at| at.elapsed() < self.policy.stable_after());
            link.carried = if short_lived {
                link.carried.saturating_add(1)
            } else {
                0
            };
            link.carried
        };
        self.set_state(ConnectionState::Disconnected, attempt);
    }

    /// Attempts the next `with_backoff` starts from.
    pub fn carried_attempts(&self) -> u32 {
        self.link.lock().carried
    }

    /// Retry `connect` until it succeeds and return its value.
    ///
    /// Sets `connecting` before every attempt, `connected` on success and
    /// `disconnected` after each failure, then sleeps per the policy.
    pub async fn with_backoff<F, Fut, T>(&self, mut connect: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = self.carried_attempts();
        if attempt > 0 {
            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "connection dropped soon after connecting; backing off"
            );
            tokio::time::sleep(delay).await;
        }
        loop {
            self.set_state(ConnectionState::Connecting, attempt);
            match connect().await {
                Ok(value) => {
                    self.link.lock().connected_at = Some(Instant::now());
                    self.set_state(ConnectionState::Connected, attempt);
                    if attempt > 0 {
                        info!(failed_attempts = attempt, "transport connected after retry");
                    } else {
                        info!("transport connected");
                    }
                    return value;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    self.set_state(ConnectionState::Disconnected, attempt);
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "connection failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState, attempt: u32) {
        *self.state.lock() = state;
        if let Some(observer) = &self.observer {
            observer(state, attempt);
        }
        let _ = self.events.send(ConnectionStateEvent { state, attempt });
    }
}

impl Default for Reconnector {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
