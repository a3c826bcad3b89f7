//! Trigger discipline for sync runs.
//!
//! At most one run per `gateway:kind` may be in flight, and manual triggers
//! for a pair are rate limited (3 per 120 s by default). Runs for different
//! pairs never block each other.
//!
//! # Tracing Events
//!
//! - `gatesync::sync` WARN when a trigger is throttled or rejected as concurrent

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::TriggerLimitConfig;
use crate::error::{GatesyncError, Result};
use crate::gateway::{GatewayId, RecordKind};

/// Shrink the limiter state every N checks to keep memory bounded.
const SHRINK_INTERVAL: u64 = 1000;

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock, NoOpMiddleware>;

/// Lock key for a gateway and record kind.
pub fn gate_key(gateway: GatewayId, kind: RecordKind) -> String {
    format!("{}:{}", gateway, kind)
}

/// Hands out [`SyncPermit`]s.
#[derive(Clone)]
pub struct SyncGate {
    limiter: Arc<KeyedLimiter>,
    in_flight: Arc<DashMap<String, Instant>>,
    check_count: Arc<AtomicU64>,
}

impl SyncGate {
    /// Allow `max_triggers` per `window` for each key.
    pub fn new(max_triggers: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_triggers.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window)
            .unwrap_or_else(|| Quota::per_minute(burst))
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            in_flight: Arc::new(DashMap::new()),
            check_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &TriggerLimitConfig) -> Self {
        Self::new(config.max_triggers, config.window())
    }

    /// Claim the pair for one run.
    ///
    /// Fails with `SyncInProgress` while another permit for the pair is alive,
    /// and with `TriggerThrottled` once the pair used up its quota. A rejected
    /// concurrent trigger does not consume quota.
    pub fn acquire(&self, gateway: GatewayId, kind: RecordKind) -> Result<SyncPermit> {
        let key = gate_key(gateway, kind);

        let count = self.check_count.fetch_add(1, Ordering::Relaxed);
        if count % SHRINK_INTERVAL == 0 && count > 0 {
            self.limiter.retain_recent();
        }

        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) => {
                let elapsed = running.get().elapsed().as_secs();
                tracing::warn!(
                    target: "gatesync::sync",
                    key = %key,
                    running_for_secs = elapsed,
                    "Sync trigger rejected: run in progress"
                );
                Err(GatesyncError::SyncInProgress(key))
            }
            Entry::Vacant(slot) => {
                if let Err(not_until) = self.limiter.check_key(&key) {
                    let wait = not_until
                        .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                    let retry_after = wait.as_secs().max(1);
                    tracing::warn!(
                        target: "gatesync::sync",
                        key = %key,
                        retry_after_secs = retry_after,
                        "Sync trigger throttled"
                    );
                    return Err(GatesyncError::TriggerThrottled(format!(
                        "{}; retry in {}s",
                        key, retry_after
                    )));
                }
                slot.insert(Instant::now());
                Ok(SyncPermit {
                    key,
                    in_flight: self.in_flight.clone(),
                })
            }
        }
    }

    pub fn is_running(&self, gateway: GatewayId, kind: RecordKind) -> bool {
        self.in_flight.contains_key(&gate_key(gateway, kind))
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::from_config(&TriggerLimitConfig::default())
    }
}

impl std::fmt::Debug for SyncGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGate")
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Proof that a run owns its `gateway:kind` pair. Releases it on drop.
#[derive(Debug)]
pub struct SyncPermit {
    key: String,
    in_flight: Arc<DashMap<String, Instant>>,
}

impl SyncPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
