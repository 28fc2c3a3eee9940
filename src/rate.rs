// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-venue request pacing.
//!
//! The marketplace enforces minimum intervals that dwarf typical request
//! latencies (Retry-After values around 900 s have been observed), so the
//! [`RateGovernor`] does three things:
//!
//! - serializes outbound requests per venue behind an async mutex, making
//!   the gate authoritative;
//! - spaces requests by `max(configured_min, learned_min)` and honors
//!   explicit `Retry-After` back-off with a buffer and jitter;
//! - persists learned intervals so a freshly restarted process is not
//!   immediately 429'd back into learning them.
//!
//! The governor is process-local; concurrent access to the persistence file
//! from multiple processes is undefined and out of scope.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RateConfig;
use crate::model::now_millis;

/// Parse a `Retry-After` header value: integer seconds or an HTTP-date.
/// Returns `None` for garbage, negative values, and dates in the past.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return (secs > 0).then(|| Duration::from_secs(secs as u64));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta_ms = when.timestamp_millis() - now_millis();
    (delta_ms > 0).then(|| Duration::from_millis(delta_ms as u64))
}

/// Persisted slice of a venue's gate. `last_request_at_ms` is deliberately
/// memory-only; it is meaningless across restarts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PersistedVenueRate {
    pub next_allowed_at_ms: i64,
    pub learned_min_interval_ms: u64,
}

#[derive(Debug)]
struct GateState {
    next_allowed_at_ms: i64,
    learned_min_interval_ms: u64,
    last_request_at_ms: i64,
}

struct VenueGate {
    inner: tokio::sync::Mutex<GateState>,
}

/// Per-venue token gate with learned minimum intervals.
pub struct RateGovernor {
    config: RateConfig,
    path: Option<PathBuf>,
    gates: DashMap<String, Arc<VenueGate>>,
    /// Snapshot written to disk; updated under its own lock on the rare
    /// persist-worthy events (429s), never on success.
    persisted: parking_lot::Mutex<BTreeMap<String, PersistedVenueRate>>,
}

impl RateGovernor {
    /// Load persisted gate state, tolerating an absent or corrupt file.
    pub fn load(path: PathBuf, config: RateConfig) -> Self {
        let mut persisted = BTreeMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, PersistedVenueRate>>(&raw) {
                Ok(map) => {
                    persisted = map;
                    info!(path = %path.display(), venues = persisted.len(), "Loaded rate limit state");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt rate limit file, starting fresh");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read rate limit file, starting fresh");
            }
        }
        Self {
            config,
            path: Some(path),
            gates: DashMap::new(),
            persisted: parking_lot::Mutex::new(persisted),
        }
    }

    /// Governor without persistence.
    #[must_use]
    pub fn in_memory(config: RateConfig) -> Self {
        Self {
            config,
            path: None,
            gates: DashMap::new(),
            persisted: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    fn gate(&self, venue_key: &str) -> Arc<VenueGate> {
        self.gates
            .entry(venue_key.to_string())
            .or_insert_with(|| {
                let seed = self
                    .persisted
                    .lock()
                    .get(venue_key)
                    .copied()
                    .unwrap_or_default();
                Arc::new(VenueGate {
                    inner: tokio::sync::Mutex::new(GateState {
                        next_allowed_at_ms: seed.next_allowed_at_ms,
                        learned_min_interval_ms: seed.learned_min_interval_ms,
                        last_request_at_ms: 0,
                    }),
                })
            })
            .clone()
    }

    /// Block until this venue may issue its next request.
    ///
    /// Callers racing on the same venue queue behind the gate's mutex, so
    /// request starts are spaced by at least
    /// `max(configured_min, learned_min)` and never before an explicit
    /// back-off deadline.
    pub async fn wait_for_turn(&self, venue_key: &str) {
        let gate = self.gate(venue_key);
        let mut state = gate.inner.lock().await;

        let min_interval = self.config.min_interval_ms.max(state.learned_min_interval_ms) as i64;
        let earliest = state
            .next_allowed_at_ms
            .max(state.last_request_at_ms.saturating_add(min_interval));

        let now = now_millis();
        if earliest > now {
            let wait = Duration::from_millis((earliest - now) as u64);
            debug!(venue = venue_key, wait_ms = wait.as_millis() as u64, "Waiting for rate gate");
            tokio::time::sleep(wait).await;
        }
        state.last_request_at_ms = now_millis();
    }

    /// The venue answered 429. Push the gate past the server's wish (plus
    /// buffer and jitter) and, when learning is on, remember the interval.
    pub async fn on_rate_limited(&self, venue_key: &str, retry_after: Option<Duration>) {
        crate::metrics::record_rate_limit_hit(venue_key);

        let Some(retry_after) = retry_after.filter(|d| !d.is_zero()) else {
            debug!(venue = venue_key, "429 without usable Retry-After, leaving gate unchanged");
            return;
        };

        let retry_after_ms = retry_after.as_millis() as u64;
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };

        let gate = self.gate(venue_key);
        let snapshot = {
            let mut state = gate.inner.lock().await;

            let deadline =
                now_millis() + (retry_after_ms + self.config.buffer_ms + jitter) as i64;
            state.next_allowed_at_ms = state.next_allowed_at_ms.max(deadline);

            if self.config.learning_enabled {
                let learned = state
                    .learned_min_interval_ms
                    .max(retry_after_ms)
                    .min(self.config.learned_cap_ms);
                if learned != state.learned_min_interval_ms {
                    info!(
                        venue = venue_key,
                        learned_ms = learned,
                        "Learned longer minimum interval from Retry-After"
                    );
                    state.learned_min_interval_ms = learned;
                }
            }

            PersistedVenueRate {
                next_allowed_at_ms: state.next_allowed_at_ms,
                learned_min_interval_ms: state.learned_min_interval_ms,
            }
        };

        self.persisted.lock().insert(venue_key.to_string(), snapshot);
        self.persist();
    }

    /// A request went through. Optionally keep the gate spaced; never
    /// persisted (success is the frequent case).
    pub async fn on_success(&self, venue_key: &str) {
        if !self.config.enforce_after_success {
            return;
        }
        let gate = self.gate(venue_key);
        let mut state = gate.inner.lock().await;
        let min_interval = self.config.min_interval_ms.max(state.learned_min_interval_ms) as i64;
        state.next_allowed_at_ms = state.next_allowed_at_ms.max(now_millis() + min_interval);
    }

    /// Learned interval for a venue, for the metrics rollup.
    #[must_use]
    pub fn learned_interval(&self, venue_key: &str) -> Option<Duration> {
        self.persisted
            .lock()
            .get(venue_key)
            .map(|p| Duration::from_millis(p.learned_min_interval_ms))
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };

        let payload = {
            let map = self.persisted.lock();
            match serde_json::to_string_pretty(&*map) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize rate limit state");
                    return;
                }
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, payload) {
            warn!(path = %path.display(), error = %e, "Failed to persist rate limit state");
        }
    }
}
