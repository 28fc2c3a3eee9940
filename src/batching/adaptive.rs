// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Adaptive batch sizing per venue.
//!
//! The [`AdaptiveBatcher`] is a multiplicative increase / multiplicative
//! decrease controller over the marketplace batch size: a streak of
//! successful batches grows it, a 429 shrinks it. State is persisted so a
//! restarted process does not rediscover the venue's tolerance by
//! hammering it.
//!
//! # Example
//!
//! ```
//! use catalog_sync::{AdaptiveBatcher, AdaptiveConfig};
//!
//! let batcher = AdaptiveBatcher::in_memory(AdaptiveConfig::default());
//! assert_eq!(batcher.batch_size("venue-1"), 50);
//!
//! batcher.on_rate_limit("venue-1");
//! assert_eq!(batcher.batch_size("venue-1"), 25);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AdaptiveConfig;
use crate::model::now_millis;

/// Per-venue controller state. Persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueBatchState {
    pub current_batch_size: usize,
    pub success_streak: u32,
    pub failure_streak: u32,
    /// Epoch ms of the last 429; 0 = never.
    pub last_rate_limit_at_ms: i64,
    pub total_successes: u64,
    pub total_rate_limits: u64,
}

impl VenueBatchState {
    fn new(initial_batch_size: usize) -> Self {
        Self {
            current_batch_size: initial_batch_size,
            success_streak: 0,
            failure_streak: 0,
            last_rate_limit_at_ms: 0,
            total_successes: 0,
            total_rate_limits: 0,
        }
    }
}

/// Window after a 429 during which the conservative delay applies.
const RECENT_RATE_LIMIT_WINDOW_MS: i64 = 5 * 60 * 1_000;

/// Multiplicative increase / multiplicative decrease batch size controller.
pub struct AdaptiveBatcher {
    config: AdaptiveConfig,
    /// Persistence path; `None` keeps the controller memory-only (tests).
    path: Option<PathBuf>,
    venues: DashMap<String, VenueBatchState>,
}

impl AdaptiveBatcher {
    /// Load persisted controller state, tolerating an absent or corrupt
    /// file (the in-memory copy is authoritative for the live process).
    pub fn load(path: PathBuf, config: AdaptiveConfig) -> Self {
        let venues = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, VenueBatchState>>(&raw) {
                Ok(map) => {
                    for (venue, mut state) in map {
                        // Config may have tightened since the file was written.
                        state.current_batch_size = state
                            .current_batch_size
                            .max(config.min_batch_size)
                            .min(config.max_batch_size);
                        venues.insert(venue, state);
                    }
                    info!(path = %path.display(), venues = venues.len(), "Loaded adaptive batch state");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt adaptive batch file, starting fresh");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read adaptive batch file, starting fresh");
            }
        }
        Self { config, path: Some(path), venues }
    }

    /// Controller without persistence.
    #[must_use]
    pub fn in_memory(config: AdaptiveConfig) -> Self {
        Self { config, path: None, venues: DashMap::new() }
    }

    /// Current batch size for a venue, always within `[min, max]`.
    #[must_use]
    pub fn batch_size(&self, venue: &str) -> usize {
        self.venues
            .entry(venue.to_string())
            .or_insert_with(|| VenueBatchState::new(self.config.initial_batch_size))
            .current_batch_size
    }

    /// A batch went through. Every `increase_threshold` consecutive
    /// successes the batch size grows by `increase_rate`, capped at max.
    pub fn on_success(&self, venue: &str) {
        let mut changed = false;
        {
            let mut state = self
                .venues
                .entry(venue.to_string())
                .or_insert_with(|| VenueBatchState::new(self.config.initial_batch_size));
            state.failure_streak = 0;
            state.success_streak += 1;
            state.total_successes += 1;

            if state.success_streak >= self.config.increase_threshold {
                let grown = (state.current_batch_size as f64 * self.config.increase_rate) as usize;
                let next = grown.min(self.config.max_batch_size);
                if next != state.current_batch_size {
                    debug!(venue, from = state.current_batch_size, to = next, "Growing batch size");
                    state.current_batch_size = next;
                    changed = true;
                }
                state.success_streak = 0;
            }
            crate::metrics::set_batch_size(venue, state.current_batch_size);
        }
        if changed {
            self.persist();
        }
    }

    /// The venue rate-limited us. Shrink immediately and remember when.
    pub fn on_rate_limit(&self, venue: &str) {
        {
            let mut state = self
                .venues
                .entry(venue.to_string())
                .or_insert_with(|| VenueBatchState::new(self.config.initial_batch_size));
            state.success_streak = 0;
            state.failure_streak += 1;
            state.total_rate_limits += 1;
            state.last_rate_limit_at_ms = now_millis();

            let shrunk = (state.current_batch_size as f64 * self.config.decrease_rate) as usize;
            let next = shrunk.max(self.config.min_batch_size);
            if next != state.current_batch_size {
                info!(venue, from = state.current_batch_size, to = next, "Shrinking batch size after 429");
                state.current_batch_size = next;
            }
            crate::metrics::set_batch_size(venue, state.current_batch_size);
        }
        self.persist();
    }

    /// Inter-batch delay: conservative while a 429 is fresh, nominal after.
    #[must_use]
    pub fn recommended_delay(&self, venue: &str) -> Duration {
        let recently_limited = self
            .venues
            .get(venue)
            .map(|s| {
                s.last_rate_limit_at_ms > 0
                    && now_millis() - s.last_rate_limit_at_ms < RECENT_RATE_LIMIT_WINDOW_MS
            })
            .unwrap_or(false);

        if recently_limited {
            Duration::from_millis(self.config.conservative_delay_ms)
        } else {
            Duration::from_millis(self.config.nominal_delay_ms)
        }
    }

    /// Snapshot of a venue's controller state, for the metrics rollup.
    #[must_use]
    pub fn venue_state(&self, venue: &str) -> Option<VenueBatchState> {
        self.venues.get(venue).map(|s| s.clone())
    }

    /// Write the whole controller map. Failures are logged, never fatal:
    /// the in-memory copy remains authoritative.
    fn persist(&self) {
        let Some(path) = &self.path else { return };

        let map: BTreeMap<String, VenueBatchState> = self
            .venues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let payload = match serde_json::to_string_pretty(&map) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize adaptive batch state");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, payload) {
            warn!(path = %path.display(), error = %e, "Failed to persist adaptive batch state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig::default()
    }

    #[test]
    fn test_initial_size() {
        let batcher = AdaptiveBatcher::in_memory(config());
        assert_eq!(batcher.batch_size("v"), 50);
    }

    #[test]
    fn test_rate_limit_shrinks() {
        let batcher = AdaptiveBatcher::in_memory(config());
        batcher.on_rate_limit("v");
        assert_eq!(batcher.batch_size("v"), 25);
        batcher.on_rate_limit("v");
        assert_eq!(batcher.batch_size("v"), 12);
    }

    #[test]
    fn test_shrink_floors_at_min() {
        let batcher = AdaptiveBatcher::in_memory(config());
        for _ in 0..10 {
            batcher.on_rate_limit("v");
        }
        assert_eq!(batcher.batch_size("v"), 10);
    }

    #[test]
    fn test_success_streak_grows() {
        let batcher = AdaptiveBatcher::in_memory(config());
        for _ in 0..4 {
            batcher.on_success("v");
        }
        // Threshold is 5; not yet.
        assert_eq!(batcher.batch_size("v"), 50);
        batcher.on_success("v");
        assert_eq!(batcher.batch_size("v"), 75);
    }

    #[test]
    fn test_growth_caps_at_max() {
        let batcher = AdaptiveBatcher::in_memory(config());
        for _ in 0..100 {
            batcher.on_success("v");
        }
        assert_eq!(batcher.batch_size("v"), 200);
    }

    #[test]
    fn test_rate_limit_resets_success_streak() {
        let batcher = AdaptiveBatcher::in_memory(config());
        for _ in 0..4 {
            batcher.on_success("v");
        }
        batcher.on_rate_limit("v");
        for _ in 0..4 {
            batcher.on_success("v");
        }
        // Streak restarted after the 429; size still the shrunk one.
        assert_eq!(batcher.batch_size("v"), 25);
    }

    #[test]
    fn test_size_always_in_bounds() {
        let batcher = AdaptiveBatcher::in_memory(config());
        for i in 0..50 {
            if i % 3 == 0 {
                batcher.on_rate_limit("v");
            } else {
                batcher.on_success("v");
            }
            let size = batcher.batch_size("v");
            assert!((10..=200).contains(&size), "size {size} out of bounds");
        }
    }

    #[test]
    fn test_recommended_delay_conservative_after_429() {
        let batcher = AdaptiveBatcher::in_memory(config());
        assert_eq!(batcher.recommended_delay("v"), Duration::from_millis(1_000));
        batcher.on_rate_limit("v");
        assert_eq!(batcher.recommended_delay("v"), Duration::from_millis(10_000));
    }

    #[test]
    fn test_venues_are_independent() {
        let batcher = AdaptiveBatcher::in_memory(config());
        batcher.on_rate_limit("a");
        assert_eq!(batcher.batch_size("a"), 25);
        assert_eq!(batcher.batch_size("b"), 50);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("adaptive-batch.json");

        {
            let batcher = AdaptiveBatcher::load(path.clone(), config());
            batcher.on_rate_limit("v");
            assert_eq!(batcher.batch_size("v"), 25);
        }

        let restored = AdaptiveBatcher::load(path, config());
        assert_eq!(restored.batch_size("v"), 25);
        let state = restored.venue_state("v").unwrap();
        assert_eq!(state.total_rate_limits, 1);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("adaptive-batch.json");
        std::fs::write(&path, "{not json").unwrap();

        let batcher = AdaptiveBatcher::load(path, config());
        assert_eq!(batcher.batch_size("v"), 50);
    }

    #[test]
    fn test_loaded_size_reclamped_to_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("adaptive-batch.json");
        std::fs::write(
            &path,
            r#"{"v": {"current_batch_size": 500, "success_streak": 0, "failure_streak": 0,
                "last_rate_limit_at_ms": 0, "total_successes": 0, "total_rate_limits": 0}}"#,
        )
        .unwrap();

        let batcher = AdaptiveBatcher::load(path, config());
        assert_eq!(batcher.batch_size("v"), 200);
    }
}
