//! Configuration for the catalog synchronizer.
//!
//! # Example
//!
//! ```
//! use catalog_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.sku_field, "usr_column_514");
//! assert_eq!(config.adaptive.max_batch_size, 200);
//!
//! // Full config
//! let config = SyncConfig {
//!     marketplace_base_url: "https://marketplace.example".into(),
//!     sync_interval_minutes: 30,
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;

use serde::Deserialize;

/// How state files are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Write to a temp sibling then rename-replace (crash-atomic).
    Atomic,
    /// Write the primary file in place. For hosts where rename is
    /// unreliable (some network mounts). Not the default.
    Direct,
}

/// Top-level configuration.
///
/// All fields have defaults matching steady production use. At minimum,
/// configure `sot_base_url` and `marketplace_base_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Source-of-truth API base URL.
    #[serde(default)]
    pub sot_base_url: String,

    /// Marketplace API base URL (overridable per store).
    #[serde(default)]
    pub marketplace_base_url: String,

    /// Directory holding all persisted state files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Extension field on product details carrying the marketplace SKU.
    #[serde(default = "default_sku_field")]
    pub sku_field: String,

    /// Max product ids per source-of-truth detail call.
    #[serde(default = "default_sot_chunk_size")]
    pub sot_chunk_size: usize,

    /// Minutes between scheduled sweeps.
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,

    /// Pause between the item phase and the inventory phase of a push.
    #[serde(default = "default_phase_pause_ms")]
    pub phase_pause_ms: u64,

    #[serde(default = "default_write_mode")]
    pub write_mode: WriteMode,

    /// Batch tuning for first syncs / force-full runs (cold rate caches).
    #[serde(default = "BatchTuning::first_sync")]
    pub first_sync: BatchTuning,

    /// Batch tuning for steady-state delta runs.
    #[serde(default = "BatchTuning::delta")]
    pub delta: BatchTuning,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    #[serde(default)]
    pub priority: PriorityConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl SyncConfig {
    /// Sanity-check the tunables that can silently wedge the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.adaptive.min_batch_size == 0 {
            return Err("adaptive.min_batch_size must be at least 1".into());
        }
        if self.adaptive.min_batch_size > self.adaptive.max_batch_size {
            return Err("adaptive.min_batch_size exceeds adaptive.max_batch_size".into());
        }
        if self.adaptive.increase_rate <= 1.0 {
            return Err("adaptive.increase_rate must be greater than 1".into());
        }
        if self.adaptive.decrease_rate <= 0.0 || self.adaptive.decrease_rate >= 1.0 {
            return Err("adaptive.decrease_rate must be between 0 and 1".into());
        }
        if self.sync_interval_minutes == 0 {
            return Err("sync_interval_minutes must be at least 1".into());
        }
        if self.sot_chunk_size == 0 {
            return Err("sot_chunk_size must be at least 1".into());
        }
        if self.sku_field.is_empty() {
            return Err("sku_field must not be empty".into());
        }
        Ok(())
    }
}

/// Fixed batch size + inter-batch delay pair for the non-adaptive paths.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchTuning {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl BatchTuning {
    /// Conservative: small batches, long delays. Large initial batches were
    /// observed to draw terminal 400s from the marketplace.
    #[must_use]
    pub fn first_sync() -> Self {
        Self { batch_size: 20, batch_delay_ms: 5_000 }
    }

    /// Steady state: the rate caches are warm, deltas are small.
    #[must_use]
    pub fn delta() -> Self {
        Self { batch_size: 100, batch_delay_ms: 500 }
    }
}

/// Rate governor tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    /// Configured minimum interval between requests to one venue.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Safety margin added on top of `Retry-After`.
    #[serde(default = "default_rate_buffer_ms")]
    pub buffer_ms: u64,
    /// Upper bound of the random jitter added on top of `Retry-After`.
    #[serde(default = "default_rate_jitter_ms")]
    pub jitter_ms: u64,
    /// Learn longer minimum intervals from `Retry-After` responses.
    #[serde(default = "default_true")]
    pub learning_enabled: bool,
    /// Cap on the learned minimum interval.
    #[serde(default = "default_learned_cap_ms")]
    pub learned_cap_ms: u64,
    /// Also push the gate forward after successful requests.
    #[serde(default)]
    pub enforce_after_success: bool,
}

/// Adaptive batcher tunables.
///
/// The marketplace hard-caps payloads at 200 items per batch; `max_batch_size`
/// must never exceed that.
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Consecutive successes required before growing the batch size.
    #[serde(default = "default_increase_threshold")]
    pub increase_threshold: u32,
    #[serde(default = "default_increase_rate")]
    pub increase_rate: f64,
    #[serde(default = "default_decrease_rate")]
    pub decrease_rate: f64,
    /// Inter-batch delay when no recent rate limiting was seen.
    #[serde(default = "default_nominal_delay_ms")]
    pub nominal_delay_ms: u64,
    /// Inter-batch delay within 5 minutes of a 429.
    #[serde(default = "default_conservative_delay_ms")]
    pub conservative_delay_ms: u64,
}

/// Priority scorer weights and thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_in_stock_weight")]
    pub in_stock_weight: u32,
    #[serde(default = "default_high_stock_weight")]
    pub high_stock_weight: u32,
    #[serde(default = "default_high_stock_threshold")]
    pub high_stock_threshold: u32,
    #[serde(default = "default_low_stock_weight")]
    pub low_stock_weight: u32,
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u32,
    #[serde(default = "default_high_value_weight")]
    pub high_value_weight: u32,
    #[serde(default = "default_high_value_threshold")]
    pub high_value_threshold: f64,
    /// How many top-scored SKUs the priority phase pushes.
    #[serde(default = "default_priority_top_n")]
    pub top_n: usize,
}

/// Background completion worker tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Delay before the first iteration, letting priority sync settle.
    #[serde(default = "default_worker_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// SKUs drained per iteration.
    #[serde(default = "default_worker_daily_limit")]
    pub daily_limit: usize,
    /// Sleep between iterations.
    #[serde(default = "default_worker_batch_interval_secs")]
    pub batch_interval_secs: u64,
}

fn default_state_dir() -> PathBuf { PathBuf::from("state") }
fn default_sku_field() -> String { "usr_column_514".into() }
fn default_sot_chunk_size() -> usize { 1000 }
fn default_sync_interval_minutes() -> u64 { 15 }
fn default_phase_pause_ms() -> u64 { 2_000 }
fn default_write_mode() -> WriteMode { WriteMode::Atomic }
fn default_min_interval_ms() -> u64 { 1_000 }
fn default_rate_buffer_ms() -> u64 { 1_000 }
fn default_rate_jitter_ms() -> u64 { 500 }
fn default_true() -> bool { true }
fn default_learned_cap_ms() -> u64 { 15 * 60 * 1_000 }
fn default_initial_batch_size() -> usize { 50 }
fn default_min_batch_size() -> usize { 10 }
fn default_max_batch_size() -> usize { 200 }
fn default_increase_threshold() -> u32 { 5 }
fn default_increase_rate() -> f64 { 1.5 }
fn default_decrease_rate() -> f64 { 0.5 }
fn default_nominal_delay_ms() -> u64 { 1_000 }
fn default_conservative_delay_ms() -> u64 { 10_000 }
fn default_in_stock_weight() -> u32 { 100 }
fn default_high_stock_weight() -> u32 { 20 }
fn default_high_stock_threshold() -> u32 { 50 }
fn default_low_stock_weight() -> u32 { 10 }
fn default_low_stock_threshold() -> u32 { 5 }
fn default_high_value_weight() -> u32 { 15 }
fn default_high_value_threshold() -> f64 { 50.0 }
fn default_priority_top_n() -> usize { 500 }
fn default_worker_initial_delay_secs() -> u64 { 3_600 }
fn default_worker_daily_limit() -> usize { 500 }
fn default_worker_batch_interval_secs() -> u64 { 86_400 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sot_base_url: String::new(),
            marketplace_base_url: String::new(),
            state_dir: default_state_dir(),
            sku_field: default_sku_field(),
            sot_chunk_size: default_sot_chunk_size(),
            sync_interval_minutes: default_sync_interval_minutes(),
            phase_pause_ms: default_phase_pause_ms(),
            write_mode: default_write_mode(),
            first_sync: BatchTuning::first_sync(),
            delta: BatchTuning::delta(),
            rate: RateConfig::default(),
            adaptive: AdaptiveConfig::default(),
            priority: PriorityConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            buffer_ms: default_rate_buffer_ms(),
            jitter_ms: default_rate_jitter_ms(),
            learning_enabled: default_true(),
            learned_cap_ms: default_learned_cap_ms(),
            enforce_after_success: false,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: default_initial_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            increase_threshold: default_increase_threshold(),
            increase_rate: default_increase_rate(),
            decrease_rate: default_decrease_rate(),
            nominal_delay_ms: default_nominal_delay_ms(),
            conservative_delay_ms: default_conservative_delay_ms(),
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            in_stock_weight: default_in_stock_weight(),
            high_stock_weight: default_high_stock_weight(),
            high_stock_threshold: default_high_stock_threshold(),
            low_stock_weight: default_low_stock_weight(),
            low_stock_threshold: default_low_stock_threshold(),
            high_value_weight: default_high_value_weight(),
            high_value_threshold: default_high_value_threshold(),
            top_n: default_priority_top_n(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_worker_initial_delay_secs(),
            daily_limit: default_worker_daily_limit(),
            batch_interval_secs: default_worker_batch_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_conservative() {
        let config = SyncConfig::default();
        // First-sync batches must stay small on a cold rate cache.
        assert!(config.first_sync.batch_size <= 50);
        assert!(config.first_sync.batch_delay_ms >= config.delta.batch_delay_ms);
        // Marketplace payload ceiling.
        assert_eq!(config.adaptive.max_batch_size, 200);
        assert!(config.adaptive.initial_batch_size <= 50);
        assert!(config.adaptive.min_batch_size >= 1);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"marketplace_base_url": "https://m.example", "sync_interval_minutes": 30}"#,
        )
        .unwrap();
        assert_eq!(config.marketplace_base_url, "https://m.example");
        assert_eq!(config.sync_interval_minutes, 30);
        assert_eq!(config.sku_field, "usr_column_514");
        assert_eq!(config.write_mode, WriteMode::Atomic);
    }

    #[test]
    fn test_write_mode_lowercase() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"write_mode": "direct"}"#).unwrap();
        assert_eq!(config.write_mode, WriteMode::Direct);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = SyncConfig::default();
        config.adaptive.min_batch_size = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_rates() {
        let mut config = SyncConfig::default();
        config.adaptive.increase_rate = 1.0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.adaptive.decrease_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_sku_field() {
        let mut config = SyncConfig::default();
        config.sku_field = String::new();
        assert!(config.validate().is_err());
    }
}
