// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use thiserror::Error;

use crate::adapters::AdapterError;

/// How a run is asked to behave.
///
/// `Delta` is the scheduled default; an empty state upgrades it to a full
/// push internally. `Limited` caps both push arrays and never finalizes
/// state — it exists for staged testing against live venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Write state from the source-of-truth view; no marketplace calls.
    Bootstrap,
    /// Send every SKU as if new.
    ForceFull,
    /// Send only changes against persisted state.
    Delta,
    /// Delta capped at N updates per phase; state is not finalized.
    Limited(usize),
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::ForceFull => write!(f, "force-full"),
            Self::Delta => write!(f, "delta"),
            Self::Limited(n) => write!(f, "limited({n})"),
        }
    }
}

/// Summary of one engine run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub store_id: u32,
    /// The mode the run actually executed (after any force-full upgrade).
    pub mode: RunMode,
    /// Whether an empty state upgraded the requested mode to force-full.
    pub upgraded_to_full: bool,
    /// SKUs in the source-of-truth view.
    pub sku_count: usize,
    pub item_updates: usize,
    pub inventory_updates: usize,
    pub item_batches: usize,
    pub inventory_batches: usize,
    /// SKUs emitted force-zeroed because their price was invalid.
    pub invalid_price_count: usize,
    /// SKUs disabled because they disappeared from the source view.
    pub missing_disabled_count: usize,
    pub duration_ms: u64,
    /// False for limited runs, which by contract leave state untouched.
    pub state_persisted: bool,
}

/// Why a run failed, attributed to the offending dependency.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The source returned zero inventory lines. Operating on this would
    /// disable the entire catalog, so the run aborts instead.
    #[error("source of truth returned empty inventory for store {0}; aborting run")]
    EmptyInventory(u32),

    /// Fewer product details than requested ids. A partial view would
    /// mass-disable valid SKUs, so the run aborts instead.
    #[error("source of truth returned {received} details for {requested} ids; aborting run")]
    ShortDetails { requested: usize, received: usize },

    #[error("source of truth error: {0}")]
    Sot(#[source] AdapterError),

    #[error("marketplace error: {0}")]
    Marketplace(#[source] AdapterError),

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(&'static str),
}

impl SyncError {
    /// Which dependency this error is attributed to, for metrics.
    #[must_use]
    pub fn dependency(&self) -> &'static str {
        match self {
            Self::EmptyInventory(_) | Self::ShortDetails { .. } | Self::Sot(_) => "sot",
            Self::Marketplace(_) => "marketplace",
            Self::CircuitOpen(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(RunMode::Delta.to_string(), "delta");
        assert_eq!(RunMode::ForceFull.to_string(), "force-full");
        assert_eq!(RunMode::Limited(50).to_string(), "limited(50)");
    }

    #[test]
    fn test_error_attribution() {
        assert_eq!(SyncError::EmptyInventory(1).dependency(), "sot");
        assert_eq!(
            SyncError::ShortDetails { requested: 10, received: 3 }.dependency(),
            "sot"
        );
        assert_eq!(
            SyncError::Marketplace(AdapterError::Network("x".into())).dependency(),
            "marketplace"
        );
        assert_eq!(SyncError::CircuitOpen("marketplace").dependency(), "marketplace");
    }
}
