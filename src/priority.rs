// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Priority scoring for the initial push phase.
//!
//! Pure and deterministic: each (quantity, price) pair gets a non-negative
//! integer score. Score 0 means "not syncable in the priority phase" —
//! either out of stock or carrying an invalid price. The invalid-price rule
//! is the same one the engine applies when force-zeroing emissions.

use crate::config::PriorityConfig;
use crate::model::is_valid_price;

/// Why a SKU scored the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreReason {
    /// Price absent or not a finite non-negative number.
    InvalidPrice,
    OutOfStock,
    Scored,
}

/// A scored priority-phase candidate.
#[derive(Debug, Clone)]
pub struct ScoredSku {
    pub sku: String,
    pub quantity: u32,
    pub price: Option<f64>,
    pub score: u32,
    pub reason: ScoreReason,
}

/// Assigns priority scores from configured weights.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    config: PriorityConfig,
}

impl PriorityScorer {
    #[must_use]
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    /// Score one candidate. The invalid-price check comes first: an item
    /// that cannot be sold scores 0 no matter how much stock it has.
    #[must_use]
    pub fn score(&self, quantity: u32, price: Option<f64>) -> (u32, ScoreReason) {
        if !is_valid_price(price) {
            return (0, ScoreReason::InvalidPrice);
        }
        if quantity == 0 {
            return (0, ScoreReason::OutOfStock);
        }

        let mut score = self.config.in_stock_weight;
        if quantity >= self.config.high_stock_threshold {
            score += self.config.high_stock_weight;
        }
        if quantity <= self.config.low_stock_threshold {
            score += self.config.low_stock_weight;
        }
        if price.is_some_and(|p| p >= self.config.high_value_threshold) {
            score += self.config.high_value_weight;
        }
        (score, ScoreReason::Scored)
    }

    /// Score a candidate carrying its SKU, for collection into a ranking.
    #[must_use]
    pub fn score_sku(&self, sku: impl Into<String>, quantity: u32, price: Option<f64>) -> ScoredSku {
        let (score, reason) = self.score(quantity, price);
        ScoredSku { sku: sku.into(), quantity, price, score, reason }
    }
}

/// The highest-scored `limit` candidates, zero scores filtered out.
/// Ties keep their input order (stable sort).
#[must_use]
pub fn top_n(mut scored: Vec<ScoredSku>, limit: usize) -> Vec<ScoredSku> {
    scored.retain(|s| s.score > 0);
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(limit);
    scored
}
