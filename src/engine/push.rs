// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The two-phase batched push.
//!
//! Phase 1 (item metadata) strictly precedes phase 2 (inventory) so an item
//! newly enabled never shows stale inventory. Per batch the resilience
//! chain is, outermost first: rate gate, circuit breaker, retried HTTP
//! call. Gating outermost means the breaker never trips because we
//! hammered a venue that was telling us to slow down.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapters::AdapterError;
use crate::engine::types::SyncError;
use crate::engine::SyncEngine;
use crate::model::{InventoryUpdate, ItemUpdate, Store};
use crate::resilience::circuit_breaker::CircuitError;
use crate::resilience::retry::{retry_with_policy, RetryPolicy};

/// How batches are sized and spaced.
#[derive(Debug, Clone, Copy)]
pub enum BatchStrategy {
    /// Fixed size and delay (first-sync and delta tunings).
    Fixed { batch_size: usize, delay_ms: u64 },
    /// Size and delay from the adaptive controller (hybrid/worker path).
    Adaptive,
}

/// One phase's wire payload.
#[derive(Clone, Copy)]
enum BatchPayload<'a> {
    Items(&'a [ItemUpdate]),
    Inventory(&'a [InventoryUpdate]),
}

impl BatchPayload<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Items(_) => "marketplace items batch",
            Self::Inventory(_) => "marketplace inventory batch",
        }
    }
}

/// A chunk the marketplace has acknowledged, handed to the confirm hook.
pub(crate) enum ConfirmedBatch<'a> {
    Items(&'a [ItemUpdate]),
    Inventory(&'a [InventoryUpdate]),
}

/// Counters for one two-phase push.
#[derive(Debug, Default, Clone)]
pub struct PushStats {
    pub item_batches: usize,
    pub inventory_batches: usize,
    pub items_pushed: usize,
    pub inventory_pushed: usize,
    /// False when a cooperative stop ended the push between batches.
    pub completed: bool,
}

impl SyncEngine {
    /// Push both phases in order, confirming each acknowledged batch via
    /// `confirm`. A cancellation token is observed between batches and
    /// between phases; the in-flight batch always completes.
    pub(crate) async fn push_two_phase(
        &self,
        store: &Store,
        items: &[ItemUpdate],
        inventory: &[InventoryUpdate],
        strategy: BatchStrategy,
        cancel: Option<&CancellationToken>,
        mut confirm: impl FnMut(ConfirmedBatch<'_>),
    ) -> Result<PushStats, SyncError> {
        let venue_key = store.venue_key(&self.config.marketplace_base_url);
        let mut stats = PushStats { completed: true, ..Default::default() };

        // Phase 1: items.
        let mut offset = 0;
        let mut first = true;
        while offset < items.len() {
            if cancelled(cancel) {
                stats.completed = false;
                return Ok(stats);
            }
            if !first {
                tokio::time::sleep(self.batch_delay(&venue_key, strategy)).await;
            }
            first = false;

            let end = (offset + self.batch_size(&venue_key, strategy)).min(items.len());
            let chunk = &items[offset..end];
            self.send_batch(store, &venue_key, BatchPayload::Items(chunk)).await?;
            stats.item_batches += 1;
            stats.items_pushed += chunk.len();
            confirm(ConfirmedBatch::Items(chunk));
            offset = end;
        }

        if !items.is_empty() && !inventory.is_empty() {
            if cancelled(cancel) {
                stats.completed = false;
                return Ok(stats);
            }
            tokio::time::sleep(Duration::from_millis(self.config.phase_pause_ms)).await;
        }

        // Phase 2: inventory.
        let mut offset = 0;
        let mut first = true;
        while offset < inventory.len() {
            if cancelled(cancel) {
                stats.completed = false;
                return Ok(stats);
            }
            if !first {
                tokio::time::sleep(self.batch_delay(&venue_key, strategy)).await;
            }
            first = false;

            let end = (offset + self.batch_size(&venue_key, strategy)).min(inventory.len());
            let chunk = &inventory[offset..end];
            self.send_batch(store, &venue_key, BatchPayload::Inventory(chunk)).await?;
            stats.inventory_batches += 1;
            stats.inventory_pushed += chunk.len();
            confirm(ConfirmedBatch::Inventory(chunk));
            offset = end;
        }

        debug!(
            store_id = store.id,
            item_batches = stats.item_batches,
            inventory_batches = stats.inventory_batches,
            "Two-phase push complete"
        );
        Ok(stats)
    }

    fn batch_size(&self, venue_key: &str, strategy: BatchStrategy) -> usize {
        let size = match strategy {
            BatchStrategy::Fixed { batch_size, .. } => batch_size,
            BatchStrategy::Adaptive => self.batcher.batch_size(venue_key),
        };
        // The marketplace rejects payloads above the ceiling outright.
        size.min(self.config.adaptive.max_batch_size).max(1)
    }

    fn batch_delay(&self, venue_key: &str, strategy: BatchStrategy) -> Duration {
        match strategy {
            BatchStrategy::Fixed { delay_ms, .. } => Duration::from_millis(delay_ms),
            BatchStrategy::Adaptive => self.batcher.recommended_delay(venue_key),
        }
    }

    /// Send one batch through gate -> breaker -> retried call, then feed
    /// every observed 429 into the governor and the batch controller.
    async fn send_batch(
        &self,
        store: &Store,
        venue_key: &str,
        payload: BatchPayload<'_>,
    ) -> Result<(), SyncError> {
        self.governor.wait_for_turn(venue_key).await;

        // The retry hook is synchronous; 429s are collected here and
        // replayed into the async governor once the call settles.
        let rate_limits: Mutex<Vec<Option<Duration>>> = Mutex::new(Vec::new());
        let retry_policy = RetryPolicy::marketplace();

        let result = self
            .circuits
            .marketplace
            .call(|| {
                retry_with_policy(
                    payload.name(),
                    &retry_policy,
                    |err: &AdapterError| {
                        if let AdapterError::RateLimited { retry_after } = err {
                            rate_limits.lock().push(*retry_after);
                        }
                    },
                    || async move {
                        match payload {
                            BatchPayload::Items(chunk) => {
                                self.marketplace.update_items(store, chunk).await
                            }
                            BatchPayload::Inventory(chunk) => {
                                self.marketplace.update_inventory(store, chunk).await
                            }
                        }
                    },
                )
            })
            .await;

        // A 429 that exhausted the retrier still teaches the governor.
        if let Err(CircuitError::Inner(AdapterError::RateLimited { retry_after })) = &result {
            rate_limits.lock().push(*retry_after);
        }

        let observed: Vec<Option<Duration>> = std::mem::take(&mut *rate_limits.lock());
        for retry_after in observed {
            self.governor.on_rate_limited(venue_key, retry_after).await;
            self.batcher.on_rate_limit(venue_key);
        }

        match result {
            Ok(()) => {
                self.governor.on_success(venue_key).await;
                self.batcher.on_success(venue_key);
                Ok(())
            }
            Err(CircuitError::Rejected) => {
                info!(venue = venue_key, "Marketplace circuit open, failing batch fast");
                Err(SyncError::CircuitOpen("marketplace"))
            }
            Err(CircuitError::Inner(e)) => Err(SyncError::Marketplace(e)),
        }
    }
}

fn cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|token| token.is_cancelled())
}
