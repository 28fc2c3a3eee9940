// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background completion worker.
//!
//! Not a second sync: complementary to the scheduled delta runs. Drains
//! SKUs the marketplace has not yet acknowledged, a bounded number per
//! iteration, without blocking the delta cadence. Started once per store
//! by the hybrid orchestrator.
//!
//! Stops cooperatively: the cancellation token is observed between
//! iterations, between phases and between batches; the in-flight batch
//! always completes before exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::diff::normalize_for_push;
use crate::engine::push::ConfirmedBatch;
use crate::engine::{BatchStrategy, SyncEngine, SyncError};
use crate::model::{now_millis, InventoryUpdate, ItemUpdate, StateEntry, Store, WorkerProgress};

/// Counters for one worker iteration.
#[derive(Debug, Clone)]
pub struct WorkerIterationStats {
    /// SKUs still lacking marketplace acknowledgment.
    pub unsynced: usize,
    /// Candidates taken this iteration (bounded by the daily limit).
    pub candidates: usize,
    /// Candidates acknowledged and marked synced.
    pub marked_synced: usize,
    /// False when a cooperative stop interrupted the push.
    pub completed: bool,
}

/// Long-running per-store drain task.
pub struct BackgroundWorker {
    engine: Arc<SyncEngine>,
    store: Store,
    cancel: CancellationToken,
    started_at: i64,
}

impl BackgroundWorker {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, store: Store, cancel: CancellationToken) -> Self {
        Self { engine, store, cancel, started_at: now_millis() }
    }

    /// The worker loop: initial delay, then one drain iteration per
    /// `batch_interval`, forever, until cancelled.
    pub async fn run(self) {
        let config = &self.engine.config().worker;
        info!(
            store_id = self.store.id,
            initial_delay_secs = config.initial_delay_secs,
            "Background worker started"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!(store_id = self.store.id, "Background worker stopped before first iteration");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(config.initial_delay_secs)) => {}
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(stats) if stats.candidates == 0 => {
                    debug!(store_id = self.store.id, "All SKUs acknowledged, nothing to drain");
                }
                Ok(stats) => {
                    info!(
                        store_id = self.store.id,
                        marked_synced = stats.marked_synced,
                        remaining = stats.unsynced.saturating_sub(stats.marked_synced),
                        "Worker iteration complete"
                    );
                }
                Err(e) => {
                    error!(store_id = self.store.id, error = %e, "Worker iteration failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(config.batch_interval_secs)) => {}
            }
        }
        info!(store_id = self.store.id, "Background worker stopped");
    }

    /// One drain iteration. Public so staged tests and the manual trigger
    /// can run a single pass without the loop's day-long sleeps.
    pub async fn run_once(&self) -> Result<WorkerIterationStats, SyncError> {
        let state = self.engine.state_store().load(self.store.id);
        let view = self.engine.fetch_view(&self.store).await?;
        let daily_limit = self.engine.config().worker.daily_limit;

        let unsynced: Vec<&String> = view
            .keys()
            .filter(|sku| {
                state
                    .get(*sku)
                    .map(|entry| !entry.synced_to_marketplace)
                    .unwrap_or(true)
            })
            .collect();
        let unsynced_count = unsynced.len();

        let mut items = Vec::new();
        let mut inventory = Vec::new();
        let mut staged: HashMap<String, StateEntry> = HashMap::new();
        let now = now_millis();

        for sku in unsynced.into_iter().take(daily_limit) {
            let n = normalize_for_push(sku, &view[sku]);
            items.push(ItemUpdate::new(sku.clone(), Some(n.enabled), Some(n.price)));
            inventory.push(InventoryUpdate { sku: sku.clone(), inventory: n.quantity });
            staged.insert(
                sku.clone(),
                StateEntry {
                    quantity: n.quantity,
                    enabled: n.enabled,
                    price: n.price,
                    last_seen: now,
                    synced_to_marketplace: true,
                },
            );
        }
        let candidates = items.len();
        if candidates == 0 {
            self.write_progress(&state, view.len());
            return Ok(WorkerIterationStats {
                unsynced: 0,
                candidates: 0,
                marked_synced: 0,
                completed: true,
            });
        }

        let mut working = state;
        let mut marked_synced = 0usize;
        let stats = self
            .engine
            .push_two_phase(
                &self.store,
                &items,
                &inventory,
                BatchStrategy::Adaptive,
                Some(&self.cancel),
                |batch| {
                    // A phase-2 ack is the full acknowledgment: items for
                    // these SKUs already landed in phase 1.
                    if let ConfirmedBatch::Inventory(chunk) = batch {
                        for update in chunk {
                            if let Some(entry) = staged.get(&update.sku) {
                                working.insert(update.sku.clone(), entry.clone());
                                marked_synced += 1;
                            }
                        }
                    }
                },
            )
            .await?;

        self.engine.state_store().save(self.store.id, &working);
        self.write_progress(&working, view.len());

        Ok(WorkerIterationStats {
            unsynced: unsynced_count,
            candidates,
            marked_synced,
            completed: stats.completed,
        })
    }

    fn write_progress(&self, state: &crate::model::StateMap, total_items: usize) {
        let daily_limit = self.engine.config().worker.daily_limit.max(1);
        let synced_items = state.values().filter(|e| e.synced_to_marketplace).count();
        let remaining_items = total_items.saturating_sub(synced_items.min(total_items));
        let percent_complete = if total_items == 0 {
            100.0
        } else {
            synced_items.min(total_items) as f64 / total_items as f64 * 100.0
        };

        let started_at = self
            .engine
            .state_store()
            .load_progress(self.store.id)
            .map(|p| p.started_at)
            .unwrap_or(self.started_at);

        let progress = WorkerProgress {
            total_items,
            synced_items,
            remaining_items,
            percent_complete,
            estimated_days_remaining: (remaining_items as f64 / daily_limit as f64).ceil(),
            last_sync_at: now_millis(),
            started_at,
        };
        self.engine.state_store().save_progress(self.store.id, &progress);
        crate::metrics::set_worker_remaining(self.store.id, remaining_items);
    }
}
