// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-store sync pipeline.
//!
//! One [`SyncEngine::run`] is: fetch the source-of-truth snapshot, fold it
//! into a SKU view, diff against persisted state, push the changes in two
//! ordered phases, persist the new state.
//!
//! Two guard rails are load-bearing: an empty inventory snapshot or a
//! short details response aborts the run with NO marketplace writes and NO
//! state change. Both degradations would otherwise mass-disable a live
//! catalog.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_sync::{SyncConfig, SyncEngine, RunMode};
//! use catalog_sync::adapters::http::{HttpMarketplace, HttpSot};
//!
//! # async fn example(store: catalog_sync::Store) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(SyncConfig::default());
//! let sot = Arc::new(HttpSot::new("https://erp.example", "user", "pass")?);
//! let marketplace = Arc::new(HttpMarketplace::new("https://marketplace.example")?);
//! let engine = SyncEngine::new(config, sot, marketplace);
//!
//! let report = engine.run(&store, RunMode::Delta).await?;
//! println!("pushed {} item updates", report.item_updates);
//! # Ok(())
//! # }
//! ```

pub mod diff;
pub(crate) mod push;
mod types;

pub use push::{BatchStrategy, PushStats};
pub use types::{RunMode, RunReport, SyncError};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::adapters::{AdapterError, Marketplace, SourceOfTruth};
use crate::batching::adaptive::AdaptiveBatcher;
use crate::config::SyncConfig;
use crate::engine::diff::{build_plan, build_sku_view};
use crate::engine::push::ConfirmedBatch;
use crate::model::{now_millis, CheckpointRecord, SkuView, StateEntry, Store};
use crate::rate::RateGovernor;
use crate::resilience::circuit_breaker::{CircuitError, DependencyCircuits};
use crate::state::StateStore;

/// The per-store sync pipeline and the services it threads through.
///
/// One engine serves all stores; per-store serialization is the
/// scheduler's job, per-venue request serialization is the governor's.
pub struct SyncEngine {
    pub(crate) config: Arc<SyncConfig>,
    pub(crate) sot: Arc<dyn SourceOfTruth>,
    pub(crate) marketplace: Arc<dyn Marketplace>,
    pub(crate) state_store: Arc<StateStore>,
    pub(crate) governor: Arc<RateGovernor>,
    pub(crate) batcher: Arc<AdaptiveBatcher>,
    pub(crate) circuits: Arc<DependencyCircuits>,
}

impl SyncEngine {
    /// Build an engine and its process-scoped services. Rate and batch
    /// state is loaded from the state directory so a fresh process starts
    /// with warm knowledge of every venue's tolerance.
    pub fn new(
        config: Arc<SyncConfig>,
        sot: Arc<dyn SourceOfTruth>,
        marketplace: Arc<dyn Marketplace>,
    ) -> Self {
        let state_store = Arc::new(StateStore::new(&config.state_dir, config.write_mode));
        let governor = Arc::new(RateGovernor::load(
            config.state_dir.join("rate-limits.json"),
            config.rate.clone(),
        ));
        let batcher = Arc::new(AdaptiveBatcher::load(
            config.state_dir.join("adaptive-batch.json"),
            config.adaptive.clone(),
        ));
        Self {
            config,
            sot,
            marketplace,
            state_store,
            governor,
            batcher,
            circuits: Arc::new(DependencyCircuits::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.config
    }

    #[must_use]
    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state_store
    }

    /// Breaker pair, exposed for the operator surface.
    #[must_use]
    pub fn circuits(&self) -> &Arc<DependencyCircuits> {
        &self.circuits
    }

    #[must_use]
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    #[must_use]
    pub fn batcher(&self) -> &Arc<AdaptiveBatcher> {
        &self.batcher
    }

    /// Execute one run for one store.
    #[tracing::instrument(skip(self, store), fields(store_id = store.id, mode = %mode))]
    pub async fn run(&self, store: &Store, mode: RunMode) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let result = self.run_inner(store, mode).await;

        match &result {
            Ok(report) => {
                crate::metrics::record_run(store.id, "success");
                info!(
                    mode = %report.mode,
                    skus = report.sku_count,
                    items = report.item_updates,
                    inventory = report.inventory_updates,
                    "Run complete"
                );
            }
            Err(e) => {
                crate::metrics::record_run(store.id, "error");
                warn!(dependency = e.dependency(), error = %e, "Run failed");
            }
        }
        crate::metrics::record_run_duration(store.id, started.elapsed());
        result
    }

    async fn run_inner(&self, store: &Store, mode: RunMode) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let previous = self.state_store.load(store.id);

        let bootstrap = matches!(mode, RunMode::Bootstrap);
        let limit = match mode {
            RunMode::Limited(n) => Some(n),
            _ => None,
        };
        let upgraded_to_full =
            previous.is_empty() && !bootstrap && !matches!(mode, RunMode::ForceFull);
        if upgraded_to_full {
            info!(store_id = store.id, "No prior state; upgrading to force-full");
        }
        let force_full = matches!(mode, RunMode::ForceFull) || (previous.is_empty() && !bootstrap);

        let view = self.fetch_view(store).await?;
        let plan = build_plan(&view, &previous, force_full, now_millis());

        let effective_mode = if bootstrap {
            RunMode::Bootstrap
        } else if let Some(n) = limit {
            RunMode::Limited(n)
        } else if force_full {
            RunMode::ForceFull
        } else {
            RunMode::Delta
        };

        if bootstrap {
            self.state_store.save(store.id, &plan.new_state);
            info!(
                store_id = store.id,
                skus = plan.new_state.len(),
                "Bootstrap complete, state written without marketplace calls"
            );
            return Ok(RunReport {
                store_id: store.id,
                mode: RunMode::Bootstrap,
                upgraded_to_full: false,
                sku_count: view.len(),
                item_updates: 0,
                inventory_updates: 0,
                item_batches: 0,
                inventory_batches: 0,
                invalid_price_count: plan.invalid_price_count,
                missing_disabled_count: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                state_persisted: true,
            });
        }

        let mut items = plan.items;
        let mut inventory = plan.inventory;
        if let Some(n) = limit {
            items.truncate(n);
            inventory.truncate(n);
        }
        let new_state = plan.new_state;

        let strategy = if force_full {
            BatchStrategy::Fixed {
                batch_size: self.config.first_sync.batch_size,
                delay_ms: self.config.first_sync.batch_delay_ms,
            }
        } else {
            BatchStrategy::Fixed {
                batch_size: self.config.delta.batch_size,
                delay_ms: self.config.delta.batch_delay_ms,
            }
        };
        let batch_size = match strategy {
            BatchStrategy::Fixed { batch_size, .. } => {
                batch_size.min(self.config.adaptive.max_batch_size).max(1)
            }
            BatchStrategy::Adaptive => self.config.adaptive.max_batch_size.max(1),
        };
        let total_batches = items.len().div_ceil(batch_size) + inventory.len().div_ceil(batch_size);

        // Confirmed SKUs advance a working copy persisted per batch: a
        // mid-run crash re-diffs only the unconfirmed remainder.
        let mut working = previous.clone();
        let mut completed_batches = 0usize;

        let stats = self
            .push_two_phase(store, &items, &inventory, strategy, None, |batch| {
                completed_batches += 1;
                match batch {
                    ConfirmedBatch::Items(chunk) => {
                        for update in chunk {
                            if let Some(new) = new_state.get(&update.sku) {
                                let quantity = working
                                    .get(&update.sku)
                                    .map(|e| e.quantity)
                                    .unwrap_or(0);
                                working.insert(
                                    update.sku.clone(),
                                    StateEntry { quantity, ..new.clone() },
                                );
                            }
                        }
                    }
                    ConfirmedBatch::Inventory(chunk) => {
                        for update in chunk {
                            if let Some(new) = new_state.get(&update.sku) {
                                let mut entry =
                                    working.get(&update.sku).cloned().unwrap_or_else(|| new.clone());
                                entry.quantity = new.quantity;
                                working.insert(update.sku.clone(), entry);
                            }
                        }
                    }
                }
                self.state_store.save_checkpoint(
                    store.id,
                    &CheckpointRecord {
                        completed: completed_batches,
                        total: total_batches,
                        updated_at: now_millis(),
                    },
                );
                if limit.is_none() {
                    self.state_store.save(store.id, &working);
                }
            })
            .await?;

        if limit.is_none() {
            self.state_store.save(store.id, &new_state);
            self.state_store.clear_checkpoint(store.id);
        } else {
            info!(
                store_id = store.id,
                limit = limit.unwrap_or(0),
                "Limited run: final state intentionally not persisted"
            );
        }

        crate::metrics::record_pushed(store.id, "items", stats.items_pushed);
        crate::metrics::record_pushed(store.id, "inventory", stats.inventory_pushed);

        Ok(RunReport {
            store_id: store.id,
            mode: effective_mode,
            upgraded_to_full,
            sku_count: view.len(),
            item_updates: items.len(),
            inventory_updates: inventory.len(),
            item_batches: stats.item_batches,
            inventory_batches: stats.inventory_batches,
            invalid_price_count: plan.invalid_price_count,
            missing_disabled_count: plan.missing_disabled_count,
            duration_ms: started.elapsed().as_millis() as u64,
            state_persisted: limit.is_none(),
        })
    }

    /// Fetch inventory + details from the source of truth and fold them
    /// into the SKU view, enforcing the partial-data guard rails.
    pub(crate) async fn fetch_view(&self, store: &Store) -> Result<SkuView, SyncError> {
        let inventory = self
            .circuits
            .sot
            .call(|| self.sot.inventory(store.id))
            .await
            .map_err(sot_err)?;

        if inventory.is_empty() {
            warn!(store_id = store.id, "Empty inventory from source of truth, aborting");
            return Err(SyncError::EmptyInventory(store.id));
        }

        let mut ids: Vec<i64> = Vec::with_capacity(inventory.len());
        let mut seen = HashSet::new();
        for record in &inventory {
            if seen.insert(record.id) {
                ids.push(record.id);
            }
        }

        let mut details = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.sot_chunk_size.max(1)) {
            let batch = self
                .circuits
                .sot
                .call(|| self.sot.products(chunk))
                .await
                .map_err(sot_err)?;
            details.extend(batch);
        }

        if details.len() < ids.len() {
            warn!(
                store_id = store.id,
                requested = ids.len(),
                received = details.len(),
                "Short details response from source of truth, aborting"
            );
            return Err(SyncError::ShortDetails { requested: ids.len(), received: details.len() });
        }

        Ok(build_sku_view(&inventory, &details, &self.config.sku_field))
    }
}

fn sot_err(e: CircuitError<AdapterError>) -> SyncError {
    match e {
        CircuitError::Rejected => SyncError::CircuitOpen("sot"),
        CircuitError::Inner(e) => SyncError::Sot(e),
    }
}
