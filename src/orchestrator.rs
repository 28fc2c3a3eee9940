// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! First-time initialization for a store with no prior state.
//!
//! A naive first sync pushes the whole catalog through a cold rate cache
//! and can take days. The hybrid path instead:
//!
//! 1. **Bootstrap** — write the source-of-truth view straight to state,
//!    no marketplace calls, so scheduled runs become deltas immediately.
//! 2. **Introspection** — best-effort listing of what the venue already
//!    has; matching SKUs are marked acknowledged.
//! 3. **Priority sync** — score every SKU, push the top N through the
//!    adaptive path so the items that sell are live within hours.
//! 4. **Background worker** — everything else drains at a bounded daily
//!    rate.
//!
//! A store that already has state is left alone.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::diff::normalize_for_push;
use crate::engine::push::ConfirmedBatch;
use crate::engine::{BatchStrategy, SyncEngine, SyncError};
use crate::model::{now_millis, InventoryUpdate, ItemUpdate, StateEntry, Store};
use crate::priority::{top_n, PriorityScorer};
use crate::worker::BackgroundWorker;

/// What the initialization did, for logs and the operator surface.
#[derive(Debug, Clone)]
pub struct HybridInitReport {
    /// False when the store already had state and nothing ran.
    pub initialized: bool,
    /// SKUs written during bootstrap.
    pub bootstrapped: usize,
    /// SKUs the venue already knew (introspection matches).
    pub already_on_marketplace: usize,
    /// SKUs pushed in the priority phase.
    pub priority_pushed: usize,
    pub worker_started: bool,
}

impl HybridInitReport {
    fn noop() -> Self {
        Self {
            initialized: false,
            bootstrapped: 0,
            already_on_marketplace: 0,
            priority_pushed: 0,
            worker_started: false,
        }
    }
}

/// Single-shot hybrid initializer.
pub struct HybridOrchestrator {
    engine: Arc<SyncEngine>,
    scorer: PriorityScorer,
}

impl HybridOrchestrator {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let scorer = PriorityScorer::new(engine.config().priority.clone());
        Self { engine, scorer }
    }

    /// Run the four-step initialization. `cancel` is handed to the spawned
    /// background worker; the initialization itself runs to completion.
    pub async fn initialize(
        &self,
        store: &Store,
        cancel: CancellationToken,
    ) -> Result<HybridInitReport, SyncError> {
        if self.engine.state_store().exists(store.id) {
            info!(store_id = store.id, "State exists, hybrid init is a no-op");
            return Ok(HybridInitReport::noop());
        }

        // Step 1: bootstrap.
        let view = self.engine.fetch_view(store).await?;
        let now = now_millis();
        let mut state: crate::model::StateMap = view
            .iter()
            .map(|(sku, sku_state)| {
                let n = normalize_for_push(sku, sku_state);
                (
                    sku.clone(),
                    StateEntry {
                        quantity: n.quantity,
                        enabled: n.enabled,
                        price: n.price,
                        last_seen: now,
                        synced_to_marketplace: false,
                    },
                )
            })
            .collect();
        self.engine.state_store().save(store.id, &state);
        let bootstrapped = state.len();
        info!(store_id = store.id, skus = bootstrapped, "Bootstrap state written");

        // Step 2: introspection (best-effort).
        let already_on_marketplace = match self.engine.marketplace.list_items(store).await {
            Ok(Some(existing)) => {
                let mut matched = 0;
                for sku in existing {
                    if let Some(entry) = state.get_mut(&sku) {
                        entry.synced_to_marketplace = true;
                        matched += 1;
                    }
                }
                if matched > 0 {
                    self.engine.state_store().save(store.id, &state);
                }
                info!(store_id = store.id, matched, "Marketplace listing matched existing SKUs");
                matched
            }
            Ok(None) => {
                info!(store_id = store.id, "Listing endpoint not supported, assuming empty venue");
                0
            }
            Err(e) => {
                warn!(store_id = store.id, error = %e, "Listing failed, continuing without it");
                0
            }
        };

        // Step 3: priority sync.
        let scored = view
            .iter()
            .filter(|(sku, _)| {
                state
                    .get(sku.as_str())
                    .map(|entry| !entry.synced_to_marketplace)
                    .unwrap_or(true)
            })
            .map(|(sku, s)| self.scorer.score_sku(sku.clone(), s.quantity, s.price))
            .collect();
        let chosen = top_n(scored, self.engine.config().priority.top_n);

        let mut items = Vec::with_capacity(chosen.len());
        let mut inventory = Vec::with_capacity(chosen.len());
        let mut staged: HashMap<String, StateEntry> = HashMap::new();
        for candidate in &chosen {
            let n = normalize_for_push(&candidate.sku, &view[&candidate.sku]);
            items.push(ItemUpdate::new(candidate.sku.clone(), Some(n.enabled), Some(n.price)));
            inventory.push(InventoryUpdate { sku: candidate.sku.clone(), inventory: n.quantity });
            staged.insert(
                candidate.sku.clone(),
                StateEntry {
                    quantity: n.quantity,
                    enabled: n.enabled,
                    price: n.price,
                    last_seen: now,
                    synced_to_marketplace: true,
                },
            );
        }

        let mut priority_pushed = 0usize;
        if !items.is_empty() {
            self.engine
                .push_two_phase(
                    store,
                    &items,
                    &inventory,
                    BatchStrategy::Adaptive,
                    None,
                    |batch| {
                        if let ConfirmedBatch::Inventory(chunk) = batch {
                            for update in chunk {
                                if let Some(entry) = staged.get(&update.sku) {
                                    state.insert(update.sku.clone(), entry.clone());
                                    priority_pushed += 1;
                                }
                            }
                        }
                    },
                )
                .await?;
            self.engine.state_store().save(store.id, &state);
        }
        info!(store_id = store.id, priority_pushed, "Priority sync complete");

        // Step 4: start the background worker (non-blocking).
        let worker = BackgroundWorker::new(self.engine.clone(), store.clone(), cancel);
        tokio::spawn(worker.run());

        Ok(HybridInitReport {
            initialized: true,
            bootstrapped,
            already_on_marketplace,
            priority_pushed,
            worker_started: true,
        })
    }
}
