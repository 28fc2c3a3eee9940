// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory adapter fakes.
//!
//! Back the integration tests: the SoT fake serves scripted snapshots, the
//! marketplace fake records every pushed batch and can be loaded with a
//! script of failures to inject (each queued error fails exactly one call,
//! in order).

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::traits::{AdapterError, Marketplace, SourceOfTruth};
use crate::model::{InventoryRecord, InventoryUpdate, ItemUpdate, ProductDetail, Store};

/// Scriptable in-memory source of truth.
#[derive(Default)]
pub struct MemorySot {
    inventory: Mutex<Vec<InventoryRecord>>,
    details: Mutex<Vec<ProductDetail>>,
    script: Mutex<VecDeque<Option<AdapterError>>>,
}

impl MemorySot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_inventory(&self, inventory: Vec<InventoryRecord>) {
        *self.inventory.lock() = inventory;
    }

    pub fn set_details(&self, details: Vec<ProductDetail>) {
        *self.details.lock() = details;
    }

    /// Queue an error; the next scripted SoT call consumes it and fails.
    pub fn fail_next(&self, error: AdapterError) {
        self.script.lock().push_back(Some(error));
    }

    /// Queue `count` calls that succeed, for positioning a later failure.
    pub fn pass_next(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(None);
        }
    }

    fn take_failure(&self) -> Option<AdapterError> {
        self.script.lock().pop_front().flatten()
    }
}

#[async_trait]
impl SourceOfTruth for MemorySot {
    async fn inventory(&self, store_id: u32) -> Result<Vec<InventoryRecord>, AdapterError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let _ = store_id;
        Ok(self.inventory.lock().clone())
    }

    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>, AdapterError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        // One record per known id; unknown ids simply produce a short
        // response, which is exactly what the engine must guard against.
        let details = self.details.lock();
        Ok(ids
            .iter()
            .filter_map(|id| details.iter().find(|d| d.id == *id).cloned())
            .collect())
    }
}

/// Recording in-memory marketplace.
#[derive(Default)]
pub struct MemoryMarketplace {
    item_batches: Mutex<Vec<Vec<ItemUpdate>>>,
    inventory_batches: Mutex<Vec<Vec<InventoryUpdate>>>,
    /// Call kinds in arrival order ("items" / "inventory"), successful
    /// calls only; lets tests assert the two-phase ordering.
    call_sequence: Mutex<Vec<&'static str>>,
    fail_next: Mutex<VecDeque<AdapterError>>,
    /// `None` = listing endpoint unsupported (404/405).
    existing_items: Mutex<Option<Vec<String>>>,
}

impl MemoryMarketplace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error; the next push call consumes it and fails without
    /// recording the batch.
    pub fn fail_next(&self, error: AdapterError) {
        self.fail_next.lock().push_back(error);
    }

    /// Make `list_items` return these SKUs.
    pub fn set_existing_items(&self, skus: Vec<String>) {
        *self.existing_items.lock() = Some(skus);
    }

    /// All phase-1 batches in push order.
    #[must_use]
    pub fn item_batches(&self) -> Vec<Vec<ItemUpdate>> {
        self.item_batches.lock().clone()
    }

    /// All phase-2 batches in push order.
    #[must_use]
    pub fn inventory_batches(&self) -> Vec<Vec<InventoryUpdate>> {
        self.inventory_batches.lock().clone()
    }

    /// Phase-1 updates flattened across batches.
    #[must_use]
    pub fn all_item_updates(&self) -> Vec<ItemUpdate> {
        self.item_batches.lock().iter().flatten().cloned().collect()
    }

    /// Phase-2 updates flattened across batches.
    #[must_use]
    pub fn all_inventory_updates(&self) -> Vec<InventoryUpdate> {
        self.inventory_batches.lock().iter().flatten().cloned().collect()
    }

    /// Successful call kinds in arrival order.
    #[must_use]
    pub fn call_sequence(&self) -> Vec<&'static str> {
        self.call_sequence.lock().clone()
    }

    pub fn clear_recordings(&self) {
        self.item_batches.lock().clear();
        self.inventory_batches.lock().clear();
        self.call_sequence.lock().clear();
    }

    fn take_failure(&self) -> Option<AdapterError> {
        self.fail_next.lock().pop_front()
    }
}

#[async_trait]
impl Marketplace for MemoryMarketplace {
    async fn update_items(
        &self,
        _store: &Store,
        updates: &[ItemUpdate],
    ) -> Result<(), AdapterError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.item_batches.lock().push(updates.to_vec());
        self.call_sequence.lock().push("items");
        Ok(())
    }

    async fn update_inventory(
        &self,
        _store: &Store,
        updates: &[InventoryUpdate],
    ) -> Result<(), AdapterError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inventory_batches.lock().push(updates.to_vec());
        self.call_sequence.lock().push("inventory");
        Ok(())
    }

    async fn list_items(&self, _store: &Store) -> Result<Option<Vec<String>>, AdapterError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.existing_items.lock().clone())
    }
}
