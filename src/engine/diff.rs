// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pure batch preparation: SKU view aggregation and state diffing.
//!
//! Everything here is deterministic and free of I/O so the diff rules —
//! especially the invalid-price force-zero rule and the missing-SKU
//! disable — have a direct unit-test surface.

use std::collections::HashMap;

use tracing::warn;

use crate::model::{
    is_valid_price, InventoryRecord, InventoryUpdate, ItemUpdate, ProductDetail, SkuState,
    SkuView, StateEntry, StateMap,
};

/// Fold an inventory snapshot and its product details into the per-SKU view.
///
/// Multiple source products may share one marketplace SKU: quantities are
/// summed, the last detail carrying a price wins, and the SKU is enabled
/// exactly when its aggregate quantity is positive.
#[must_use]
pub fn build_sku_view(
    inventory: &[InventoryRecord],
    details: &[ProductDetail],
    sku_field: &str,
) -> SkuView {
    let mut quantity_by_id: HashMap<i64, u32> = HashMap::new();
    for record in inventory {
        let entry = quantity_by_id.entry(record.id).or_insert(0);
        *entry = entry.saturating_add(record.rest);
    }

    let mut view = SkuView::new();
    for detail in details {
        let Some(sku) = detail.sku(sku_field) else { continue };
        let quantity = quantity_by_id.get(&detail.id).copied().unwrap_or(0);

        let state = view
            .entry(sku.to_string())
            .or_insert(SkuState { quantity: 0, price: None, enabled: false });
        state.quantity = state.quantity.saturating_add(quantity);
        if detail.price.is_some() {
            state.price = detail.price;
        }
    }

    for state in view.values_mut() {
        state.enabled = state.quantity > 0;
    }
    view
}

/// What actually goes on the wire for one SKU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub quantity: u32,
    pub enabled: bool,
    pub price: f64,
}

/// The force-zero rule: a SKU without a valid price is still emitted (the
/// marketplace record must exist and must not offer the item), but with
/// zero quantity, disabled, and price 0.
#[must_use]
pub fn normalize_for_push(sku: &str, state: &SkuState) -> Normalized {
    if is_valid_price(state.price) {
        Normalized {
            quantity: state.quantity,
            enabled: state.enabled,
            price: state.price.unwrap_or(0.0),
        }
    } else {
        warn!(sku, quantity = state.quantity, "No valid price; emitting disabled with zero inventory");
        Normalized { quantity: 0, enabled: false, price: 0.0 }
    }
}

/// The two ordered push arrays plus the state that a completed run persists.
#[derive(Debug)]
pub struct PushPlan {
    /// Phase 1, in view order then missing-SKU order.
    pub items: Vec<ItemUpdate>,
    /// Phase 2, same ordering discipline.
    pub inventory: Vec<InventoryUpdate>,
    /// Full post-run state: the view, normalized, plus disabled entries
    /// for SKUs that disappeared.
    pub new_state: StateMap,
    pub invalid_price_count: usize,
    pub missing_disabled_count: usize,
}

/// Diff the new view against the previous state.
///
/// - New SKU: both updates.
/// - Quantity changed: inventory update.
/// - Enabled or price changed: item update.
/// - `force_full`: both updates for every SKU in the view.
/// - SKU in previous state but absent from the view: disable emission and
///   a state rewrite to `{0, false, prev.price}` keeping `last_seen`.
#[must_use]
pub fn build_plan(view: &SkuView, previous: &StateMap, force_full: bool, now_ms: i64) -> PushPlan {
    let mut items = Vec::new();
    let mut inventory = Vec::new();
    let mut new_state = StateMap::new();
    let mut invalid_price_count = 0;

    for (sku, state) in view {
        if !is_valid_price(state.price) {
            invalid_price_count += 1;
        }
        let n = normalize_for_push(sku, state);
        let prev = previous.get(sku);

        if force_full || prev.is_none() {
            items.push(ItemUpdate::new(sku.clone(), Some(n.enabled), Some(n.price)));
            inventory.push(InventoryUpdate { sku: sku.clone(), inventory: n.quantity });
        } else if let Some(prev) = prev {
            if n.quantity != prev.quantity {
                inventory.push(InventoryUpdate { sku: sku.clone(), inventory: n.quantity });
            }
            if n.enabled != prev.enabled || n.price != prev.price {
                items.push(ItemUpdate::new(sku.clone(), Some(n.enabled), Some(n.price)));
            }
        }

        new_state.insert(
            sku.clone(),
            StateEntry {
                quantity: n.quantity,
                enabled: n.enabled,
                price: n.price,
                last_seen: now_ms,
                synced_to_marketplace: prev.is_some_and(|p| p.synced_to_marketplace),
            },
        );
    }

    let mut missing_disabled_count = 0;
    for (sku, prev) in previous {
        if view.contains_key(sku) {
            continue;
        }
        missing_disabled_count += 1;
        items.push(ItemUpdate::new(sku.clone(), Some(false), None));
        inventory.push(InventoryUpdate { sku: sku.clone(), inventory: 0 });
        new_state.insert(
            sku.clone(),
            StateEntry {
                quantity: 0,
                enabled: false,
                price: prev.price,
                last_seen: prev.last_seen,
                synced_to_marketplace: prev.synced_to_marketplace,
            },
        );
    }

    PushPlan { items, inventory, new_state, invalid_price_count, missing_disabled_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddField;

    const SKU_FIELD: &str = "usr_column_514";

    fn detail(id: i64, price: Option<f64>, sku: &str) -> ProductDetail {
        ProductDetail {
            id,
            title: format!("Product {id}"),
            price,
            add_fields: vec![AddField { field: SKU_FIELD.into(), value: sku.into() }],
        }
    }

    fn record(id: i64, rest: u32) -> InventoryRecord {
        InventoryRecord { id, rest, store_id: 1 }
    }

    fn entry(quantity: u32, enabled: bool, price: f64) -> StateEntry {
        StateEntry { quantity, enabled, price, last_seen: 0, synced_to_marketplace: false }
    }

    #[test]
    fn test_view_basic() {
        let view = build_sku_view(
            &[record(1, 5), record(2, 0)],
            &[detail(1, Some(100.0), "A"), detail(2, Some(200.0), "B")],
            SKU_FIELD,
        );
        assert_eq!(view["A"], SkuState { quantity: 5, price: Some(100.0), enabled: true });
        assert_eq!(view["B"], SkuState { quantity: 0, price: Some(200.0), enabled: false });
    }

    #[test]
    fn test_view_aggregates_shared_sku() {
        let view = build_sku_view(
            &[record(1, 3), record(2, 4)],
            &[detail(1, Some(10.0), "A"), detail(2, Some(12.0), "A")],
            SKU_FIELD,
        );
        assert_eq!(view["A"].quantity, 7);
        // Last detail carrying a price wins.
        assert_eq!(view["A"].price, Some(12.0));
        assert!(view["A"].enabled);
    }

    #[test]
    fn test_view_price_last_wins_skips_absent() {
        let view = build_sku_view(
            &[record(1, 1), record(2, 1)],
            &[detail(1, Some(10.0), "A"), detail(2, None, "A")],
            SKU_FIELD,
        );
        assert_eq!(view["A"].price, Some(10.0));
    }

    #[test]
    fn test_view_skips_details_without_sku() {
        let no_sku = ProductDetail { id: 3, title: String::new(), price: Some(1.0), add_fields: vec![] };
        let view = build_sku_view(&[record(3, 9)], &[no_sku], SKU_FIELD);
        assert!(view.is_empty());
    }

    #[test]
    fn test_view_detail_without_inventory_is_zero() {
        let view = build_sku_view(&[], &[detail(1, Some(5.0), "A")], SKU_FIELD);
        assert_eq!(view["A"].quantity, 0);
        assert!(!view["A"].enabled);
    }

    #[test]
    fn test_normalize_valid_price_passthrough() {
        let state = SkuState { quantity: 7, price: Some(3.5), enabled: true };
        assert_eq!(
            normalize_for_push("A", &state),
            Normalized { quantity: 7, enabled: true, price: 3.5 }
        );
    }

    #[test]
    fn test_normalize_invalid_price_forces_zero() {
        for price in [None, Some(-1.0), Some(f64::NAN)] {
            let state = SkuState { quantity: 7, price, enabled: true };
            assert_eq!(
                normalize_for_push("A", &state),
                Normalized { quantity: 0, enabled: false, price: 0.0 },
                "price {price:?}"
            );
        }
    }

    #[test]
    fn test_plan_new_sku_emits_both() {
        let view = build_sku_view(&[record(1, 5)], &[detail(1, Some(100.0), "A")], SKU_FIELD);
        let plan = build_plan(&view, &StateMap::new(), false, 42);

        assert_eq!(plan.items, vec![ItemUpdate::new("A", Some(true), Some(100.0))]);
        assert_eq!(plan.inventory, vec![InventoryUpdate { sku: "A".into(), inventory: 5 }]);
        assert_eq!(plan.new_state["A"].quantity, 5);
        assert_eq!(plan.new_state["A"].last_seen, 42);
    }

    #[test]
    fn test_plan_quantity_change_is_inventory_only() {
        let view = build_sku_view(&[record(1, 5)], &[detail(1, Some(100.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        previous.insert("A".into(), entry(10, true, 100.0));

        let plan = build_plan(&view, &previous, false, 0);
        assert!(plan.items.is_empty());
        assert_eq!(plan.inventory, vec![InventoryUpdate { sku: "A".into(), inventory: 5 }]);
    }

    #[test]
    fn test_plan_price_change_is_item_only() {
        let view = build_sku_view(&[record(1, 10)], &[detail(1, Some(120.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        previous.insert("A".into(), entry(10, true, 100.0));

        let plan = build_plan(&view, &previous, false, 0);
        assert_eq!(plan.items, vec![ItemUpdate::new("A", Some(true), Some(120.0))]);
        assert!(plan.inventory.is_empty());
    }

    #[test]
    fn test_plan_unchanged_sku_is_silent() {
        let view = build_sku_view(&[record(1, 10)], &[detail(1, Some(100.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        previous.insert("A".into(), entry(10, true, 100.0));

        let plan = build_plan(&view, &previous, false, 0);
        assert!(plan.items.is_empty());
        assert!(plan.inventory.is_empty());
        // State is still rewritten (fresh last_seen).
        assert_eq!(plan.new_state.len(), 1);
    }

    #[test]
    fn test_plan_quantity_to_zero_also_disables() {
        // qty 10 -> 0 flips enabled, so phase 1 must fire too.
        let view = build_sku_view(&[record(1, 0)], &[detail(1, Some(100.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        previous.insert("A".into(), entry(10, true, 100.0));

        let plan = build_plan(&view, &previous, false, 0);
        assert_eq!(plan.items, vec![ItemUpdate::new("A", Some(false), Some(100.0))]);
        assert_eq!(plan.inventory, vec![InventoryUpdate { sku: "A".into(), inventory: 0 }]);
    }

    #[test]
    fn test_plan_force_full_emits_everything() {
        let view = build_sku_view(&[record(1, 10)], &[detail(1, Some(100.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        previous.insert("A".into(), entry(10, true, 100.0));

        let plan = build_plan(&view, &previous, true, 0);
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.inventory.len(), 1);
    }

    #[test]
    fn test_plan_missing_sku_disabled_price_retained() {
        let view = SkuView::new();
        let mut previous = StateMap::new();
        previous.insert("Z".into(), entry(4, true, 50.0));

        let plan = build_plan(&view, &previous, false, 99);
        assert_eq!(plan.items, vec![ItemUpdate::new("Z", Some(false), None)]);
        assert_eq!(plan.inventory, vec![InventoryUpdate { sku: "Z".into(), inventory: 0 }]);
        let z = &plan.new_state["Z"];
        assert_eq!((z.quantity, z.enabled, z.price), (0, false, 50.0));
        // Not seen this run; last_seen keeps its old value.
        assert_eq!(z.last_seen, 0);
        assert_eq!(plan.missing_disabled_count, 1);
    }

    #[test]
    fn test_plan_invalid_price_forces_disable() {
        let view = build_sku_view(&[record(3, 7)], &[detail(3, None, "C")], SKU_FIELD);
        let plan = build_plan(&view, &StateMap::new(), false, 0);

        assert_eq!(plan.items, vec![ItemUpdate::new("C", Some(false), Some(0.0))]);
        assert_eq!(plan.inventory, vec![InventoryUpdate { sku: "C".into(), inventory: 0 }]);
        let c = &plan.new_state["C"];
        assert_eq!((c.quantity, c.enabled, c.price), (0, false, 0.0));
        assert_eq!(plan.invalid_price_count, 1);
    }

    #[test]
    fn test_plan_preserves_synced_flag() {
        let view = build_sku_view(&[record(1, 5)], &[detail(1, Some(10.0), "A")], SKU_FIELD);
        let mut previous = StateMap::new();
        let mut prev_entry = entry(10, true, 10.0);
        prev_entry.synced_to_marketplace = true;
        previous.insert("A".into(), prev_entry);

        let plan = build_plan(&view, &previous, false, 0);
        assert!(plan.new_state["A"].synced_to_marketplace);
    }

    #[test]
    fn test_inventory_positive_implies_enabled() {
        // Any SKU emitted with inventory > 0 must have its item payload
        // (when present) enabled.
        let view = build_sku_view(
            &[record(1, 5), record(2, 3), record(3, 2)],
            &[detail(1, Some(1.0), "A"), detail(2, None, "B"), detail(3, Some(2.0), "C")],
            SKU_FIELD,
        );
        let plan = build_plan(&view, &StateMap::new(), false, 0);

        for inv in &plan.inventory {
            if inv.inventory > 0 {
                let item = plan.items.iter().find(|i| i.sku == inv.sku).unwrap();
                assert_eq!(item.enabled, Some(true), "sku {}", inv.sku);
            }
        }
        // And the invalid-price SKU landed at zero.
        let b = plan.inventory.iter().find(|i| i.sku == "B").unwrap();
        assert_eq!(b.inventory, 0);
    }
}
