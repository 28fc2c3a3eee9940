//! Core data types flowing through the sync pipeline.
//!
//! The upstream ERP ("source of truth") hands us [`InventoryRecord`]s and
//! [`ProductDetail`]s; the pipeline folds them into a per-run [`SkuView`],
//! diffs that against the persisted [`StateMap`], and emits [`ItemUpdate`]
//! and [`InventoryUpdate`] payloads toward the marketplace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Epoch milliseconds, the timestamp unit used across persisted state.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One merchant location. Identified by an integer on the source of truth
/// and by an opaque venue string on the marketplace.
#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub id: u32,
    pub name: String,
    /// Venue identifier on the marketplace (opaque string).
    pub venue_id: String,
    pub credentials: MarketplaceCredentials,
    /// Per-store marketplace base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Basic-auth credentials for the marketplace venue.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceCredentials {
    pub username: String,
    pub password: String,
}

impl Store {
    /// Key identifying the venue for rate/batch bookkeeping.
    ///
    /// Two stores pointing at the same venue through the same base URL and
    /// user share one rate gate, which is exactly what the marketplace
    /// enforces server-side.
    #[must_use]
    pub fn venue_key(&self, default_base_url: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(default_base_url);
        format!("{}|{}|{}", base, self.venue_id, self.credentials.username)
    }
}

/// Inventory line from the source of truth.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryRecord {
    /// Product id on the source of truth.
    pub id: i64,
    /// Remaining quantity.
    pub rest: u32,
    #[serde(default)]
    pub store_id: u32,
}

/// Extension field on a product record. A configured field name carries the
/// marketplace SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddField {
    pub field: String,
    pub value: String,
}

/// Product detail from the source of truth.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDetail {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// May be absent upstream; absence means the item cannot be sold.
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub add_fields: Vec<AddField>,
}

impl ProductDetail {
    /// Extract the marketplace SKU from the extension fields.
    /// Empty values count as absent.
    #[must_use]
    pub fn sku(&self, sku_field: &str) -> Option<&str> {
        self.add_fields
            .iter()
            .find(|f| f.field == sku_field && !f.value.is_empty())
            .map(|f| f.value.as_str())
    }
}

/// A price is usable only if it is a finite, non-negative number.
///
/// Items failing this check are still emitted toward the marketplace, but
/// forced to zero quantity and disabled (see `engine::diff`).
#[must_use]
pub fn is_valid_price(price: Option<f64>) -> bool {
    matches!(price, Some(p) if p.is_finite() && p >= 0.0)
}

/// Aggregated per-SKU state derived from one source-of-truth snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SkuState {
    /// Quantity summed across all source products mapping to this SKU.
    pub quantity: u32,
    /// Last-wins across details. `None` or non-finite means unsellable.
    pub price: Option<f64>,
    pub enabled: bool,
}

/// The merged target view for one run: SKU -> aggregated state.
///
/// Backed by a `BTreeMap` so iteration (and therefore batch contents) is
/// deterministic across runs.
pub type SkuView = BTreeMap<String, SkuState>;

/// Persisted last-known marketplace state for one SKU.
///
/// An entry existing at all means some prior successful push confirmed the
/// SKU on the marketplace for this store. Entries are never deleted; a SKU
/// that disappears upstream is rewritten to `{0, false, prev.price}` so the
/// disable signal survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub quantity: u32,
    pub enabled: bool,
    pub price: f64,
    pub last_seen: i64,
    /// Set by the background worker / orchestrator once the marketplace has
    /// acknowledged this SKU. Old state files without the key default to
    /// `false`, which re-queues the SKU for the worker (the safe direction).
    #[serde(default)]
    pub synced_to_marketplace: bool,
}

/// Full persisted state for one store: SKU -> entry.
pub type StateMap = BTreeMap<String, StateEntry>;

/// Batch progress counters persisted mid-run so a crash during a long push
/// does not restart from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub completed: usize,
    pub total: usize,
    pub updated_at: i64,
}

/// Background-worker progress file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProgress {
    pub total_items: usize,
    pub synced_items: usize,
    pub remaining_items: usize,
    pub percent_complete: f64,
    pub estimated_days_remaining: f64,
    pub last_sync_at: i64,
    pub started_at: i64,
}

/// Phase-1 payload: item metadata (enabled flag, pricing).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemUpdate {
    pub sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discounted_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_percentage: Option<f64>,
}

impl ItemUpdate {
    /// Update carrying just enabled + price, the common case.
    #[must_use]
    pub fn new(sku: impl Into<String>, enabled: Option<bool>, price: Option<f64>) -> Self {
        Self {
            sku: sku.into(),
            enabled,
            price,
            discounted_price: None,
            vat_percentage: None,
        }
    }
}

/// Phase-2 payload: inventory level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryUpdate {
    pub sku: String,
    pub inventory: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sku_extraction() {
        let detail = ProductDetail {
            id: 1,
            title: "Widget".into(),
            price: Some(10.0),
            add_fields: vec![
                AddField { field: "usr_column_100".into(), value: "ignored".into() },
                AddField { field: "usr_column_514".into(), value: "SKU-1".into() },
            ],
        };
        assert_eq!(detail.sku("usr_column_514"), Some("SKU-1"));
        assert_eq!(detail.sku("usr_column_999"), None);
    }

    #[test]
    fn test_sku_extraction_skips_empty() {
        let detail = ProductDetail {
            id: 1,
            title: String::new(),
            price: None,
            add_fields: vec![AddField { field: "usr_column_514".into(), value: String::new() }],
        };
        assert_eq!(detail.sku("usr_column_514"), None);
    }

    #[test]
    fn test_price_validity() {
        assert!(is_valid_price(Some(0.0)));
        assert!(is_valid_price(Some(49.99)));
        assert!(!is_valid_price(None));
        assert!(!is_valid_price(Some(-1.0)));
        assert!(!is_valid_price(Some(f64::NAN)));
        assert!(!is_valid_price(Some(f64::INFINITY)));
    }

    #[test]
    fn test_state_entry_synced_flag_defaults_false() {
        // Entries written before the flag existed must deserialize.
        let raw = json!({"quantity": 5, "enabled": true, "price": 10.0, "last_seen": 123});
        let entry: StateEntry = serde_json::from_value(raw).unwrap();
        assert!(!entry.synced_to_marketplace);
    }

    #[test]
    fn test_item_update_omits_absent_fields() {
        let update = ItemUpdate::new("A", Some(true), None);
        let raw = serde_json::to_value(&update).unwrap();
        assert_eq!(raw, json!({"sku": "A", "enabled": true}));
    }

    #[test]
    fn test_venue_key_uses_override() {
        let store = Store {
            id: 7,
            name: "Main".into(),
            venue_id: "venue-7".into(),
            credentials: MarketplaceCredentials { username: "u".into(), password: "p".into() },
            base_url: Some("https://override.example".into()),
            enabled: true,
        };
        assert_eq!(
            store.venue_key("https://default.example"),
            "https://override.example|venue-7|u"
        );
    }
}
