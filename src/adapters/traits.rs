use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{InventoryRecord, InventoryUpdate, ItemUpdate, ProductDetail, Store};
use crate::resilience::retry::Recoverable;

/// Errors crossing an adapter boundary.
///
/// The variants encode the retry policy: `Network`, `RateLimited` and
/// `Server` are transient; `Auth` and `Terminal` are not. A 409 never
/// surfaces here — the marketplace adapter maps it to success (duplicate
/// batch, already applied).
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("request rejected (status {status}): {body}")]
    Terminal { status: u16, body: String },
}

impl Recoverable for AdapterError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Read side: the upstream ERP.
///
/// Implementations own authentication (bearer token, one re-auth on 401).
/// An empty inventory and a short products response are NOT adapter errors;
/// the engine guards against them because only it knows they are fatal.
#[async_trait]
pub trait SourceOfTruth: Send + Sync {
    /// Full inventory snapshot for one store.
    async fn inventory(&self, store_id: u32) -> Result<Vec<InventoryRecord>, AdapterError>;

    /// Product details for the given ids. Callers chunk to the upstream
    /// per-call limit; one record per requested id is expected.
    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>, AdapterError>;
}

/// Write side: the marketplace venue API.
///
/// Status policy: 2xx = success, 409 = idempotent success (handled inside
/// the adapter), 429 = `RateLimited` with parsed `Retry-After`,
/// 5xx/network = transient, other 4xx = terminal.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Phase 1: item metadata (enabled flag, pricing).
    async fn update_items(&self, store: &Store, updates: &[ItemUpdate])
        -> Result<(), AdapterError>;

    /// Phase 2: inventory levels.
    async fn update_inventory(
        &self,
        store: &Store,
        updates: &[InventoryUpdate],
    ) -> Result<(), AdapterError>;

    /// Best-effort listing of SKUs the venue already has.
    /// `Ok(None)` means the endpoint is not supported (404/405).
    async fn list_items(&self, store: &Store) -> Result<Option<Vec<String>>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(AdapterError::Network("reset".into()).is_retriable());
        assert!(AdapterError::RateLimited { retry_after: None }.is_retriable());
        assert!(AdapterError::Server { status: 503, body: String::new() }.is_retriable());
        assert!(!AdapterError::Auth("denied".into()).is_retriable());
        assert!(!AdapterError::Terminal { status: 400, body: String::new() }.is_retriable());
    }

    #[test]
    fn test_retry_after_carried() {
        let err = AdapterError::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(AdapterError::Network("x".into()).retry_after(), None);
    }
}
