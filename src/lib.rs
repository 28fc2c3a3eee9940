//! # Catalog Sync
//!
//! A one-way catalog/inventory synchronizer projecting ERP product state to
//! a rate-limited marketplace API, one isolated pipeline per merchant store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  • Periodic sweep, stores strictly sequential               │
//! │  • Per-store failure counting, health rollup                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                           │
//! │  • Fetch SoT snapshot → SKU view → diff vs state            │
//! │  • Modes: bootstrap / force-full / delta / limited          │
//! │  • Two-phase push: items first, inventory second            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            (per batch: gate → breaker → retried call)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            RateGovernor · CircuitBreaker · Retrier          │
//! │  • Per-venue single-flight gate, learned intervals          │
//! │  • AdaptiveBatcher sizes batches from 429 feedback          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Marketplace API                         │
//! │  PATCH /venues/{id}/items · PATCH /venues/{id}/items/       │
//! │  inventory · 409 = duplicate = success · 429 honored        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_sync::adapters::http::{HttpMarketplace, HttpSot};
//! use catalog_sync::{RunMode, Scheduler, SyncConfig, SyncEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(SyncConfig {
//!         sot_base_url: "https://erp.example".into(),
//!         marketplace_base_url: "https://marketplace.example".into(),
//!         ..Default::default()
//!     });
//!
//!     let sot = Arc::new(HttpSot::new(&config.sot_base_url, "login", "password")?);
//!     let marketplace = Arc::new(HttpMarketplace::new(&config.marketplace_base_url)?);
//!     let engine = Arc::new(SyncEngine::new(config, sot, marketplace));
//!
//!     let stores = vec![/* from deployment config */];
//!     let cancel = CancellationToken::new();
//!     let scheduler = Scheduler::new(engine, stores, cancel.clone());
//!
//!     // SIGINT/SIGTERM handling cancels the token; the current sweep
//!     // completes, background workers stop at batch boundaries.
//!     scheduler.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Delta sync**: only changes cross the wire; full pushes happen once
//! - **Partial-data guard rails**: empty inventory or short detail
//!   responses abort the run instead of mass-disabling a live catalog
//! - **Invalid-price force-zero**: unpriceable items are emitted disabled
//!   with zero stock, never offered
//! - **Learned rate limits**: `Retry-After` values persist across restarts
//! - **Adaptive batching**: batch sizes grow on success streaks, halve on
//!   429s, bounded by the marketplace's 200-item payload ceiling
//! - **Hybrid initialization**: bootstrap → introspection → priority push
//!   → background drain, so new stores sell within hours, not days
//! - **Circuit breakers**: per-dependency, with observable state and reset
//!
//! ## Modules
//!
//! - [`engine`]: the per-store pipeline ([`SyncEngine`])
//! - [`scheduler`]: the periodic sweep loop
//! - [`orchestrator`]: first-time hybrid initialization
//! - [`worker`]: background completion worker
//! - [`state`]: durable per-store SKU state
//! - [`rate`]: per-venue request pacing
//! - [`batching`]: adaptive batch sizing
//! - [`resilience`]: retry logic, circuit breakers
//! - [`priority`]: priority scoring for the initial push
//! - [`adapters`]: SoT and marketplace boundaries (HTTP + in-memory)

pub mod adapters;
pub mod batching;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod priority;
pub mod rate;
pub mod resilience;
pub mod scheduler;
pub mod state;
pub mod worker;

pub use adapters::{AdapterError, Marketplace, SourceOfTruth};
pub use batching::adaptive::{AdaptiveBatcher, VenueBatchState};
pub use config::{AdaptiveConfig, BatchTuning, PriorityConfig, RateConfig, SyncConfig, WorkerConfig, WriteMode};
pub use engine::{BatchStrategy, PushStats, RunMode, RunReport, SyncEngine, SyncError};
pub use model::{
    InventoryRecord, InventoryUpdate, ItemUpdate, ProductDetail, SkuState, SkuView, StateEntry,
    StateMap, Store, WorkerProgress,
};
pub use orchestrator::{HybridInitReport, HybridOrchestrator};
pub use priority::{PriorityScorer, ScoredSku};
pub use rate::RateGovernor;
pub use resilience::circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitState, DependencyCircuits,
};
pub use resilience::retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerStatus, StoreHealth, SweepOutcome};
pub use state::StateStore;
pub use worker::BackgroundWorker;
