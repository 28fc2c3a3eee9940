// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Top-level sweep loop.
//!
//! Dispatches one delta run per enabled store at a fixed cadence. Stores
//! run strictly sequentially: fanning out would multiply per-store working
//! sets (~70k products each) in memory, and per-store serialization is a
//! hard invariant anyway. A sweep that overruns the interval causes the
//! missed ticks to be skipped, never overlapped.
//!
//! With no enabled stores the scheduler degrades to a documented
//! `Disabled` state and parks; it never exits on its own. Cancellation
//! stops new sweeps and lets the current one complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{RunMode, SyncEngine};
use crate::model::{now_millis, Store};

/// Outcome of one sweep across all enabled stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepOutcome {
    /// Every store succeeded.
    Success,
    /// Some stores failed, some succeeded.
    Partial,
    /// Every store failed.
    Error,
    /// No enabled stores; the scheduler is parked.
    Disabled,
}

impl SweepOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

/// Per-store rollup feeding the health report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreHealth {
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    pub last_run_at: i64,
    pub last_error: Option<String>,
}

/// Published after every sweep; the health surface reads the latest value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub last_sweep: Option<SweepOutcome>,
    pub last_sweep_at: i64,
    pub stores: HashMap<u32, StoreHealth>,
}

/// The periodic sweep dispatcher.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    stores: Vec<Store>,
    cancel: CancellationToken,
    status_tx: watch::Sender<SchedulerStatus>,
    status_rx: watch::Receiver<SchedulerStatus>,
}

impl Scheduler {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, stores: Vec<Store>, cancel: CancellationToken) -> Self {
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
        Self { engine, stores, cancel, status_tx, status_rx }
    }

    /// One store per process, for horizontal fan-out deployments.
    #[must_use]
    pub fn single_store(engine: Arc<SyncEngine>, store: Store, cancel: CancellationToken) -> Self {
        Self::new(engine, vec![store], cancel)
    }

    /// Watch sweep outcomes and per-store health.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_rx.clone()
    }

    fn enabled_stores(&self) -> Vec<&Store> {
        self.stores.iter().filter(|s| s.enabled).collect()
    }

    /// Run sweeps until cancelled.
    pub async fn run(&self) {
        if let Err(reason) = self.engine.config().validate() {
            error!(reason = %reason, "Invalid configuration, scheduler disabled");
            self.publish(SweepOutcome::Disabled, HashMap::new());
            self.cancel.cancelled().await;
            return;
        }

        let enabled = self.enabled_stores();
        if enabled.is_empty() {
            warn!("No enabled stores, scheduler disabled");
            self.publish(SweepOutcome::Disabled, HashMap::new());
            self.cancel.cancelled().await;
            return;
        }
        info!(
            stores = enabled.len(),
            interval_minutes = self.engine.config().sync_interval_minutes,
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(
            self.engine.config().sync_interval_minutes.max(1) * 60,
        ));
        // A sweep longer than the interval must skip ticks, not queue them.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut health: HashMap<u32, StoreHealth> = HashMap::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let outcome = self.sweep(&mut health).await;
                    self.publish(outcome, health.clone());
                }
            }
        }
    }

    /// One sweep over all enabled stores, sequentially. Per-store failures
    /// are counted and never abort sibling stores. The sweep runs to
    /// completion even if cancellation arrives mid-way (shutdown lets the
    /// current sweep finish).
    pub async fn sweep(&self, health: &mut HashMap<u32, StoreHealth>) -> SweepOutcome {
        let started = Instant::now();
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for store in self.enabled_stores() {
            let entry = health.entry(store.id).or_default();
            entry.total_runs += 1;
            entry.last_run_at = now_millis();

            match self.engine.run(store, RunMode::Delta).await {
                Ok(_) => {
                    succeeded += 1;
                    entry.consecutive_failures = 0;
                    entry.last_error = None;
                }
                Err(e) => {
                    failed += 1;
                    entry.consecutive_failures += 1;
                    entry.total_failures += 1;
                    entry.last_error = Some(e.to_string());
                    error!(
                        store_id = store.id,
                        consecutive = entry.consecutive_failures,
                        error = %e,
                        "Store sync failed, continuing sweep"
                    );
                }
            }
            crate::metrics::set_consecutive_failures(store.id, entry.consecutive_failures);
        }

        let outcome = if failed == 0 {
            SweepOutcome::Success
        } else if succeeded > 0 {
            SweepOutcome::Partial
        } else {
            SweepOutcome::Error
        };
        crate::metrics::record_sweep(outcome.as_str(), started.elapsed());
        info!(
            outcome = outcome.as_str(),
            succeeded,
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Sweep complete"
        );
        outcome
    }

    fn publish(&self, outcome: SweepOutcome, stores: HashMap<u32, StoreHealth>) {
        let _ = self.status_tx.send(SchedulerStatus {
            last_sweep: Some(outcome),
            last_sweep_at: now_millis(),
            stores,
        });
    }
}
