//! Periodic reclamation of stale records.
//!
//! A [`Reclaimer`] owns a set of [`ReclaimPolicy`]s and runs
//! [`PartitionStore::cleanup`] for each of them on a fixed cadence. It holds
//! no locks between sweeps and stops cleanly when told to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info};

use crate::error::Result;
use crate::model::{Disposition, Partition};
use crate::store::PartitionStore;
use crate::telemetry::store::start_sweep_span;

/// One partition to sweep and what to do with its stale records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimPolicy {
    pub partition: Partition,
    /// Records older than this are stale.
    pub max_age: Duration,
    pub disposition: Disposition,
}

/// Configuration for the reclamation loop.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Time between the start of consecutive sweeps.
    pub interval: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one sweep over every policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale records found per swept partition, in policy order.
    pub reclaimed: Vec<(Partition, usize)>,
    /// Policies whose cleanup failed (already logged).
    pub failures: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.reclaimed.iter().map(|(_, n)| n).sum()
    }
}

/// The reclamation loop.
pub struct Reclaimer {
    store: PartitionStore,
    policies: Arc<Vec<ReclaimPolicy>>,
    config: ReclaimConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Reclaimer {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policies: Arc::clone(&self.policies),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Reclaimer {
    pub fn new(store: PartitionStore, policies: Vec<ReclaimPolicy>, config: ReclaimConfig) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the sweep in progress, if any.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Sweep every policy once. A failing policy is logged and skipped.
    pub async fn run_once(&self) -> SweepReport {
        let span = start_sweep_span(self.policies.len());
        let report = async {
            let mut report = SweepReport::default();
            for policy in self.policies.iter() {
                match self
                    .store
                    .cleanup(&policy.partition, policy.max_age, &policy.disposition)
                    .await
                {
                    Ok(n) => report.reclaimed.push((policy.partition.clone(), n)),
                    Err(e) => {
                        error!(partition = %policy.partition, "reclamation failed: {e}");
                        report.failures += 1;
                    }
                }
            }
            report
        }
        .instrument(span.clone())
        .await;
        span.record("reclaim.total", report.total() as u64);
        report
    }

    /// Run sweeps until [`shutdown`](Self::shutdown) is called. The first
    /// sweep starts immediately.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            policies = self.policies.len(),
            interval_secs = self.config.interval.as_secs(),
            "reclaimer started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("reclaimer shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.total() > 0 || report.failures > 0 {
                        info!(total = report.total(), failures = report.failures, "sweep finished");
                    }
                }
            }
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> ReclaimerHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("reclaimer stopped: {e}");
            }
        });
        ReclaimerHandle { shutdown, task }
    }
}

/// Handle to a spawned [`Reclaimer`].
pub struct ReclaimerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.notify_one();
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
