//! Recovery Worker
//!
//! Periodically re-drives exchanges that have sat untouched past a threshold:
//! hops aborted by a gateway failure, or confirmations whose advance failed.
//! Each pick-up is a plain `advance(uuid, None)`, so a scan racing a live
//! callback loses the CAS and leaves the record alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::ExchangeCoordinator;
use super::error::ExchangeError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub scan_interval: Duration,
    /// Minimum idle time before an exchange is re-driven
    pub stale_threshold: Duration,
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Tally of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    /// Exchanges whose status moved
    pub advanced: usize,
    pub failed: usize,
}

pub struct RecoveryWorker {
    coordinator: Arc<ExchangeCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<ExchangeCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub async fn run(&self) {
        info!(
            every_secs = self.config.scan_interval.as_secs(),
            idle_secs = self.config.stale_threshold.as_secs(),
            batch = self.config.batch_size,
            "Recovery worker started"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.scan_and_recover().await {
                Ok(report) if report.advanced > 0 || report.failed > 0 => {
                    info!(
                        scanned = report.scanned,
                        advanced = report.advanced,
                        failed = report.failed,
                        "Recovery scan finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Recovery scan could not list stale exchanges"),
            }
        }
    }

    pub async fn scan_and_recover(&self) -> Result<ScanReport, ExchangeError> {
        let candidates = self
            .coordinator
            .store()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        let mut report = ScanReport {
            scanned: candidates.len(),
            ..ScanReport::default()
        };
        for uuid in candidates {
            match self.recover_one(uuid).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(exchange = %uuid, error = %e, "Stale exchange still stuck");
                }
            }
        }
        Ok(report)
    }

    /// Whether the exchange changed status
    async fn recover_one(&self, uuid: Uuid) -> Result<bool, ExchangeError> {
        let before = self.coordinator.load(uuid).await?.status();
        let after = self.coordinator.advance(uuid, None).await?.status();
        if after == before {
            debug!(exchange = %uuid, status = %before, "Stale exchange has nothing to do");
            return Ok(false);
        }
        info!(exchange = %uuid, from = %before, to = %after, "Recovered stale exchange");
        Ok(true)
    }
}
