/// Sync Scheduler Service
///
/// Host-side driver for scheduled ERP syncs. Polls every enabled connection on a
/// fixed tick and calls `sync_now` when its frequency is due relative to the last
/// completed run. The executor never triggers itself; `Manual` never fires here.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::services::erp::erp_connection_service::{ErpConnection, ErpConnectionService};
use crate::services::erp::erp_sync_service::{SyncError, SyncExecutor};
use crate::services::erp::sync_configuration::SyncConfiguration;
use crate::utils::log_sanitizer::sanitize_for_log;

pub struct SyncScheduler {
    connections: Arc<ErpConnectionService>,
    executor: Arc<SyncExecutor>,
    tick: Duration,
}

impl SyncScheduler {
    pub fn new(connections: Arc<ErpConnectionService>, executor: Arc<SyncExecutor>, tick: Duration) -> Self {
        Self {
            connections,
            executor,
            tick,
        }
    }

    /// Scheduler loop. Runs until the task is dropped.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // First tick fires immediately
        ticker.tick().await;

        tracing::info!("ERP sync scheduler started - polling every {}s", self.tick.as_secs());

        loop {
            ticker.tick().await;
            let started = self.run_due_syncs(Utc::now()).await;
            if started > 0 {
                tracing::debug!("Scheduler tick ran {} ERP syncs", started);
            }
        }
    }

    /// Run every due sync concurrently. Returns how many runs completed.
    pub async fn run_due_syncs(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Arc<ErpConnection>> = self
            .connections
            .enabled_connections()
            .into_iter()
            .filter(|connection| {
                let last_run = connection.history().latest().map(|record| record.timestamp);
                is_due(&connection.configuration(), last_run, now)
            })
            .collect();

        let runs = due.iter().map(|connection| self.run_one(connection));
        join_all(runs).await.into_iter().filter(|ran| *ran).count()
    }

    async fn run_one(&self, connection: &ErpConnection) -> bool {
        let company_id = sanitize_for_log(connection.company_id());
        match self.executor.sync_now(connection).await {
            Ok(report) => {
                self.connections.record_run(connection, report.record.status);
                tracing::info!(
                    "⏰ Scheduled sync for company {} finished: {}",
                    company_id,
                    report.record.status.as_str()
                );
                true
            }
            Err(SyncError::OperationInProgress) => {
                tracing::info!(
                    "Scheduled sync for company {} skipped: a run is already in progress",
                    company_id
                );
                false
            }
            Err(e) => {
                tracing::warn!("Scheduled sync for company {} rejected: {}", company_id, e);
                false
            }
        }
    }
}

/// Whether a configuration's cadence has elapsed since its last run.
/// A saved configuration that has never run is due immediately.
pub fn is_due(configuration: &SyncConfiguration, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if !configuration.enabled() {
        return false;
    }
    let Some(interval) = configuration.frequency().interval() else {
        return false;
    };

    match last_run.max(configuration.last_synced_at()) {
        Some(last) => now - last >= interval,
        None => true,
    }
}
