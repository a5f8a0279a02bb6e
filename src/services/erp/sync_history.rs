// ERP Sync History
// Append-only log of completed sync runs, read newest first
// Records carry the endpoint and aggregate counts only, never credentials

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use uuid::Uuid;

use crate::services::erp::sync_configuration::SyncDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Success,
    Partial,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SyncRunStatus::Success => "success",
            SyncRunStatus::Partial => "partial",
            SyncRunStatus::Failed => "failed",
        }
    }

    /// Partial when some records failed and some made it through
    pub fn from_counts(synced: usize, failed: usize) -> Self {
        match (synced, failed) {
            (_, 0) => SyncRunStatus::Success,
            (0, _) => SyncRunStatus::Failed,
            _ => SyncRunStatus::Partial,
        }
    }
}

/// Why a run ended early. Stored on the history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    TimedOut,
    ConnectionFailed(String),
}

impl FailureReason {
    pub fn as_str(&self) -> &str {
        match self {
            FailureReason::Cancelled => "cancelled",
            FailureReason::TimedOut => "timed_out",
            FailureReason::ConnectionFailed(_) => "connection_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncHistoryRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    pub direction: SyncDirection,
    pub status: SyncRunStatus,
    pub records_synced: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_unchanged: usize,
    pub records_failed: usize,
    pub endpoint: String,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSummary {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: Option<SyncRunStatus>,
    pub records_synced: usize,
    pub records_failed: usize,
}

#[derive(Debug, Default)]
pub struct SyncHistoryLog {
    records: RwLock<Vec<SyncHistoryRecord>>,
}

impl SyncHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries land in completion order
    pub fn append(&self, record: SyncHistoryRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }

    /// Snapshot, newest first
    pub fn records_desc(&self) -> Vec<SyncHistoryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().cloned().collect()
    }

    pub fn latest(&self) -> Option<SyncHistoryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completion time of the newest run that was not `Failed`
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .rev()
            .find(|record| record.status != SyncRunStatus::Failed)
            .map(|record| record.timestamp)
    }

    /// `status` and counts describe the latest run; `last_synced_at` only
    /// moves when a run actually synced.
    pub fn status_summary(&self) -> SyncStatusSummary {
        match self.latest() {
            Some(record) => SyncStatusSummary {
                last_synced_at: self.last_synced_at(),
                status: Some(record.status),
                records_synced: record.records_synced,
                records_failed: record.records_failed,
            },
            None => SyncStatusSummary {
                last_synced_at: None,
                status: None,
                records_synced: 0,
                records_failed: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(synced: usize, failed: usize) -> SyncHistoryRecord {
        let now = Utc::now();
        SyncHistoryRecord {
            id: Uuid::new_v4(),
            started_at: now,
            timestamp: now,
            direction: SyncDirection::Pull,
            status: SyncRunStatus::from_counts(synced, failed),
            records_synced: synced,
            records_created: 0,
            records_updated: synced,
            records_unchanged: 0,
            records_failed: failed,
            endpoint: "https://erp.example.com".to_string(),
            failure_reason: None,
        }
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(SyncRunStatus::from_counts(10, 0), SyncRunStatus::Success);
        assert_eq!(SyncRunStatus::from_counts(0, 0), SyncRunStatus::Success);
        assert_eq!(SyncRunStatus::from_counts(8, 2), SyncRunStatus::Partial);
        assert_eq!(SyncRunStatus::from_counts(0, 3), SyncRunStatus::Failed);
    }

    #[test]
    fn test_reads_newest_first() {
        let log = SyncHistoryLog::new();
        log.append(record(1, 0));
        log.append(record(2, 0));
        log.append(record(3, 1));

        let synced: Vec<usize> = log.records_desc().iter().map(|r| r.records_synced).collect();
        assert_eq!(synced, vec![3, 2, 1]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_status_summary() {
        let log = SyncHistoryLog::new();
        let empty = log.status_summary();
        assert!(empty.last_synced_at.is_none());
        assert!(empty.status.is_none());

        log.append(record(8, 2));
        let summary = log.status_summary();
        assert_eq!(summary.status, Some(SyncRunStatus::Partial));
        assert_eq!(summary.records_synced, 8);
        assert_eq!(summary.records_failed, 2);
    }

    fn failed_run(reason: FailureReason) -> SyncHistoryRecord {
        SyncHistoryRecord {
            status: SyncRunStatus::Failed,
            failure_reason: Some(reason),
            ..record(0, 0)
        }
    }

    #[test]
    fn test_failed_run_does_not_count_as_synced() {
        let log = SyncHistoryLog::new();
        log.append(failed_run(FailureReason::ConnectionFailed("refused".into())));

        let summary = log.status_summary();
        assert_eq!(summary.status, Some(SyncRunStatus::Failed));
        assert!(summary.last_synced_at.is_none());
    }

    #[test]
    fn test_failed_run_keeps_previous_sync_time() {
        let log = SyncHistoryLog::new();
        let succeeded = record(3, 0);
        let synced_at = succeeded.timestamp;
        log.append(succeeded);
        log.append(failed_run(FailureReason::TimedOut));

        let summary = log.status_summary();
        assert_eq!(summary.status, Some(SyncRunStatus::Failed));
        assert_eq!(summary.last_synced_at, Some(synced_at));
        assert_eq!(log.last_synced_at(), Some(synced_at));
    }

    #[test]
    fn test_failure_reason_serialization() {
        let value = serde_json::to_value(FailureReason::Cancelled).unwrap();
        assert_eq!(value["kind"], "cancelled");
        let value = serde_json::to_value(FailureReason::ConnectionFailed("refused".into())).unwrap();
        assert_eq!(value["detail"], "refused");
    }
}
