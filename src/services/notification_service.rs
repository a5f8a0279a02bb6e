/// Notification Service
///
/// User-facing notification channel for connection tests, saves and sync runs.
/// The executor reports outcomes here; delivery (toast, email, log) is up to the
/// implementation. Notifications never carry credentials.

use serde::Serialize;

use crate::services::erp::sync_history::{SyncHistoryRecord, SyncRunStatus};
use crate::utils::log_sanitizer::sanitize_for_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationLevel::Success => "success",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncNotification {
    pub company_id: String,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl SyncNotification {
    pub fn connection_tested(company_id: &str, outcome: &Result<(), String>) -> Self {
        match outcome {
            Ok(()) => Self {
                company_id: company_id.to_string(),
                level: NotificationLevel::Success,
                title: "Connection successful".to_string(),
                message: "The ERP endpoint accepted the credentials.".to_string(),
            },
            Err(reason) => Self {
                company_id: company_id.to_string(),
                level: NotificationLevel::Error,
                title: "Connection failed".to_string(),
                message: reason.clone(),
            },
        }
    }

    pub fn configuration_saved(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            level: NotificationLevel::Success,
            title: "Configuration saved".to_string(),
            message: "ERP synchronization is enabled.".to_string(),
        }
    }

    pub fn sync_completed(company_id: &str, record: &SyncHistoryRecord) -> Self {
        let level = match record.status {
            SyncRunStatus::Success => NotificationLevel::Success,
            SyncRunStatus::Partial => NotificationLevel::Warning,
            SyncRunStatus::Failed => NotificationLevel::Error,
        };
        let mut message = format!(
            "{} records synced ({} created, {} updated, {} unchanged), {} failed.",
            record.records_synced,
            record.records_created,
            record.records_updated,
            record.records_unchanged,
            record.records_failed
        );
        if let Some(reason) = &record.failure_reason {
            message.push_str(&format!(" Run ended early: {}.", reason.as_str()));
        }

        Self {
            company_id: company_id.to_string(),
            level,
            title: format!("{} sync {}", record.direction.as_str(), record.status.as_str()),
            message,
        }
    }
}

/// Delivery channel for sync notifications
pub trait SyncNotifier: Send + Sync {
    fn notify(&self, notification: SyncNotification);
}

/// Default channel: structured log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl SyncNotifier for TracingNotifier {
    fn notify(&self, notification: SyncNotification) {
        match notification.level {
            NotificationLevel::Success => tracing::info!(
                company_id = %sanitize_for_log(&notification.company_id),
                "🔔 {}: {}",
                notification.title,
                sanitize_for_log(&notification.message)
            ),
            NotificationLevel::Warning => tracing::warn!(
                company_id = %sanitize_for_log(&notification.company_id),
                "🔔 {}: {}",
                notification.title,
                sanitize_for_log(&notification.message)
            ),
            NotificationLevel::Error => tracing::error!(
                company_id = %sanitize_for_log(&notification.company_id),
                "🔔 {}: {}",
                notification.title,
                sanitize_for_log(&notification.message)
            ),
        }
    }
}
