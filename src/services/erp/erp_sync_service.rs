// ERP Sync Service
// Connection tests and sync runs (push, pull, bidirectional) for one ErpConnection at a time
// Single-flight per connection, cancellable, bounded by a run deadline; one history record per run

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::metrics;
use crate::models::vendor::{VendorId, VendorRecord};
use crate::services::erp::erp_client::{ErpGateway, InboundVendor, OutboundVendor, PushStatus};
use crate::services::erp::erp_connection_service::ErpConnection;
use crate::services::erp::field_mapping::{FieldMappingRegistry, VendorField};
use crate::services::erp::sync_configuration::{ConfigurationError, ErpCredentials, SyncDirection, TestStatus};
use crate::services::erp::sync_history::{FailureReason, SyncHistoryRecord, SyncRunStatus};
use crate::services::identity_service::{self, CompositeId};
use crate::services::notification_service::{SyncNotification, SyncNotifier};
use crate::services::vendor_directory_service::{CompanyVendors, DirectoryError, VendorDirectory};
use crate::utils::log_sanitizer::{sanitize_endpoint_for_log, sanitize_for_log};

/// Payload key an ERP may use to echo the local composite id
const COMPOSITE_ID_KEY: &str = "compositeId";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("ERP sync is not configured or not enabled")]
    NotConfigured,

    #[error("Endpoint and API key are required")]
    MissingCredentials,

    #[error("A connection test or sync is already in progress")]
    OperationInProgress,

    #[error("Could not reach the ERP: {0}")]
    ConnectionFailed(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync timed out")]
    TimedOut,

    #[error("Sync completed with {failed} failed records ({synced} synced)")]
    PartialSyncFailure { synced: usize, failed: usize },
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<ConfigurationError> for SyncError {
    fn from(e: ConfigurationError) -> Self {
        match e {
            ConfigurationError::MissingCredentials => SyncError::MissingCredentials,
            ConfigurationError::OperationInProgress => SyncError::OperationInProgress,
            ConfigurationError::TestRequired | ConfigurationError::InvalidValue(_) => SyncError::NotConfigured,
        }
    }
}

// ============================================================================
// Data Models
// ============================================================================

/// Per-record outcome. Ordered by significance: a vendor touched twice in one
/// run keeps the more significant of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOutcome {
    Unchanged,
    Updated,
    Created,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    /// Composite id when the record was correlated, otherwise `erp:<id>`
    pub vendor: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunReport {
    #[serde(flatten)]
    pub record: SyncHistoryRecord,
    pub failures: Vec<RecordFailure>,
}

impl SyncRunReport {
    /// Treat anything short of a clean run as an error
    pub fn ensure_complete(&self) -> Result<()> {
        match &self.record.failure_reason {
            Some(FailureReason::Cancelled) => return Err(SyncError::Cancelled),
            Some(FailureReason::TimedOut) => return Err(SyncError::TimedOut),
            Some(FailureReason::ConnectionFailed(reason)) => {
                return Err(SyncError::ConnectionFailed(reason.clone()))
            }
            None => {}
        }
        if self.record.records_failed > 0 {
            return Err(SyncError::PartialSyncFailure {
                synced: self.record.records_synced,
                failed: self.record.records_failed,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestReport {
    pub status: TestStatus,
    /// False when the configuration was edited while the test ran
    pub applied: bool,
    pub error: Option<String>,
}

/// Everything a run needs, captured once so the policy is uniform across records
struct RunPlan {
    company_id: String,
    direction: SyncDirection,
    use_erp_vendor_ids: bool,
    fields: FieldMappingRegistry,
    credentials: ErpCredentials,
}

#[derive(Debug, Default)]
struct RunTally {
    outcomes: BTreeMap<String, RecordOutcome>,
    failures: Vec<RecordFailure>,
}

impl RunTally {
    fn record(&mut self, vendor: String, outcome: RecordOutcome) {
        self.outcomes
            .entry(vendor)
            .and_modify(|existing| *existing = (*existing).max(outcome))
            .or_insert(outcome);
    }

    fn fail(&mut self, vendor: String, reason: String) {
        self.record(vendor.clone(), RecordOutcome::Failed);
        self.failures.push(RecordFailure { vendor, reason });
    }

    fn has_failed(&self, vendor: &str) -> bool {
        self.outcomes.get(vendor) == Some(&RecordOutcome::Failed)
    }

    /// (created, updated, unchanged, failed)
    fn counts(&self) -> (usize, usize, usize, usize) {
        self.outcomes.values().fold((0, 0, 0, 0), |(c, u, n, f), outcome| match outcome {
            RecordOutcome::Created => (c + 1, u, n, f),
            RecordOutcome::Updated => (c, u + 1, n, f),
            RecordOutcome::Unchanged => (c, u, n + 1, f),
            RecordOutcome::Failed => (c, u, n, f + 1),
        })
    }
}

struct AppliedInbound {
    composite_id: CompositeId,
    outcome: RecordOutcome,
    /// Recognized fields present in the payload, enabled or not
    payload_fields: BTreeSet<VendorField>,
}

// ============================================================================
// Sync Executor
// ============================================================================

pub struct SyncExecutor {
    directory: Arc<VendorDirectory>,
    gateway: Arc<dyn ErpGateway>,
    notifier: Arc<dyn SyncNotifier>,
    request_timeout: Duration,
    run_timeout: Duration,
}

impl SyncExecutor {
    pub fn new(
        directory: Arc<VendorDirectory>,
        gateway: Arc<dyn ErpGateway>,
        notifier: Arc<dyn SyncNotifier>,
        request_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            gateway,
            notifier,
            request_timeout,
            run_timeout,
        }
    }

    pub fn directory(&self) -> &Arc<VendorDirectory> {
        &self.directory
    }

    // ========================================================================
    // Connection Test
    // ========================================================================

    /// Round-trip to the ERP with the current credentials. The result is
    /// recorded only if the configuration did not change meanwhile.
    pub async fn test_connection(&self, connection: &ErpConnection) -> Result<ConnectionTestReport> {
        let _flight = connection
            .try_begin_flight()
            .ok_or(SyncError::OperationInProgress)?;
        let (revision, credentials) = connection.with_configuration(|config| config.begin_test())?;

        tracing::info!(
            company_id = %sanitize_for_log(connection.company_id()),
            "🔌 Testing ERP connection: {} ({})",
            sanitize_endpoint_for_log(&credentials.endpoint),
            credentials.erp_system.as_str()
        );

        let outcome: std::result::Result<(), String> = tokio::select! {
            result = tokio::time::timeout(self.request_timeout, self.gateway.ping(&credentials)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", self.request_timeout.as_secs())),
            },
            _ = connection.cancelled() => Err("cancelled".to_string()),
        };

        let applied = connection.with_configuration(|config| config.complete_test(revision, outcome.clone()));
        metrics::record_connection_test(outcome.is_ok());

        if applied {
            self.notifier
                .notify(SyncNotification::connection_tested(connection.company_id(), &outcome));
        } else {
            tracing::info!(
                company_id = %sanitize_for_log(connection.company_id()),
                "Discarding connection test result: configuration changed while testing"
            );
        }

        let status = connection.configuration().last_test_status();
        Ok(ConnectionTestReport {
            status,
            applied,
            error: outcome.err(),
        })
    }

    // ========================================================================
    // Sync Run
    // ========================================================================

    /// Run one sync pass. Rejected up front when disabled or already running;
    /// otherwise always appends exactly one history record, even when the run
    /// fails, times out, or is cancelled.
    pub async fn sync_now(&self, connection: &ErpConnection) -> Result<SyncRunReport> {
        let _flight = connection
            .try_begin_flight()
            .ok_or(SyncError::OperationInProgress)?;

        let configuration = connection.configuration();
        if !configuration.enabled() {
            return Err(SyncError::NotConfigured);
        }

        let plan = RunPlan {
            company_id: connection.company_id().to_string(),
            direction: configuration.direction(),
            use_erp_vendor_ids: configuration.use_erp_vendor_ids(),
            fields: connection.field_mapping(),
            credentials: configuration.credentials()?,
        };

        tracing::info!(
            company_id = %sanitize_for_log(&plan.company_id),
            direction = plan.direction.as_str(),
            use_erp_vendor_ids = plan.use_erp_vendor_ids,
            "🔄 Starting ERP sync against {}",
            sanitize_endpoint_for_log(&plan.credentials.endpoint)
        );

        let started_at = Utc::now();
        let mut tally = RunTally::default();

        let interruption = {
            let pass = self.run_pass(&plan, &mut tally);
            tokio::select! {
                result = tokio::time::timeout(self.run_timeout, pass) => match result {
                    Ok(Ok(())) => None,
                    Ok(Err(reason)) => Some(FailureReason::ConnectionFailed(reason)),
                    Err(_) => Some(FailureReason::TimedOut),
                },
                _ = connection.cancelled() => Some(FailureReason::Cancelled),
            }
        };

        let (created, updated, unchanged, failed) = tally.counts();
        let synced = created + updated + unchanged;
        let status = match interruption {
            Some(_) => SyncRunStatus::Failed,
            None => SyncRunStatus::from_counts(synced, failed),
        };
        let finished_at = Utc::now();

        let record = SyncHistoryRecord {
            id: Uuid::new_v4(),
            started_at,
            timestamp: finished_at,
            direction: plan.direction,
            status,
            records_synced: synced,
            records_created: created,
            records_updated: updated,
            records_unchanged: unchanged,
            records_failed: failed,
            endpoint: plan.credentials.endpoint.clone(),
            failure_reason: interruption,
        };

        if status != SyncRunStatus::Failed {
            connection.with_configuration(|config| config.record_sync(finished_at));
        }
        connection.history().append(record.clone());
        metrics::record_sync_run(status.as_str(), created, updated, unchanged, failed);

        match &record.failure_reason {
            Some(reason) => tracing::warn!(
                company_id = %sanitize_for_log(&plan.company_id),
                "⚠️  ERP sync ended early ({}): {} synced, {} failed",
                reason.as_str(),
                synced,
                failed
            ),
            None => tracing::info!(
                company_id = %sanitize_for_log(&plan.company_id),
                "✅ ERP sync {}: {} synced ({} created, {} updated, {} unchanged), {} failed",
                status.as_str(),
                synced,
                created,
                updated,
                unchanged,
                failed
            ),
        }

        self.notifier
            .notify(SyncNotification::sync_completed(&plan.company_id, &record));

        Ok(SyncRunReport {
            record,
            failures: tally.failures,
        })
    }

    /// Records committed before an interruption stay committed
    async fn run_pass(&self, plan: &RunPlan, tally: &mut RunTally) -> std::result::Result<(), String> {
        let mut payload_fields: HashMap<CompositeId, BTreeSet<VendorField>> = HashMap::new();

        if plan.direction.pulls() {
            payload_fields = self.pull(plan, tally).await?;
        }
        if plan.direction.pushes() {
            self.push(plan, &payload_fields, tally).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------------

    async fn pull(
        &self,
        plan: &RunPlan,
        tally: &mut RunTally,
    ) -> std::result::Result<HashMap<CompositeId, BTreeSet<VendorField>>, String> {
        let inbound = tokio::time::timeout(
            self.request_timeout,
            self.gateway.fetch_vendors(&plan.credentials, &plan.company_id),
        )
        .await
        .map_err(|_| format!("fetching vendors timed out after {}s", self.request_timeout.as_secs()))?
        .map_err(|e| e.to_string())?;

        tracing::debug!("Pulled {} vendors from ERP", inbound.len());

        // Missing display name only blocks creation and name-based correlation
        let entity_name = self.directory.entity_name(&plan.company_id).ok();
        let mut payload_fields = HashMap::new();

        for vendor in &inbound {
            let result = self.directory.with_company_mut(&plan.company_id, |vendors| {
                apply_inbound(vendors, plan, entity_name.as_deref(), vendor)
            });

            match result {
                Ok(applied) => {
                    tally.record(applied.composite_id.to_string(), applied.outcome);
                    payload_fields.insert(applied.composite_id, applied.payload_fields);
                }
                Err((composite_id, reason)) => {
                    let key = composite_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| format!("erp:{}", vendor.erp_id));
                    tracing::warn!(
                        "Failed to apply ERP vendor {}: {}",
                        sanitize_for_log(&vendor.erp_id),
                        sanitize_for_log(&reason)
                    );
                    tally.fail(key, reason);
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(payload_fields)
    }

    // ------------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------------

    async fn push(
        &self,
        plan: &RunPlan,
        payload_fields: &HashMap<CompositeId, BTreeSet<VendorField>>,
        tally: &mut RunTally,
    ) {
        let enabled = plan.fields.enabled_fields();

        for snapshot in self.directory.list(&plan.company_id) {
            let vendor_key = snapshot.composite_id.to_string();
            if tally.has_failed(&vendor_key) {
                continue;
            }

            let aligned = self.directory.with_company_mut(&plan.company_id, |vendors| {
                let key = vendors
                    .key_for_composite(&snapshot.composite_id)
                    .ok_or_else(|| DirectoryError::VendorNotFound(vendor_key.clone()))?;
                let key = align_identity(vendors, &key, plan.use_erp_vendor_ids)?;
                vendors
                    .get(&key)
                    .cloned()
                    .ok_or(DirectoryError::VendorNotFound(key))
            });
            let record = match aligned {
                Ok(record) => record,
                Err(e) => {
                    tally.fail(vendor_key, e.to_string());
                    continue;
                }
            };

            let already_pulled = payload_fields.get(&record.composite_id);
            let fields = outbound_fields(&record, &enabled, already_pulled);
            if fields.is_empty() {
                tally.record(vendor_key, RecordOutcome::Unchanged);
                continue;
            }

            let outbound = OutboundVendor {
                id: record.id.as_key(),
                composite_id: vendor_key.clone(),
                company_id: plan.company_id.clone(),
                fields,
            };

            let ack = tokio::time::timeout(
                self.request_timeout,
                self.gateway.push_vendor(&plan.credentials, &outbound),
            )
            .await;

            match ack {
                Ok(Ok(ack)) => {
                    let acknowledged = self.directory.with_company_mut(&plan.company_id, |vendors| {
                        acknowledge_push(vendors, &record.composite_id, ack.erp_id.as_deref(), plan.use_erp_vendor_ids)
                    });
                    match acknowledged {
                        Ok(()) => {
                            let outcome = match ack.status {
                                PushStatus::Created => RecordOutcome::Created,
                                PushStatus::Updated => RecordOutcome::Updated,
                                PushStatus::Unchanged => RecordOutcome::Unchanged,
                            };
                            tally.record(vendor_key, outcome);
                        }
                        Err(e) => tally.fail(vendor_key, e.to_string()),
                    }
                }
                Ok(Err(e)) => tally.fail(vendor_key, e.to_string()),
                Err(_) => tally.fail(
                    vendor_key,
                    format!("push timed out after {}s", self.request_timeout.as_secs()),
                ),
            }

            tokio::task::yield_now().await;
        }
    }
}

// ============================================================================
// Reconciliation (runs under the company's directory lock, never awaits)
// ============================================================================

type InboundFailure = (Option<CompositeId>, String);

/// Canonical key a record should have under the run's precedence policy
fn desired_id(record: &VendorRecord, use_erp_vendor_ids: bool) -> VendorId {
    match (&record.erp_id, use_erp_vendor_ids) {
        (Some(erp_id), true) => VendorId::Erp(erp_id.clone()),
        _ => VendorId::Composite(record.composite_id),
    }
}

fn align_identity(
    vendors: &mut CompanyVendors,
    key: &str,
    use_erp_vendor_ids: bool,
) -> std::result::Result<String, DirectoryError> {
    let desired = vendors
        .get(key)
        .map(|record| desired_id(record, use_erp_vendor_ids))
        .ok_or_else(|| DirectoryError::VendorNotFound(key.to_string()))?;
    vendors.rekey(key, desired)
}

/// How an inbound vendor was matched to a local record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Correlation {
    LinkedErpId,
    EchoedCompositeId,
    DerivedName,
}

/// Find the local record an inbound vendor refers to
fn correlate(
    vendors: &CompanyVendors,
    erp_id: &str,
    inbound: &InboundVendor,
    entity_name: Option<&str>,
) -> Option<(String, Correlation)> {
    if let Some(key) = vendors.key_for_erp_id(erp_id) {
        return Some((key, Correlation::LinkedErpId));
    }

    let echoed = inbound
        .fields
        .get(COMPOSITE_ID_KEY)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<CompositeId>().ok());
    if let Some(key) = echoed.and_then(|id| vendors.key_for_composite(&id)) {
        return Some((key, Correlation::EchoedCompositeId));
    }

    let name = inbound_name(inbound)?;
    let derived = identity_service::generate(name, entity_name?).ok()?;
    vendors
        .key_for_composite(&derived)
        .map(|key| (key, Correlation::DerivedName))
}

fn inbound_name(inbound: &InboundVendor) -> Option<&str> {
    inbound
        .fields
        .get(VendorField::VendorName.as_str())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

fn apply_inbound(
    vendors: &mut CompanyVendors,
    plan: &RunPlan,
    entity_name: Option<&str>,
    inbound: &InboundVendor,
) -> std::result::Result<AppliedInbound, InboundFailure> {
    let erp_id = inbound.erp_id.trim();
    if erp_id.is_empty() {
        return Err((None, "ERP vendor id is empty".to_string()));
    }

    let mut payload_fields = BTreeSet::new();
    let mut accepted: Vec<(VendorField, &Value)> = Vec::new();
    for (name, value) in &inbound.fields {
        let Ok(field) = name.parse::<VendorField>() else {
            continue;
        };
        payload_fields.insert(field);
        if plan.fields.is_enabled(field) {
            accepted.push((field, value));
        }
    }

    let now = Utc::now();

    let Some((key, correlation)) = correlate(vendors, erp_id, inbound, entity_name) else {
        // Unknown to the directory: create it
        let name = inbound_name(inbound)
            .ok_or_else(|| (None, "vendorName is required to create a vendor".to_string()))?;
        let entity_name = entity_name.ok_or_else(|| {
            (None, format!("unknown company {}", plan.company_id))
        })?;
        let composite_id = identity_service::generate(name, entity_name).map_err(|e| (None, e.to_string()))?;

        let mut record = VendorRecord::new(composite_id, &plan.company_id, name);
        for (field, value) in &accepted {
            record
                .apply_field(*field, value)
                .map_err(|e| (Some(composite_id), e.to_string()))?;
        }
        record.erp_id = Some(erp_id.to_string());
        record.id = desired_id(&record, plan.use_erp_vendor_ids);
        record.last_synced_at = Some(now);

        vendors
            .insert(record)
            .map_err(|e| (Some(composite_id), e.to_string()))?;
        return Ok(AppliedInbound {
            composite_id,
            outcome: RecordOutcome::Created,
            payload_fields,
        });
    };

    let current = vendors
        .get(&key)
        .cloned()
        .ok_or_else(|| (None, format!("vendor {} disappeared during sync", key)))?;
    let composite_id = current.composite_id;

    // A record already linked to another ERP vendor is never re-linked by a
    // name or CompositeId match; that would merge two ERP vendors into one.
    let linked_elsewhere = current
        .erp_id
        .as_deref()
        .filter(|linked| correlation != Correlation::LinkedErpId && *linked != erp_id);
    if let Some(linked) = linked_elsewhere {
        let conflict = DirectoryError::KeyConflict(format!(
            "ERP vendor {} matches {} which is already linked to ERP vendor {}",
            sanitize_for_log(erp_id),
            composite_id,
            sanitize_for_log(linked)
        ));
        // Counted against the inbound ERP vendor, not the record it collided with
        return Err((None, conflict.to_string()));
    }

    // Validate every accepted field before touching the directory
    let mut updated = current;
    let mut changed = false;
    for (field, value) in &accepted {
        changed |= updated
            .apply_field(*field, value)
            .map_err(|e| (Some(composite_id), e.to_string()))?;
    }

    let linked = vendors
        .link_erp_id(&key, erp_id)
        .map_err(|e| (Some(composite_id), e.to_string()))?;
    let new_key = align_identity(vendors, &key, plan.use_erp_vendor_ids)
        .map_err(|e| (Some(composite_id), e.to_string()))?;

    let record = vendors
        .get_mut(&new_key)
        .ok_or_else(|| (Some(composite_id), format!("vendor {} disappeared during sync", new_key)))?;
    updated.id = record.id.clone();
    updated.erp_id = record.erp_id.clone();
    updated.last_synced_at = Some(now);
    *record = updated;

    let outcome = if changed || linked || new_key != key {
        RecordOutcome::Updated
    } else {
        RecordOutcome::Unchanged
    };
    Ok(AppliedInbound {
        composite_id,
        outcome,
        payload_fields,
    })
}

/// Enabled fields with a value, minus anything the ERP just sent us
fn outbound_fields(
    record: &VendorRecord,
    enabled: &BTreeSet<VendorField>,
    already_pulled: Option<&BTreeSet<VendorField>>,
) -> BTreeMap<String, Value> {
    enabled
        .iter()
        .filter(|field| already_pulled.map_or(true, |pulled| !pulled.contains(field)))
        .filter_map(|field| {
            record
                .field_value(*field)
                .map(|value| (field.as_str().to_string(), value))
        })
        .collect()
}

fn acknowledge_push(
    vendors: &mut CompanyVendors,
    composite_id: &CompositeId,
    erp_id: Option<&str>,
    use_erp_vendor_ids: bool,
) -> std::result::Result<(), DirectoryError> {
    let key = vendors
        .key_for_composite(composite_id)
        .ok_or_else(|| DirectoryError::VendorNotFound(composite_id.to_string()))?;

    if let Some(erp_id) = erp_id.map(str::trim).filter(|id| !id.is_empty()) {
        vendors.link_erp_id(&key, erp_id)?;
    }
    let key = align_identity(vendors, &key, use_erp_vendor_ids)?;

    if let Some(record) = vendors.get_mut(&key) {
        record.last_synced_at = Some(Utc::now());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::erp::erp_client::{ErpClientError, PushAcknowledgement};
    use crate::services::erp::sync_configuration::ConfigurationUpdate;
    use crate::services::notification_service::TracingNotifier;
    use crate::services::vendor_directory_service::CompanyRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-process ERP: canned pull payload, records pushes
    #[derive(Default)]
    struct FakeErp {
        vendors: Mutex<Vec<InboundVendor>>,
        pushed: Mutex<Vec<OutboundVendor>>,
        fail_push_for: Mutex<BTreeSet<String>>,
        ping_delay: Option<Duration>,
        fetch_delay: Option<Duration>,
        unreachable: bool,
    }

    impl FakeErp {
        fn with_vendors(vendors: Vec<InboundVendor>) -> Self {
            Self {
                vendors: Mutex::new(vendors),
                ..Default::default()
            }
        }

        fn pushed(&self) -> Vec<OutboundVendor> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ErpGateway for FakeErp {
        async fn ping(&self, _credentials: &ErpCredentials) -> crate::services::erp::erp_client::Result<()> {
            if let Some(delay) = self.ping_delay {
                tokio::time::sleep(delay).await;
            }
            if self.unreachable {
                return Err(ErpClientError::InvalidResponse("connection refused".to_string()));
            }
            Ok(())
        }

        async fn fetch_vendors(
            &self,
            _credentials: &ErpCredentials,
            _company_id: &str,
        ) -> crate::services::erp::erp_client::Result<Vec<InboundVendor>> {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.unreachable {
                return Err(ErpClientError::InvalidResponse("connection refused".to_string()));
            }
            Ok(self.vendors.lock().unwrap().clone())
        }

        async fn push_vendor(
            &self,
            _credentials: &ErpCredentials,
            vendor: &OutboundVendor,
        ) -> crate::services::erp::erp_client::Result<PushAcknowledgement> {
            if self.fail_push_for.lock().unwrap().contains(&vendor.composite_id) {
                return Err(ErpClientError::InvalidResponse("rejected".to_string()));
            }
            self.pushed.lock().unwrap().push(vendor.clone());
            Ok(PushAcknowledgement {
                status: PushStatus::Updated,
                erp_id: None,
            })
        }
    }

    fn inbound(erp_id: &str, fields: Value) -> InboundVendor {
        let fields = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        InboundVendor {
            erp_id: erp_id.to_string(),
            fields,
        }
    }

    fn directory() -> Arc<VendorDirectory> {
        let registry = CompanyRegistry::from_pairs([("acme", "Acme Corporation")]);
        Arc::new(VendorDirectory::new(Arc::new(registry)))
    }

    fn executor(directory: Arc<VendorDirectory>, erp: Arc<FakeErp>) -> SyncExecutor {
        SyncExecutor::new(
            directory,
            erp,
            Arc::new(TracingNotifier),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
    }

    fn enabled_connection(direction: SyncDirection, use_erp_vendor_ids: bool) -> ErpConnection {
        let connection = ErpConnection::new("acme");
        connection.with_configuration(|config| {
            config
                .apply(ConfigurationUpdate {
                    endpoint: Some("https://erp.example.com".to_string()),
                    api_key: Some("sk-live-123".to_string()),
                    direction: Some(direction),
                    use_erp_vendor_ids: Some(use_erp_vendor_ids),
                    ..Default::default()
                })
                .unwrap();
            let (revision, _) = config.begin_test().unwrap();
            config.complete_test(revision, Ok(()));
            config.save().unwrap();
        });
        connection
    }

    /// Seed a record keyed by a fixed composite id
    fn seed(directory: &VendorDirectory, composite: CompositeId, name: &str) {
        directory.with_company_mut("acme", |vendors| {
            vendors.insert(VendorRecord::new(composite, "acme", name)).unwrap();
        });
    }

    fn fixed_id() -> CompositeId {
        CompositeId::from_parts(0xAAAA_AAAA, 0xBBBB_BBBB)
    }

    #[tokio::test]
    async fn test_sync_requires_enabled_configuration() {
        let directory = directory();
        let executor = executor(directory, Arc::new(FakeErp::default()));
        let connection = ErpConnection::new("acme");

        assert_eq!(executor.sync_now(&connection).await.unwrap_err(), SyncError::NotConfigured);
        assert!(connection.history().is_empty());
    }

    #[tokio::test]
    async fn test_connection_test_missing_credentials() {
        let executor = executor(directory(), Arc::new(FakeErp::default()));
        let connection = ErpConnection::new("acme");
        connection.with_configuration(|config| config.set_endpoint("https://erp.example.com").unwrap());

        assert_eq!(
            executor.test_connection(&connection).await.unwrap_err(),
            SyncError::MissingCredentials
        );
    }

    #[tokio::test]
    async fn test_connection_test_then_save() {
        let executor = executor(directory(), Arc::new(FakeErp::default()));
        let connection = ErpConnection::new("acme");
        connection.with_configuration(|config| {
            config.set_endpoint("https://erp.example.com").unwrap();
            config.set_api_key(crate::services::erp::sync_configuration::ApiKey::new("k"));
            assert_eq!(config.save(), Err(ConfigurationError::TestRequired));
        });

        let report = executor.test_connection(&connection).await.unwrap();
        assert_eq!(report.status, TestStatus::Success);
        assert!(report.applied);
        connection.with_configuration(|config| config.save()).unwrap();
        assert!(connection.configuration().enabled());
    }

    #[tokio::test]
    async fn test_unreachable_erp_fails_test() {
        let erp = FakeErp {
            unreachable: true,
            ..Default::default()
        };
        let executor = executor(directory(), Arc::new(erp));
        let connection = ErpConnection::new("acme");
        connection.with_configuration(|config| {
            config.set_endpoint("https://erp.example.com").unwrap();
            config.set_api_key(crate::services::erp::sync_configuration::ApiKey::new("k"));
        });

        let report = executor.test_connection(&connection).await.unwrap();
        assert_eq!(report.status, TestStatus::Error);
        assert!(report.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_pull_leaves_disabled_fields_untouched() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        directory.with_company_mut("acme", |vendors| {
            vendors
                .get_mut(&fixed_id().to_string())
                .unwrap()
                .apply_field(VendorField::Notes, &json!("local note"))
                .unwrap();
        });

        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "XYZ123",
            json!({
                "compositeId": "AAAAAAAA-BBBBBBBB",
                "notes": "erp note",
                "category": "Energy"
            }),
        )]));
        let executor = executor(directory.clone(), erp);
        let connection = enabled_connection(SyncDirection::Pull, false);
        connection.with_field_mapping(|mapping| mapping.set(VendorField::Notes, false));

        let report = executor.sync_now(&connection).await.unwrap();
        assert_eq!(report.record.records_updated, 1);

        let record = directory.find_by_id("acme", "AAAAAAAA-BBBBBBBB").unwrap();
        assert_eq!(record.field_value(VendorField::Notes), Some(json!("local note")));
        assert_eq!(record.category.as_deref(), Some("Energy"));
    }

    #[tokio::test]
    async fn test_precedence_keeps_composite_canonical() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "XYZ123",
            json!({ "compositeId": "AAAAAAAA-BBBBBBBB", "location": "Houston" }),
        )]));
        let executor = executor(directory.clone(), erp);

        executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();

        let record = directory.find_by_id("acme", "AAAAAAAA-BBBBBBBB").unwrap();
        assert_eq!(record.id, VendorId::Composite(fixed_id()));
        assert_eq!(record.erp_id.as_deref(), Some("XYZ123"));
        assert_eq!(record.location.as_deref(), Some("Houston"));
        assert_eq!(directory.count("acme"), 1);
    }

    #[tokio::test]
    async fn test_precedence_promotes_erp_id() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "XYZ123",
            json!({ "compositeId": "AAAAAAAA-BBBBBBBB", "location": "Houston" }),
        )]));
        let executor = executor(directory.clone(), erp);

        executor
            .sync_now(&enabled_connection(SyncDirection::Pull, true))
            .await
            .unwrap();

        let record = directory.find_by_id("acme", "XYZ123").unwrap();
        assert_eq!(record.id, VendorId::Erp("XYZ123".to_string()));
        assert_eq!(record.composite_id, fixed_id());
        // Composite id still resolves as a secondary key
        assert_eq!(directory.find_by_id("acme", "AAAAAAAA-BBBBBBBB").unwrap().id, record.id);
    }

    #[tokio::test]
    async fn test_pull_creates_and_correlates_by_name() {
        let directory = directory();
        let existing = directory.create("Blue Freight", "acme").unwrap();
        let erp = Arc::new(FakeErp::with_vendors(vec![
            inbound("E-1", json!({ "vendorName": "blue freight ", "status": "inactive" })),
            inbound("E-2", json!({ "vendorName": "Eco Gas", "complianceScore": 72 })),
        ]));
        let executor = executor(directory.clone(), erp);

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();
        assert_eq!(report.record.records_created, 1);
        assert_eq!(report.record.records_updated, 1);

        let updated = directory.find_by_id("acme", &existing.id.as_key()).unwrap();
        assert_eq!(updated.erp_id.as_deref(), Some("E-1"));
        let created = directory.find_by_id("acme", "E-2").unwrap();
        assert_eq!(created.compliance_score, 72);
        assert_eq!(
            created.composite_id,
            identity_service::generate("Eco Gas", "Acme Corporation").unwrap()
        );
    }

    #[tokio::test]
    async fn test_second_erp_vendor_with_same_name_is_rejected() {
        let directory = directory();
        let erp = Arc::new(FakeErp::with_vendors(vec![
            inbound("E-1", json!({ "vendorName": "Eco Gas", "category": "Energy" })),
            inbound("E-2", json!({ "vendorName": "eco gas ", "category": "Logistics" })),
        ]));
        let executor = executor(directory.clone(), erp);

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();

        assert_eq!(report.record.status, SyncRunStatus::Partial);
        assert_eq!(report.record.records_created, 1);
        assert_eq!(report.record.records_failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].vendor, "erp:E-2");
        assert!(report.failures[0].reason.contains("already linked"));

        // The first link and its data are intact
        assert_eq!(directory.count("acme"), 1);
        let record = directory.find_by_id("acme", "E-1").unwrap();
        assert_eq!(record.erp_id.as_deref(), Some("E-1"));
        assert_eq!(record.category.as_deref(), Some("Energy"));
        assert!(directory.find_by_id("acme", "E-2").is_none());
    }

    #[tokio::test]
    async fn test_echoed_composite_id_cannot_steal_linked_record() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        directory.with_company_mut("acme", |vendors| {
            vendors.link_erp_id(&fixed_id().to_string(), "XYZ123").unwrap();
        });
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "OTHER-9",
            json!({ "compositeId": "AAAAAAAA-BBBBBBBB", "location": "Houston" }),
        )]));
        let executor = executor(directory.clone(), erp);

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();

        assert_eq!(report.record.status, SyncRunStatus::Failed);
        assert_eq!(report.record.records_failed, 1);
        let record = directory.find_by_id("acme", "XYZ123").unwrap();
        assert_eq!(record.composite_id, fixed_id());
        assert!(record.location.is_none());
    }

    #[tokio::test]
    async fn test_padded_erp_id_matches_its_link() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        directory.with_company_mut("acme", |vendors| {
            vendors.link_erp_id(&fixed_id().to_string(), "XYZ123").unwrap();
        });
        // No name and no echoed id: only the link can match it
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(" XYZ123 ", json!({ "location": "Houston" }))]));
        let executor = executor(directory.clone(), erp);

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();

        assert_eq!(report.record.records_updated, 1);
        assert_eq!(report.record.records_failed, 0);
        let record = directory.find_by_id("acme", "XYZ123").unwrap();
        assert_eq!(record.composite_id, fixed_id());
        assert_eq!(record.location.as_deref(), Some("Houston"));
        assert_eq!(directory.count("acme"), 1);
    }

    #[tokio::test]
    async fn test_precedence_flip_restores_composite_key() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "XYZ123",
            json!({ "compositeId": "AAAAAAAA-BBBBBBBB", "location": "Houston" }),
        )]));
        let executor = executor(directory.clone(), erp);

        executor
            .sync_now(&enabled_connection(SyncDirection::Pull, true))
            .await
            .unwrap();
        assert_eq!(
            directory.find_by_id("acme", "XYZ123").unwrap().id,
            VendorId::Erp("XYZ123".to_string())
        );

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Pull, false))
            .await
            .unwrap();
        assert_eq!(report.record.records_updated, 1);

        let record = directory.find_by_id("acme", "AAAAAAAA-BBBBBBBB").unwrap();
        assert_eq!(record.id, VendorId::Composite(fixed_id()));
        assert_eq!(record.erp_id.as_deref(), Some("XYZ123"));
        // ERP id is now a secondary key on the same record
        assert_eq!(directory.find_by_id("acme", "XYZ123").unwrap().id, record.id);
        assert_eq!(directory.count("acme"), 1);
    }

    #[tokio::test]
    async fn test_partial_run_accounting() {
        let directory = directory();
        let mut payload = Vec::new();
        for i in 0..8 {
            payload.push(inbound(&format!("E-{}", i), json!({ "vendorName": format!("Vendor {}", i) })));
        }
        // No name to create from, and an invalid score
        payload.push(inbound("E-8", json!({ "category": "Energy" })));
        payload.push(inbound("E-9", json!({ "vendorName": "Vendor 9", "complianceScore": 140 })));

        let erp = Arc::new(FakeErp::with_vendors(payload));
        let executor = executor(directory.clone(), erp);
        let connection = enabled_connection(SyncDirection::Pull, false);

        let report = executor.sync_now(&connection).await.unwrap();
        assert_eq!(report.record.status, SyncRunStatus::Partial);
        assert_eq!(report.record.records_synced, 8);
        assert_eq!(report.record.records_failed, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(
            report.ensure_complete(),
            Err(SyncError::PartialSyncFailure { synced: 8, failed: 2 })
        );

        assert_eq!(connection.history().len(), 1);
        let summary = connection.history().status_summary();
        assert_eq!(summary.status, Some(SyncRunStatus::Partial));
        assert_eq!(summary.records_synced, 8);
        assert_eq!(summary.records_failed, 2);
        assert_eq!(directory.count("acme"), 8);
    }

    #[tokio::test]
    async fn test_push_sends_only_enabled_fields() {
        let directory = directory();
        let vendor = directory
            .create_vendor(
                "acme",
                &crate::models::vendor::CreateVendorRequest {
                    name: "Eco Gas".to_string(),
                    category: Some("Energy".to_string()),
                    location: Some("Houston".to_string()),
                    compliance_score: Some(90),
                },
            )
            .unwrap();
        let erp = Arc::new(FakeErp::default());
        let executor = executor(directory.clone(), erp.clone());
        let connection = enabled_connection(SyncDirection::Push, false);
        connection.with_field_mapping(|mapping| mapping.set(VendorField::Location, false));

        let report = executor.sync_now(&connection).await.unwrap();
        assert_eq!(report.record.status, SyncRunStatus::Success);

        let pushed = erp.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].id, vendor.id.as_key());
        assert_eq!(pushed[0].company_id, "acme");
        assert_eq!(pushed[0].fields["category"], "Energy");
        assert!(!pushed[0].fields.contains_key("location"));
    }

    #[tokio::test]
    async fn test_bidirectional_pushes_only_fields_not_pulled() {
        let directory = directory();
        seed(&directory, fixed_id(), "Eco Gas");
        directory.with_company_mut("acme", |vendors| {
            let record = vendors.get_mut(&fixed_id().to_string()).unwrap();
            record.location = Some("Houston".to_string());
        });
        let erp = Arc::new(FakeErp::with_vendors(vec![inbound(
            "XYZ123",
            json!({ "compositeId": "AAAAAAAA-BBBBBBBB", "category": "Energy", "vendorName": "Eco Gas" }),
        )]));
        let executor = executor(directory.clone(), erp.clone());

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Bidirectional, false))
            .await
            .unwrap();
        assert_eq!(report.record.records_synced, 1);

        let pushed = erp.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].fields["location"], "Houston");
        assert!(!pushed[0].fields.contains_key("category"));
        assert!(!pushed[0].fields.contains_key("vendorName"));
    }

    #[tokio::test]
    async fn test_push_failures_are_counted_per_record() {
        let directory = directory();
        let ok = directory.create("Eco Gas", "acme").unwrap();
        let bad = directory.create("Blue Freight", "acme").unwrap();
        let erp = Arc::new(FakeErp::default());
        erp.fail_push_for.lock().unwrap().insert(bad.composite_id.to_string());
        let executor = executor(directory, erp.clone());

        let report = executor
            .sync_now(&enabled_connection(SyncDirection::Push, false))
            .await
            .unwrap();
        assert_eq!(report.record.status, SyncRunStatus::Partial);
        assert_eq!(report.record.records_updated, 1);
        assert_eq!(report.record.records_failed, 1);
        assert_eq!(erp.pushed()[0].composite_id, ok.composite_id.to_string());
    }

    #[tokio::test]
    async fn test_unreachable_erp_records_failed_run() {
        let erp = FakeErp {
            unreachable: true,
            ..Default::default()
        };
        let executor = executor(directory(), Arc::new(erp));
        let connection = enabled_connection(SyncDirection::Pull, false);

        let report = executor.sync_now(&connection).await.unwrap();
        assert_eq!(report.record.status, SyncRunStatus::Failed);
        assert!(matches!(
            report.record.failure_reason,
            Some(FailureReason::ConnectionFailed(_))
        ));
        assert!(connection.configuration().enabled());
        assert_eq!(connection.history().len(), 1);

        // Status surface agrees with the configuration: nothing was synced
        let summary = connection.history().status_summary();
        assert_eq!(summary.status, Some(SyncRunStatus::Failed));
        assert!(summary.last_synced_at.is_none());
        assert!(connection.configuration().last_synced_at().is_none());
    }

    #[tokio::test]
    async fn test_single_flight_rejects_second_run() {
        let erp = FakeErp {
            fetch_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let executor = Arc::new(executor(directory(), Arc::new(erp)));
        let connection = Arc::new(enabled_connection(SyncDirection::Pull, false));

        let first = {
            let executor = executor.clone();
            let connection = connection.clone();
            tokio::spawn(async move { executor.sync_now(&connection).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            executor.sync_now(&connection).await.unwrap_err(),
            SyncError::OperationInProgress
        );
        assert_eq!(
            executor.test_connection(&connection).await.unwrap_err(),
            SyncError::OperationInProgress
        );

        first.await.unwrap().unwrap();
        assert_eq!(connection.history().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_records_failed_entry() {
        let erp = FakeErp {
            fetch_delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let executor = Arc::new(executor(directory(), Arc::new(erp)));
        let connection = Arc::new(enabled_connection(SyncDirection::Pull, false));

        let run = {
            let executor = executor.clone();
            let connection = connection.clone();
            tokio::spawn(async move { executor.sync_now(&connection).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connection.cancel());

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.record.status, SyncRunStatus::Failed);
        assert_eq!(report.record.failure_reason, Some(FailureReason::Cancelled));
        assert_eq!(report.ensure_complete(), Err(SyncError::Cancelled));
        assert!(connection.configuration().enabled());
    }

    #[tokio::test]
    async fn test_run_deadline() {
        let erp = FakeErp {
            fetch_delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let executor = SyncExecutor::new(
            directory(),
            Arc::new(erp),
            Arc::new(TracingNotifier),
            Duration::from_secs(30),
            Duration::from_millis(100),
        );
        let connection = enabled_connection(SyncDirection::Pull, false);

        let report = executor.sync_now(&connection).await.unwrap();
        assert_eq!(report.record.failure_reason, Some(FailureReason::TimedOut));
        assert!(connection.configuration().enabled());
    }

    #[tokio::test]
    async fn test_edit_during_test_discards_result() {
        let erp = FakeErp {
            ping_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let executor = Arc::new(executor(directory(), Arc::new(erp)));
        let connection = Arc::new(ErpConnection::new("acme"));
        connection.with_configuration(|config| {
            config.set_endpoint("https://erp.example.com").unwrap();
            config.set_api_key(crate::services::erp::sync_configuration::ApiKey::new("k"));
        });

        let test = {
            let executor = executor.clone();
            let connection = connection.clone();
            tokio::spawn(async move { executor.test_connection(&connection).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        connection.with_configuration(|config| config.set_endpoint("https://other.example.com").unwrap());

        let report = test.await.unwrap().unwrap();
        assert!(!report.applied);
        assert_eq!(connection.configuration().last_test_status(), TestStatus::Untested);
    }

    #[test]
    fn test_tally_keeps_most_significant_outcome() {
        let mut tally = RunTally::default();
        tally.record("A".into(), RecordOutcome::Updated);
        tally.record("A".into(), RecordOutcome::Unchanged);
        tally.record("B".into(), RecordOutcome::Created);
        tally.fail("C".into(), "boom".into());
        tally.record("C".into(), RecordOutcome::Updated);

        assert_eq!(tally.counts(), (1, 1, 0, 1));
    }
}
