use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::erp::field_mapping::{FieldGroup, FieldMappingRegistry, VendorField};
use crate::services::erp::sync_configuration::{
    ConfigState, ConfigurationUpdate, ErpSystem, SyncConfiguration, SyncDirection, SyncFrequency, TestStatus,
};
use crate::services::erp::sync_history::SyncHistoryRecord;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration as shown to the UI. The API key is never echoed back.
#[derive(Debug, Serialize)]
pub struct ConfigurationView {
    pub erp_system: ErpSystem,
    pub direction: SyncDirection,
    pub frequency: SyncFrequency,
    pub endpoint: String,
    pub api_key_set: bool,
    pub enabled: bool,
    pub use_erp_vendor_ids: bool,
    pub state: ConfigState,
    pub last_test_status: TestStatus,
    pub last_test_error: Option<String>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub operation_in_progress: bool,
}

impl ConfigurationView {
    pub fn new(config: &SyncConfiguration, operation_in_progress: bool) -> Self {
        Self {
            erp_system: config.erp_system(),
            direction: config.direction(),
            frequency: config.frequency(),
            endpoint: config.endpoint().to_string(),
            api_key_set: config.has_api_key(),
            enabled: config.enabled(),
            use_erp_vendor_ids: config.use_erp_vendor_ids(),
            state: config.state(),
            last_test_status: config.last_test_status(),
            last_test_error: config.last_test_error().map(str::to_string),
            last_tested_at: config.last_tested_at(),
            last_synced_at: config.last_synced_at(),
            operation_in_progress,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateConfigurationRequest {
    pub erp_system: Option<ErpSystem>,
    pub direction: Option<SyncDirection>,
    pub frequency: Option<SyncFrequency>,
    #[validate(length(max = 2048, message = "Endpoint is too long"))]
    pub endpoint: Option<String>,
    #[validate(length(max = 4096, message = "API key is too long"))]
    pub api_key: Option<String>,
    pub use_erp_vendor_ids: Option<bool>,
}

impl From<UpdateConfigurationRequest> for ConfigurationUpdate {
    fn from(request: UpdateConfigurationRequest) -> Self {
        ConfigurationUpdate {
            erp_system: request.erp_system,
            direction: request.direction,
            frequency: request.frequency,
            endpoint: request.endpoint,
            api_key: request.api_key,
            use_erp_vendor_ids: request.use_erp_vendor_ids,
        }
    }
}

// ============================================================================
// Field Mapping
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FieldMappingEntry {
    pub field: VendorField,
    pub group: FieldGroup,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct FieldMappingResponse {
    pub fields: Vec<FieldMappingEntry>,
    pub enabled_count: usize,
}

impl From<&FieldMappingRegistry> for FieldMappingResponse {
    fn from(registry: &FieldMappingRegistry) -> Self {
        let fields: Vec<FieldMappingEntry> = registry
            .entries()
            .into_iter()
            .map(|(field, enabled)| FieldMappingEntry {
                field,
                group: field.group(),
                enabled,
            })
            .collect();
        let enabled_count = fields.iter().filter(|f| f.enabled).count();
        Self { fields, enabled_count }
    }
}

#[derive(Debug, Serialize)]
pub struct ToggleFieldResponse {
    pub field: VendorField,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetGroupRequest {
    pub enabled: bool,
}

// ============================================================================
// Sync Runs / History
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SyncHistoryResponse {
    pub records: Vec<SyncHistoryRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelSyncResponse {
    pub cancelled: bool,
}
