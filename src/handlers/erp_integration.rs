// ERP Integration API Handlers
// Configuration lifecycle (edit, test, save, disable), field mapping,
// manual sync runs, cancellation and history for one company's ERP link

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::sync::{
    CancelSyncResponse, ConfigurationView, FieldMappingResponse, SetGroupRequest, SyncHistoryResponse,
    ToggleFieldResponse, UpdateConfigurationRequest,
};
use crate::services::erp::erp_connection_service::ErpConnection;
use crate::services::erp::field_mapping::{FieldGroup, VendorField};
use crate::services::notification_service::SyncNotification;
use crate::utils::log_sanitizer::{redact_sensitive, sanitize_for_log};
use crate::AppState;
use std::sync::Arc;

/// ERP settings only exist for companies the registry knows about
fn connection_for(state: &AppState, company_id: &str) -> Result<Arc<ErpConnection>> {
    state.directory.entity_name(company_id)?;
    Ok(state.connections.connection(company_id))
}

fn view_of(connection: &ErpConnection) -> ConfigurationView {
    ConfigurationView::new(&connection.configuration(), connection.is_busy())
}

// ============================================================================
// Configuration Lifecycle
// ============================================================================

/// GET /api/companies/:company_id/erp/config
pub async fn get_configuration(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;
    Ok(Json(view_of(&connection)))
}

/// Partial update. Any changed value other than `use_erp_vendor_ids`
/// invalidates the last test and turns the configuration off until saved again.
/// PUT /api/companies/:company_id/erp/config
pub async fn update_configuration(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    payload: std::result::Result<Json<UpdateConfigurationRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload?;
    request.validate()?;
    connection_for(&state, &company_id)?;

    if let Some(api_key) = &request.api_key {
        tracing::info!(
            "ERP API key updated for company {}: {}",
            sanitize_for_log(&company_id),
            redact_sensitive(api_key)
        );
    }

    state.connections.update_configuration(&company_id, request.into())?;
    let connection = state.connections.connection(&company_id);

    Ok(Json(view_of(&connection)))
}

/// POST /api/companies/:company_id/erp/config/test
pub async fn test_connection(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;

    let report = state.executor.test_connection(&connection).await?;
    // A test always drops the saved state, so the store follows
    state.connections.persist(&connection);

    Ok(Json(report))
}

/// Only a successfully tested configuration can be saved
/// POST /api/companies/:company_id/erp/config/save
pub async fn save_configuration(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;
    state.connections.save(&company_id)?;
    state.notifier.notify(SyncNotification::configuration_saved(&company_id));

    Ok(Json(view_of(&connection)))
}

/// POST /api/companies/:company_id/erp/config/disable
pub async fn disable_configuration(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.directory.entity_name(&company_id)?;
    state
        .connections
        .disable(&company_id)
        .ok_or_else(|| AppError::NotFound("No ERP configuration for this company".to_string()))?;

    let connection = state.connections.connection(&company_id);
    Ok(Json(view_of(&connection)))
}

// ============================================================================
// Field Mapping
// ============================================================================

/// GET /api/companies/:company_id/erp/fields
pub async fn get_field_mapping(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;
    Ok(Json(FieldMappingResponse::from(&connection.field_mapping())))
}

/// PUT /api/companies/:company_id/erp/fields/:field/toggle
pub async fn toggle_field(
    State(state): State<AppState>,
    Path((company_id, field)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let field: VendorField = field.parse()?;
    connection_for(&state, &company_id)?;

    let enabled = state.connections.toggle_field(&company_id, field);
    tracing::debug!(
        "Field {} {} for company {}",
        field,
        if enabled { "enabled" } else { "disabled" },
        sanitize_for_log(&company_id)
    );

    Ok(Json(ToggleFieldResponse { field, enabled }))
}

/// PUT /api/companies/:company_id/erp/field-groups/:group
pub async fn set_field_group(
    State(state): State<AppState>,
    Path((company_id, group)): Path<(String, FieldGroup)>,
    payload: std::result::Result<Json<SetGroupRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload?;
    connection_for(&state, &company_id)?;

    let mapping = state.connections.set_group(&company_id, group, request.enabled);
    Ok(Json(FieldMappingResponse::from(&mapping)))
}

// ============================================================================
// Sync Operations
// ============================================================================

/// Run one sync now. A partial run still answers 200; the report carries
/// the per-record failures.
/// POST /api/companies/:company_id/erp/sync
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;

    tracing::info!("Manual ERP sync requested for company {}", sanitize_for_log(&company_id));
    let report = state.executor.sync_now(&connection).await?;
    state.connections.record_run(&connection, report.record.status);

    Ok(Json(report))
}

/// POST /api/companies/:company_id/erp/sync/cancel
pub async fn cancel_sync(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.directory.entity_name(&company_id)?;
    let cancelled = state
        .connections
        .get(&company_id)
        .map(|connection| connection.cancel())
        .unwrap_or(false);

    Ok(Json(CancelSyncResponse { cancelled }))
}

/// Newest first
/// GET /api/companies/:company_id/erp/history
pub async fn get_sync_history(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;
    let records = connection.history().records_desc();
    let total = records.len();

    Ok(Json(SyncHistoryResponse { records, total }))
}

/// GET /api/companies/:company_id/erp/status
pub async fn get_sync_status(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = connection_for(&state, &company_id)?;
    Ok(Json(connection.history().status_summary()))
}
