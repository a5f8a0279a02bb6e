// Vendor Directory API Handlers
// Create, search, fetch and identity repair for a company's vendors

use axum::{
    extract::{rejection::{JsonRejection, QueryRejection}, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::vendor::{CreateVendorRequest, SearchVendorsQuery, VendorListResponse};
use crate::utils::log_sanitizer::sanitize_for_log;
use crate::AppState;

/// Create a vendor; its CompositeId is derived from the name and the company's entity name
/// POST /api/companies/:company_id/vendors
pub async fn create_vendor(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    payload: std::result::Result<Json<CreateVendorRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload?;
    request.validate()?;

    let record = state.directory.create_vendor(&company_id, &request)?;

    tracing::info!(
        "Vendor created: {} ({}) for company {}",
        sanitize_for_log(&record.name),
        record.id,
        sanitize_for_log(&company_id)
    );

    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/companies/:company_id/vendors?q=&status=&min_compliance_score=
pub async fn search_vendors(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    query: std::result::Result<Query<SearchVendorsQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let Query(query) = query?;
    // 404 for companies the registry does not know
    state.directory.entity_name(&company_id)?;

    let vendors = state.directory.search(&company_id, &query);
    let total = vendors.len();

    Ok(Json(VendorListResponse { vendors, total }))
}

/// Lookup by canonical key, CompositeId, or linked ERP id
/// GET /api/companies/:company_id/vendors/:vendor_id
pub async fn get_vendor(
    State(state): State<AppState>,
    Path((company_id, vendor_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    state
        .directory
        .find_by_id(&company_id, &vendor_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Vendor not found: {}", sanitize_for_log(&vendor_id))))
}

/// Recompute a vendor's CompositeId from its current name
/// POST /api/companies/:company_id/vendors/:vendor_id/repair-id
pub async fn repair_vendor_id(
    State(state): State<AppState>,
    Path((company_id, vendor_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let record = state.directory.repair_id(&company_id, &vendor_id)?;
    Ok(Json(record))
}
