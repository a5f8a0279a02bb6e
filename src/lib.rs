pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{erp_integration, health, vendors};
use crate::services::erp::erp_connection_service::ErpConnectionService;
use crate::services::erp::erp_sync_service::SyncExecutor;
use crate::services::notification_service::SyncNotifier;
use crate::services::vendor_directory_service::VendorDirectory;

/// Shared handles every handler works against
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<VendorDirectory>,
    pub connections: Arc<ErpConnectionService>,
    pub executor: Arc<SyncExecutor>,
    pub notifier: Arc<dyn SyncNotifier>,
}

pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    // 🔒 Only whitelisted origins; invalid entries are dropped with an error log
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("❌ Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(middleware::REQUEST_ID_HEADER),
        ]);

    let company_routes = Router::new()
        // Vendor directory
        .route("/vendors", post(vendors::create_vendor).get(vendors::search_vendors))
        .route("/vendors/:vendor_id", get(vendors::get_vendor))
        .route("/vendors/:vendor_id/repair-id", post(vendors::repair_vendor_id))
        // ERP configuration lifecycle
        .route(
            "/erp/config",
            get(erp_integration::get_configuration).put(erp_integration::update_configuration),
        )
        .route("/erp/config/test", post(erp_integration::test_connection))
        .route("/erp/config/save", post(erp_integration::save_configuration))
        .route("/erp/config/disable", post(erp_integration::disable_configuration))
        // Field mapping
        .route("/erp/fields", get(erp_integration::get_field_mapping))
        .route("/erp/fields/:field/toggle", put(erp_integration::toggle_field))
        .route("/erp/field-groups/:group", put(erp_integration::set_field_group))
        // Sync runs
        .route("/erp/sync", post(erp_integration::trigger_sync))
        .route("/erp/sync/cancel", post(erp_integration::cancel_sync))
        .route("/erp/history", get(erp_integration::get_sync_history))
        .route("/erp/status", get(erp_integration::get_sync_status));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(middleware::metrics_handler))
        .nest("/api/companies/:company_id", company_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_id_middleware))
                .layer(axum::middleware::from_fn(middleware::metrics_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
