// ERP Integration Module
// Sync configuration state machine, field mapping, connection registry,
// the HTTP wire adapter and the sync executor

pub mod erp_client;
pub mod erp_connection_service;
pub mod erp_sync_service;
pub mod field_mapping;
pub mod sync_configuration;
pub mod sync_history;

pub use erp_client::{ErpGateway, HttpErpClient};
pub use erp_connection_service::{ErpConnection, ErpConnectionService};
pub use erp_sync_service::{SyncError, SyncExecutor, SyncRunReport};
pub use field_mapping::{FieldGroup, FieldMappingRegistry, VendorField};
pub use sync_configuration::{SyncConfiguration, SyncDirection, SyncFrequency};
pub use sync_history::{SyncHistoryRecord, SyncRunStatus};
