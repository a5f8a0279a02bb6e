pub mod encryption_service;
pub mod erp;
pub mod identity_service;
pub mod notification_service;
pub mod sync_scheduler_service;
pub mod vendor_directory_service;

pub use encryption_service::EncryptionService;
pub use notification_service::{SyncNotifier, TracingNotifier};
pub use sync_scheduler_service::SyncScheduler;
pub use vendor_directory_service::{CompanyRegistry, VendorDirectory};
