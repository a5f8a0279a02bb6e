use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vendor_sync::config::AppConfig;
use vendor_sync::repositories::ConfigurationRepository;
use vendor_sync::services::encryption_service::EncryptionService;
use vendor_sync::services::erp::erp_client::HttpErpClient;
use vendor_sync::services::erp::erp_connection_service::ErpConnectionService;
use vendor_sync::services::erp::erp_sync_service::SyncExecutor;
use vendor_sync::services::notification_service::{SyncNotifier, TracingNotifier};
use vendor_sync::services::sync_scheduler_service::SyncScheduler;
use vendor_sync::services::vendor_directory_service::{CompanyRegistry, VendorDirectory};
use vendor_sync::{create_app, AppState};

fn open_repository(config: &AppConfig) -> anyhow::Result<Option<Arc<ConfigurationRepository>>> {
    let Some(key) = &config.encryption_key else {
        tracing::warn!("⚠️  ENCRYPTION_KEY not set: saved ERP configurations will not survive a restart");
        return Ok(None);
    };

    let encryption = EncryptionService::new(key)?;
    let repository = ConfigurationRepository::new(&config.config_store_path, encryption)?;
    tracing::info!("🔐 ERP configuration store: {}", config.config_store_path);
    Ok(Some(Arc::new(repository)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO; override with RUST_LOG
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vendor_sync=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    if config.companies.is_empty() {
        tracing::warn!("⚠️  COMPANIES is empty: every company-scoped request will return 404");
    }
    let companies = Arc::new(CompanyRegistry::from_pairs(config.companies.clone()));
    let directory = Arc::new(VendorDirectory::new(companies));

    let connections = Arc::new(ErpConnectionService::new(open_repository(&config)?));
    let restored = connections.restore_saved()?;
    tracing::info!("✅ Restored {} saved ERP configuration(s)", restored);

    let notifier: Arc<dyn SyncNotifier> = Arc::new(TracingNotifier);
    let gateway = Arc::new(HttpErpClient::new(config.sync.request_timeout)?);
    let executor = Arc::new(SyncExecutor::new(
        directory.clone(),
        gateway,
        notifier.clone(),
        config.sync.request_timeout,
        config.sync.run_timeout,
    ));

    if config.sync.scheduler_enabled {
        let scheduler = SyncScheduler::new(connections.clone(), executor.clone(), config.sync.scheduler_tick);
        tokio::spawn(async move {
            scheduler.run().await;
        });
    } else {
        tracing::info!("Sync scheduler disabled; syncs run only on request");
    }

    let state = AppState {
        directory,
        connections,
        executor,
        notifier,
    };
    let app = create_app(state, &config.cors_origins);

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Vendor sync server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
