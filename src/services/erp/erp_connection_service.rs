// ERP Connection Service
// One ErpConnection per company: configuration, field mapping, history, and the
// per-connection single-flight guard. Connections share no mutable state.

use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::repositories::configuration_repo::{ConfigurationRepository, RepositoryError};
use crate::services::erp::field_mapping::{FieldGroup, FieldMappingRegistry, VendorField};
use crate::services::erp::sync_configuration::{
    ConfigurationError, ConfigurationUpdate, SyncConfiguration,
};
use crate::services::erp::sync_history::{SyncHistoryLog, SyncRunStatus};
use crate::utils::log_sanitizer::sanitize_for_log;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ErpConnectionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to persist configuration: {0}")]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, ErpConnectionError>;

// ============================================================================
// ERP Connection
// ============================================================================

pub struct ErpConnection {
    company_id: String,
    configuration: RwLock<SyncConfiguration>,
    field_mapping: RwLock<FieldMappingRegistry>,
    history: SyncHistoryLog,
    /// Held for the duration of a connection test or sync run
    flight: Mutex<()>,
    cancel_tx: watch::Sender<bool>,
}

impl ErpConnection {
    pub fn new(company_id: impl Into<String>) -> Self {
        Self::with_state(company_id, SyncConfiguration::new(), FieldMappingRegistry::default())
    }

    pub fn with_state(
        company_id: impl Into<String>,
        configuration: SyncConfiguration,
        field_mapping: FieldMappingRegistry,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            company_id: company_id.into(),
            configuration: RwLock::new(configuration),
            field_mapping: RwLock::new(field_mapping),
            history: SyncHistoryLog::new(),
            flight: Mutex::new(()),
            cancel_tx,
        }
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    /// Snapshot of the current configuration
    pub fn configuration(&self) -> SyncConfiguration {
        self.configuration
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run a synchronous edit against the configuration
    pub fn with_configuration<R>(&self, f: impl FnOnce(&mut SyncConfiguration) -> R) -> R {
        let mut configuration = self.configuration.write().unwrap_or_else(|e| e.into_inner());
        f(&mut configuration)
    }

    pub fn field_mapping(&self) -> FieldMappingRegistry {
        *self.field_mapping.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_field_mapping<R>(&self, f: impl FnOnce(&mut FieldMappingRegistry) -> R) -> R {
        let mut mapping = self.field_mapping.write().unwrap_or_else(|e| e.into_inner());
        f(&mut mapping)
    }

    pub fn history(&self) -> &SyncHistoryLog {
        &self.history
    }

    /// Claim the single-flight slot. `None` when a test or sync is already running.
    pub fn try_begin_flight(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.flight.try_lock().ok()?;
        self.cancel_tx.send_replace(false);
        Some(guard)
    }

    pub fn is_busy(&self) -> bool {
        self.flight.try_lock().is_err()
    }

    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Resolves once `cancel` is called for the current flight
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Signal the in-flight run to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        if !self.is_busy() {
            return false;
        }
        self.cancel_tx.send_replace(true);
        true
    }
}

// ============================================================================
// Connection Registry
// ============================================================================

pub struct ErpConnectionService {
    connections: DashMap<String, Arc<ErpConnection>>,
    repository: Option<Arc<ConfigurationRepository>>,
}

impl ErpConnectionService {
    pub fn new(repository: Option<Arc<ConfigurationRepository>>) -> Self {
        Self {
            connections: DashMap::new(),
            repository,
        }
    }

    /// Load saved configurations. Returns how many were restored.
    pub fn restore_saved(&self) -> Result<usize> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };

        let restored = repository.load_all()?;
        let count = restored.len();
        for saved in restored {
            tracing::info!(
                "Restored ERP configuration for company {}",
                sanitize_for_log(&saved.company_id)
            );
            let connection = ErpConnection::with_state(
                saved.company_id.clone(),
                saved.configuration,
                saved.field_mapping,
            );
            self.connections.insert(saved.company_id, Arc::new(connection));
        }
        Ok(count)
    }

    /// Existing connection, or a fresh unconfigured one
    pub fn connection(&self, company_id: &str) -> Arc<ErpConnection> {
        self.connections
            .entry(company_id.to_string())
            .or_insert_with(|| Arc::new(ErpConnection::new(company_id)))
            .clone()
    }

    pub fn get(&self, company_id: &str) -> Option<Arc<ErpConnection>> {
        self.connections.get(company_id).map(|c| c.value().clone())
    }

    pub fn enabled_connections(&self) -> Vec<Arc<ErpConnection>> {
        let mut enabled: Vec<Arc<ErpConnection>> = self
            .connections
            .iter()
            .filter(|c| c.configuration().enabled())
            .map(|c| c.value().clone())
            .collect();
        enabled.sort_by(|a, b| a.company_id().cmp(b.company_id()));
        enabled
    }

    pub fn update_configuration(&self, company_id: &str, update: ConfigurationUpdate) -> Result<SyncConfiguration> {
        let connection = self.connection(company_id);
        let (changed, was_enabled) = connection.with_configuration(|config| {
            let was_enabled = config.enabled();
            config.apply(update).map(|changed| (changed, was_enabled))
        })?;

        if changed {
            tracing::info!(
                "ERP configuration edited for company {}",
                sanitize_for_log(company_id)
            );
            if was_enabled {
                self.persist(&connection);
            }
        }
        Ok(connection.configuration())
    }

    pub fn save(&self, company_id: &str) -> Result<SyncConfiguration> {
        let connection = self.connection(company_id);
        connection.with_configuration(|config| config.save())?;

        if let Some(repository) = &self.repository {
            repository.store(company_id, &connection.configuration(), &connection.field_mapping())?;
        }

        tracing::info!(
            "✅ ERP configuration saved and enabled for company {}",
            sanitize_for_log(company_id)
        );
        Ok(connection.configuration())
    }

    pub fn disable(&self, company_id: &str) -> Option<SyncConfiguration> {
        let connection = self.get(company_id)?;
        if connection.with_configuration(|config| config.disable()) {
            tracing::info!("ERP sync disabled for company {}", sanitize_for_log(company_id));
            self.persist(&connection);
        }
        Some(connection.configuration())
    }

    pub fn toggle_field(&self, company_id: &str, field: VendorField) -> bool {
        let connection = self.connection(company_id);
        let enabled = connection.with_field_mapping(|mapping| mapping.toggle(field));
        self.persist(&connection);
        enabled
    }

    pub fn set_group(&self, company_id: &str, group: FieldGroup, enabled: bool) -> FieldMappingRegistry {
        let connection = self.connection(company_id);
        connection.with_field_mapping(|mapping| mapping.set_group(group, enabled));
        self.persist(&connection);
        connection.field_mapping()
    }

    /// Store the sync time of a completed run so a restart does not treat
    /// the configuration as never-run. Failed runs change nothing on disk.
    pub fn record_run(&self, connection: &ErpConnection, status: SyncRunStatus) {
        if status != SyncRunStatus::Failed {
            self.persist(connection);
        }
    }

    /// Keep storage in step with the saved state: enabled configs are
    /// written, anything else is removed. Failures are logged only.
    pub fn persist(&self, connection: &ErpConnection) {
        let Some(repository) = &self.repository else {
            return;
        };

        let configuration = connection.configuration();
        let result = if configuration.enabled() {
            repository.store(connection.company_id(), &configuration, &connection.field_mapping())
        } else {
            repository.remove(connection.company_id()).map(|_| ())
        };

        if let Err(e) = result {
            tracing::warn!(
                "Failed to persist ERP configuration for company {}: {}",
                sanitize_for_log(connection.company_id()),
                e
            );
        }
    }
}
