// Configuration Repository
// Saved ERP configurations as JSON files, one per company, API key sealed with AES-256-GCM
// File name: sha256(company_id).json so company ids never reach the filesystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::services::encryption_service::{EncryptionError, EncryptionService};
use crate::services::erp::field_mapping::{FieldMappingRegistry, VendorField};
use crate::services::erp::sync_configuration::{
    ApiKey, ErpSystem, SyncConfiguration, SyncDirection, SyncFrequency,
};
use crate::utils::log_sanitizer::sanitize_for_log;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential sealing failed: {0}")]
    Encryption(#[from] EncryptionError),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Serialize, Deserialize)]
struct StoredConfiguration {
    company_id: String,
    erp_system: ErpSystem,
    direction: SyncDirection,
    frequency: SyncFrequency,
    endpoint: String,
    api_key_sealed: String,
    use_erp_vendor_ids: bool,
    enabled_fields: Vec<VendorField>,
    last_tested_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    stored_at: DateTime<Utc>,
}

/// A saved configuration read back at startup
#[derive(Debug)]
pub struct RestoredConfiguration {
    pub company_id: String,
    pub configuration: SyncConfiguration,
    pub field_mapping: FieldMappingRegistry,
}

pub struct ConfigurationRepository {
    base_path: PathBuf,
    encryption: EncryptionService,
}

impl ConfigurationRepository {
    pub fn new(base_path: impl AsRef<Path>, encryption: EncryptionService) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path, encryption })
    }

    fn path_for(&self, company_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", EncryptionService::hash_for_lookup(company_id)))
    }

    pub fn store(
        &self,
        company_id: &str,
        configuration: &SyncConfiguration,
        field_mapping: &FieldMappingRegistry,
    ) -> Result<()> {
        let stored = StoredConfiguration {
            company_id: company_id.to_string(),
            erp_system: configuration.erp_system(),
            direction: configuration.direction(),
            frequency: configuration.frequency(),
            endpoint: configuration.endpoint().to_string(),
            api_key_sealed: self.encryption.encrypt(configuration.api_key().expose())?,
            use_erp_vendor_ids: configuration.use_erp_vendor_ids(),
            enabled_fields: field_mapping.enabled_fields().into_iter().collect(),
            last_tested_at: configuration.last_tested_at(),
            last_synced_at: configuration.last_synced_at(),
            stored_at: Utc::now(),
        };

        // Write-then-rename so a crash never leaves a torn file
        let path = self.path_for(company_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        fs::rename(&tmp, &path)?;

        tracing::info!(
            "🔒 ERP configuration stored for company {}",
            sanitize_for_log(company_id)
        );
        Ok(())
    }

    pub fn remove(&self, company_id: &str) -> Result<bool> {
        let path = self.path_for(company_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(
                    "🗑️  ERP configuration removed for company {}",
                    sanitize_for_log(company_id)
                );
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load(&self, company_id: &str) -> Result<Option<RestoredConfiguration>> {
        let path = self.path_for(company_id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_file(&path).map(Some)
    }

    /// Every readable saved configuration. Unreadable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<RestoredConfiguration>> {
        let mut restored = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match self.read_file(&path) {
                Ok(configuration) => restored.push(configuration),
                Err(e) => tracing::warn!(
                    "Skipping unreadable ERP configuration {}: {}",
                    path.display(),
                    e
                ),
            }
        }

        restored.sort_by(|a, b| a.company_id.cmp(&b.company_id));
        Ok(restored)
    }

    fn read_file(&self, path: &Path) -> Result<RestoredConfiguration> {
        let stored: StoredConfiguration = serde_json::from_slice(&fs::read(path)?)?;
        let api_key = ApiKey::new(self.encryption.decrypt(&stored.api_key_sealed)?);

        let configuration = SyncConfiguration::restore(
            stored.erp_system,
            stored.direction,
            stored.frequency,
            stored.endpoint,
            api_key,
            stored.use_erp_vendor_ids,
            stored.last_tested_at,
            stored.last_synced_at,
        );

        Ok(RestoredConfiguration {
            company_id: stored.company_id,
            configuration,
            field_mapping: FieldMappingRegistry::from_enabled(stored.enabled_fields),
        })
    }
}
