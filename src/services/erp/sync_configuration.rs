// ERP Sync Configuration
// Connection parameters, direction, cadence and identity-precedence policy for one ERP integration
// Enforces: enabled == true only after a successful connection test on the current revision

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Endpoint and API key are required")]
    MissingCredentials,

    #[error("A successful connection test is required before saving")]
    TestRequired,

    #[error("A connection test is still in progress")]
    OperationInProgress,

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErpSystem {
    #[default]
    #[serde(rename = "netsuite")]
    NetSuite,
    #[serde(rename = "sap_s4hana")]
    SapS4Hana,
    #[serde(rename = "dynamics_365")]
    Dynamics365,
    #[serde(rename = "oracle_fusion")]
    OracleFusion,
    #[serde(rename = "generic")]
    Generic,
}

impl ErpSystem {
    pub fn as_str(&self) -> &str {
        match self {
            ErpSystem::NetSuite => "netsuite",
            ErpSystem::SapS4Hana => "sap_s4hana",
            ErpSystem::Dynamics365 => "dynamics_365",
            ErpSystem::OracleFusion => "oracle_fusion",
            ErpSystem::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Directory -> ERP
    #[default]
    Push,
    /// ERP -> directory
    Pull,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::Pull | SyncDirection::Bidirectional)
    }

    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::Push | SyncDirection::Bidirectional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFrequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Manual,
}

impl SyncFrequency {
    pub fn as_str(&self) -> &str {
        match self {
            SyncFrequency::Hourly => "hourly",
            SyncFrequency::Daily => "daily",
            SyncFrequency::Weekly => "weekly",
            SyncFrequency::Manual => "manual",
        }
    }

    /// Cadence for the host scheduler. `None` means only explicit triggers.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncFrequency::Hourly => Some(Duration::hours(1)),
            SyncFrequency::Daily => Some(Duration::days(1)),
            SyncFrequency::Weekly => Some(Duration::weeks(1)),
            SyncFrequency::Manual => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Untested,
    Pending,
    Success,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Untested => "untested",
            TestStatus::Pending => "pending",
            TestStatus::Success => "success",
            TestStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    Unconfigured,
    Editing,
    TestPending,
    TestSucceeded,
    TestFailed,
    Saved,
}

// ============================================================================
// Credentials
// ============================================================================

/// ERP API key. Never printed, never serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey([REDACTED])")
        }
    }
}

/// Snapshot handed to the gateway for one test or sync
#[derive(Debug, Clone)]
pub struct ErpCredentials {
    pub erp_system: ErpSystem,
    pub endpoint: String,
    pub api_key: ApiKey,
}

// ============================================================================
// Sync Configuration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SyncConfiguration {
    erp_system: ErpSystem,
    direction: SyncDirection,
    frequency: SyncFrequency,
    endpoint: String,
    api_key: ApiKey,
    enabled: bool,
    use_erp_vendor_ids: bool,
    last_test_status: TestStatus,
    last_test_error: Option<String>,
    last_tested_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    /// Bumped by every edit that invalidates a connection test
    revision: u64,
}

/// Partial update, as received from the configuration form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigurationUpdate {
    pub erp_system: Option<ErpSystem>,
    pub direction: Option<SyncDirection>,
    pub frequency: Option<SyncFrequency>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub use_erp_vendor_ids: Option<bool>,
}

impl SyncConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn erp_system(&self) -> ErpSystem {
        self.erp_system
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn frequency(&self) -> SyncFrequency {
        self.frequency
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn use_erp_vendor_ids(&self) -> bool {
        self.use_erp_vendor_ids
    }

    pub fn last_test_status(&self) -> TestStatus {
        self.last_test_status
    }

    pub fn last_test_error(&self) -> Option<&str> {
        self.last_test_error.as_deref()
    }

    pub fn last_tested_at(&self) -> Option<DateTime<Utc>> {
        self.last_tested_at
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> ConfigState {
        if self.enabled {
            return ConfigState::Saved;
        }
        match self.last_test_status {
            TestStatus::Pending => ConfigState::TestPending,
            TestStatus::Success => ConfigState::TestSucceeded,
            TestStatus::Error => ConfigState::TestFailed,
            TestStatus::Untested if self.revision == 0 => ConfigState::Unconfigured,
            TestStatus::Untested => ConfigState::Editing,
        }
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    fn invalidate(&mut self) {
        self.revision += 1;
        self.last_test_status = TestStatus::Untested;
        self.last_test_error = None;
        self.enabled = false;
    }

    pub fn set_erp_system(&mut self, erp_system: ErpSystem) -> bool {
        if self.erp_system == erp_system {
            return false;
        }
        self.erp_system = erp_system;
        self.invalidate();
        true
    }

    pub fn set_direction(&mut self, direction: SyncDirection) -> bool {
        if self.direction == direction {
            return false;
        }
        self.direction = direction;
        self.invalidate();
        true
    }

    pub fn set_frequency(&mut self, frequency: SyncFrequency) -> bool {
        if self.frequency == frequency {
            return false;
        }
        self.frequency = frequency;
        self.invalidate();
        true
    }

    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<bool> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if !endpoint.is_empty() {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| ConfigurationError::InvalidValue(format!("endpoint: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigurationError::InvalidValue(
                    "endpoint: scheme must be http or https".to_string(),
                ));
            }
        }

        if self.endpoint == endpoint {
            return Ok(false);
        }
        self.endpoint = endpoint.to_string();
        self.invalidate();
        Ok(true)
    }

    pub fn set_api_key(&mut self, api_key: ApiKey) -> bool {
        if self.api_key == api_key {
            return false;
        }
        self.api_key = api_key;
        self.invalidate();
        true
    }

    /// Identity precedence is independent of test/save status
    pub fn set_use_erp_vendor_ids(&mut self, use_erp_vendor_ids: bool) -> bool {
        let changed = self.use_erp_vendor_ids != use_erp_vendor_ids;
        self.use_erp_vendor_ids = use_erp_vendor_ids;
        changed
    }

    /// Apply a partial update. Validation happens before any field changes.
    pub fn apply(&mut self, update: ConfigurationUpdate) -> Result<bool> {
        if let Some(endpoint) = &update.endpoint {
            let mut probe = SyncConfiguration::new();
            probe.set_endpoint(endpoint)?;
        }

        let mut changed = false;
        if let Some(erp_system) = update.erp_system {
            changed |= self.set_erp_system(erp_system);
        }
        if let Some(direction) = update.direction {
            changed |= self.set_direction(direction);
        }
        if let Some(frequency) = update.frequency {
            changed |= self.set_frequency(frequency);
        }
        if let Some(endpoint) = update.endpoint {
            changed |= self.set_endpoint(&endpoint)?;
        }
        if let Some(api_key) = update.api_key {
            changed |= self.set_api_key(ApiKey::new(api_key));
        }
        if let Some(use_erp_vendor_ids) = update.use_erp_vendor_ids {
            changed |= self.set_use_erp_vendor_ids(use_erp_vendor_ids);
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------------
    // Test / Save lifecycle
    // ------------------------------------------------------------------------

    pub fn credentials(&self) -> Result<ErpCredentials> {
        if self.endpoint.is_empty() || self.api_key.is_empty() {
            return Err(ConfigurationError::MissingCredentials);
        }
        Ok(ErpCredentials {
            erp_system: self.erp_system,
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
        })
    }

    /// Enter TestPending. Returns the revision the result must be reported against.
    /// Re-testing a saved configuration takes it out of service until saved again.
    pub fn begin_test(&mut self) -> Result<(u64, ErpCredentials)> {
        let credentials = self.credentials()?;
        self.last_test_status = TestStatus::Pending;
        self.last_test_error = None;
        self.enabled = false;
        Ok((self.revision, credentials))
    }

    /// Record a test outcome. Discarded (returns false) if the configuration
    /// was edited while the test was running.
    pub fn complete_test(&mut self, revision: u64, outcome: std::result::Result<(), String>) -> bool {
        if revision != self.revision || self.last_test_status != TestStatus::Pending {
            return false;
        }
        self.last_tested_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                self.last_test_status = TestStatus::Success;
                self.last_test_error = None;
            }
            Err(reason) => {
                self.last_test_status = TestStatus::Error;
                self.last_test_error = Some(reason);
            }
        }
        true
    }

    pub fn save(&mut self) -> Result<()> {
        if self.endpoint.is_empty() || self.api_key.is_empty() {
            return Err(ConfigurationError::MissingCredentials);
        }
        match self.last_test_status {
            TestStatus::Success => {}
            TestStatus::Pending => return Err(ConfigurationError::OperationInProgress),
            TestStatus::Untested | TestStatus::Error => return Err(ConfigurationError::TestRequired),
        }

        self.enabled = true;
        self.last_synced_at = None;
        Ok(())
    }

    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }

    pub fn record_sync(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
    }

    /// Rebuild a saved configuration from persistent storage.
    /// The stored test result is trusted; the revision starts fresh.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        erp_system: ErpSystem,
        direction: SyncDirection,
        frequency: SyncFrequency,
        endpoint: String,
        api_key: ApiKey,
        use_erp_vendor_ids: bool,
        last_tested_at: Option<DateTime<Utc>>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            erp_system,
            direction,
            frequency,
            endpoint,
            api_key,
            enabled: true,
            use_erp_vendor_ids,
            last_test_status: TestStatus::Success,
            last_test_error: None,
            last_tested_at,
            last_synced_at,
            revision: 1,
        }
    }
}
