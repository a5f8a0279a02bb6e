use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Per-request timeout for ERP calls (ping, fetch, push)
    pub request_timeout: Duration,
    /// Deadline for one whole sync_now run
    pub run_timeout: Duration,
    pub scheduler_enabled: bool,
    pub scheduler_tick: Duration,
}

#[derive(Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    /// Base64 AES-256 key. Without it, saved configurations are kept in memory only.
    pub encryption_key: Option<String>,
    pub config_store_path: String,
    pub sync: SyncEngineConfig,
    /// (company id, display name) seed for the company registry
    pub companies: Vec<(String, String)>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("cors_origins", &self.cors_origins)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field("config_store_path", &self.config_store_path)
            .field("sync", &self.sync)
            .field("companies", &self.companies)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let seconds = |key: &str, default: &str| -> Result<Duration> {
            let raw = var(key, default);
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw))?;
            Ok(Duration::from_secs(secs.max(1)))
        };

        let cors_origins = var("CORS_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server_host: var("SERVER_HOST", "0.0.0.0"),
            server_port: var("SERVER_PORT", "8080").parse().unwrap_or(8080),
            cors_origins,
            encryption_key: lookup("ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()),
            config_store_path: var("CONFIG_STORE_PATH", "./data/erp-configurations"),
            sync: SyncEngineConfig {
                request_timeout: seconds("ERP_REQUEST_TIMEOUT_SECS", "30")?,
                run_timeout: seconds("SYNC_RUN_TIMEOUT_SECS", "600")?,
                scheduler_enabled: var("SYNC_SCHEDULER_ENABLED", "true").trim().eq_ignore_ascii_case("true"),
                scheduler_tick: seconds("SYNC_SCHEDULER_TICK_SECS", "60")?,
            },
            companies: parse_companies(&var("COMPANIES", "")),
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// `acme=Acme Corporation;globex=Globex Industries`
pub fn parse_companies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|entry| {
            let (id, name) = entry.split_once('=')?;
            let (id, name) = (id.trim(), name.trim());
            if id.is_empty() || name.is_empty() {
                tracing::warn!("Ignoring malformed COMPANIES entry: {:?}", entry);
                return None;
            }
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.sync.request_timeout, Duration::from_secs(30));
        assert_eq!(config.sync.run_timeout, Duration::from_secs(600));
        assert!(config.sync.scheduler_enabled);
        assert!(config.encryption_key.is_none());
        assert!(config.companies.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SERVER_PORT", "9090"),
            ("ERP_REQUEST_TIMEOUT_SECS", "5"),
            ("SYNC_SCHEDULER_ENABLED", "false"),
            ("CORS_ORIGINS", "https://a.example.com, https://b.example.com"),
            ("ENCRYPTION_KEY", "c2VjcmV0"),
        ])
        .unwrap();
        assert_eq!(config.server_port, 9090);
        assert_eq!(config.sync.request_timeout, Duration::from_secs(5));
        assert!(!config.sync.scheduler_enabled);
        assert_eq!(config.cors_origins.len(), 2);
        assert!(!format!("{:?}", config).contains("c2VjcmV0"));
    }

    #[test]
    fn test_invalid_timeout_is_an_error() {
        assert!(config(&[("SYNC_RUN_TIMEOUT_SECS", "ten")]).is_err());
    }

    #[test]
    fn test_parse_companies() {
        let companies = parse_companies("acme=Acme Corporation; globex = Globex ;broken;=x");
        assert_eq!(
            companies,
            vec![
                ("acme".to_string(), "Acme Corporation".to_string()),
                ("globex".to_string(), "Globex".to_string()),
            ]
        );
        assert!(parse_companies("").is_empty());
    }
}
