use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{IntakeError, Result};

/// Top-level configuration for the intake engine.
///
/// Loaded from `intake.toml` by default. Every section is optional; missing
/// sections and fields fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl IntakeConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: IntakeConfig = toml::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Like [`IntakeConfig::load`], but a missing, unparseable or invalid
    /// file yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Config unusable, using defaults");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.session.ttl_secs == 0, "session.ttl_secs must be positive"),
            (
                self.session.store_timeout_ms == 0,
                "session.store_timeout_ms must be positive",
            ),
            (
                self.navigation.max_depth == 0,
                "navigation.max_depth must be positive",
            ),
            (
                self.router.max_input_len == 0,
                "router.max_input_len must be positive",
            ),
            (
                self.payment.currency.len() != 3,
                "payment.currency must be a three-letter code",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(IntakeError::Config(reason.to_string())),
            None => Ok(()),
        }
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Directory for the SQLite session database.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

/// Session store settings shared by the primary and the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time-to-live for session records, renewed on every write.
    pub ttl_secs: u64,
    /// Maximum entries held by the local fallback cache.
    pub cache_capacity: usize,
    /// Upper bound on any single primary-store call.
    pub store_timeout_ms: u64,
    /// SQLite file name inside `general.data_dir`.
    pub database_file: String,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            cache_capacity: 1000,
            store_timeout_ms: 1500,
            database_file: "sessions.db".to_string(),
        }
    }
}

/// Navigation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Maximum entries kept per identity.
    pub max_depth: usize,
    /// Number of trailing entries rendered in a breadcrumb.
    pub breadcrumb_len: usize,
    /// Histories idle longer than this are dropped by maintenance.
    pub inactivity_timeout_secs: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            breadcrumb_len: 3,
            inactivity_timeout_secs: 1800,
        }
    }
}

/// Router and rollout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Inbound text is truncated to this many characters.
    pub max_input_len: usize,
    /// Contexts handled by the structured router. Everything else stays on
    /// the legacy path.
    pub migrated_contexts: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_input_len: 500,
            migrated_contexts: [
                "main",
                "permit_application",
                "permit_edit",
                "permit_edit_value",
                "renewal",
                "renewal_edit",
                "renewal_edit_value",
                "payment_pending",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Amount charged through the payment-link collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Permit fee in minor currency units.
    pub permit_amount_minor: u64,
    /// Renewal fee in minor currency units.
    pub renewal_amount_minor: u64,
    /// ISO-4217 currency code.
    pub currency: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            permit_amount_minor: 15_000,
            renewal_amount_minor: 15_000,
            currency: "MXN".to_string(),
        }
    }
}

/// Background maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between cleanup passes.
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}
