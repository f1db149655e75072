//! Engine configuration.
//!
//! Defaults are usable as-is; `from_env` overlays `STOCKGUARD_*` variables and
//! `from_json_str` reads a (possibly partial) JSON document.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockguard_core::TenantId;
use stockguard_inventory::AlertThresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// What a scoped read does when the unit of work has no tenant.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscopedPolicy {
    /// Return nothing.
    #[default]
    FailClosed,
    /// Return every row, logging each use at WARN. Legacy behaviour.
    FailOpen,
}

/// Whether ledger decreases may take a product below zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    #[default]
    Reject,
    Allow,
}

impl NegativeStockPolicy {
    pub fn permits_negative(&self) -> bool {
        matches!(self, NegativeStockPolicy::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    pub thresholds: AlertThresholds,
    /// Per-tenant near-expiry lookahead in days; tenants not listed use
    /// `thresholds.near_expiry_days`.
    pub tenant_near_expiry_days: BTreeMap<TenantId, i64>,
    pub unscoped_policy: UnscopedPolicy,
    pub negative_stock: NegativeStockPolicy,
    pub scan_interval_secs: u64,
    pub scan_max_retries: u32,
    pub scan_base_backoff_ms: u64,
    pub database_url: Option<String>,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            tenant_near_expiry_days: BTreeMap::new(),
            unscoped_policy: UnscopedPolicy::default(),
            negative_stock: NegativeStockPolicy::default(),
            scan_interval_secs: 3600,
            scan_max_retries: 5,
            scan_base_backoff_ms: 250,
            database_url: None,
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("STOCKGUARD_NEAR_EXPIRY_DAYS") {
            cfg.thresholds.near_expiry_days = parse("STOCKGUARD_NEAR_EXPIRY_DAYS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_URGENT_EXPIRY_DAYS") {
            cfg.thresholds.urgent_expiry_days = parse("STOCKGUARD_URGENT_EXPIRY_DAYS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_ABNORMAL_MULTIPLIER") {
            cfg.thresholds.abnormal_multiplier = parse("STOCKGUARD_ABNORMAL_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_RECENT_WINDOW_HOURS") {
            cfg.thresholds.recent_window_hours = parse("STOCKGUARD_RECENT_WINDOW_HOURS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_BASELINE_DAYS") {
            cfg.thresholds.baseline_days = parse("STOCKGUARD_BASELINE_DAYS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_UNSCOPED_POLICY") {
            cfg.unscoped_policy = match v.trim() {
                "fail_closed" | "closed" => UnscopedPolicy::FailClosed,
                "fail_open" | "open" => UnscopedPolicy::FailOpen,
                _ => return Err(invalid("STOCKGUARD_UNSCOPED_POLICY", &v, "expected fail_closed or fail_open")),
            };
        }
        if let Some(v) = lookup("STOCKGUARD_ALLOW_NEGATIVE_STOCK") {
            let allow: bool = parse("STOCKGUARD_ALLOW_NEGATIVE_STOCK", &v)?;
            cfg.negative_stock = if allow {
                NegativeStockPolicy::Allow
            } else {
                NegativeStockPolicy::Reject
            };
        }
        if let Some(v) = lookup("STOCKGUARD_SCAN_INTERVAL_SECS") {
            cfg.scan_interval_secs = parse("STOCKGUARD_SCAN_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_SCAN_MAX_RETRIES") {
            cfg.scan_max_retries = parse("STOCKGUARD_SCAN_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_SCAN_BASE_BACKOFF_MS") {
            cfg.scan_base_backoff_ms = parse("STOCKGUARD_SCAN_BASE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("STOCKGUARD_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            if !v.trim().is_empty() {
                cfg.database_url = Some(v);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(doc: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(doc)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds
            .validate()
            .map_err(|e| ConfigError::Inconsistent(e.to_string()))?;
        if let Some((tenant, days)) = self.tenant_near_expiry_days.iter().find(|(_, d)| **d < 0) {
            return Err(ConfigError::Inconsistent(format!(
                "near-expiry window for tenant {tenant} cannot be negative ({days})"
            )));
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Inconsistent(
                "scan interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn scan_base_backoff(&self) -> Duration {
        Duration::from_millis(self.scan_base_backoff_ms)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
