//! Configuration management for the OCR minion
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use ocr_minion::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Queue server: {}", config.client.base_address);
//! ```
//!
//! # Environment Variables
//!
//! Nested settings can be overridden with the pattern `OCRM__<section>__<key>`:
//! - `OCRM__CLIENT__BASE_ADDRESS=http://localhost:5000`
//! - `OCRM__WORKER__PREFETCH=true`
//! - `OCRM__RETRY__MAX_RETRIES=3`
//!
//! Deployment identity uses flat variables:
//! - `OCRM_APIKEY` (required)
//! - `OCRM_SERVER` (worker label; `OCRM_EMAIL` is accepted too)
//! - `OCRM_DEMO` (request the practice task)
//! - `base_address`, `user_agent`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/ocr-minion.toml`.
//! This can be overridden using the `OCRM_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::HumanDuration;
pub use models::{
    ClientConfig, Config, OcrConfig, RetryConfig, TelemetryConfig, WorkerConfig, WorkerIdentity,
};
pub use sources::{apply_environment, default_config_path};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`OCRM_*`, `OCRM__*`)
    /// 2. TOML file (default: `config/ocr-minion.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (missing API key, bad base address, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_file(default_config_path())
    }

    /// Same as [`Config::load`] with an explicit config file
    pub fn load_with_file(path: PathBuf) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, |_| {})
    }

    /// Load from file and environment, then apply command-line overrides
    /// before validation
    pub fn load_with_overrides<F>(path: PathBuf, overrides: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = sources::load(path)?;
        overrides(&mut config);
        config.finish()
    }

    /// Load configuration from a specific path, ignoring the flat
    /// deployment variables and `.env`
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        config.finish()
    }

    /// Validate and resolve the worker identity
    ///
    /// The random worker label, if any, is generated here exactly once.
    pub fn finish(mut self) -> Result<Self, ConfigError> {
        validation::validate(&self)?;

        let api_key = self.client.api_key.as_deref().unwrap_or_default();
        self.identity = WorkerIdentity::resolve(api_key, self.client.server.as_deref());
        self.client.server = Some(self.identity.server.clone());

        Ok(self)
    }

    /// Log the effective configuration with the API key redacted
    pub fn log_summary(&self) {
        tracing::info!(
            base_address = %self.client.base_address,
            user_agent = %self.client.user_agent,
            api_key = %self.identity.redacted_api_key(),
            server = %self.identity.server,
            demo = self.client.demo,
            "Client configuration"
        );
        tracing::info!(
            program = %self.ocr.program,
            language = %self.ocr.language,
            psm = self.ocr.page_segmentation_mode,
            dpi = self.ocr.dpi,
            "OCR engine configuration"
        );
        tracing::info!(
            work_dir = %self.worker.work_dir.display(),
            fault_cooldown = %self.worker.fault_cooldown,
            prefetch = self.worker.prefetch,
            max_retries = self.retry.max_retries,
            breaker_threshold = self.retry.breaker_threshold,
            "Worker configuration"
        );
    }
}
