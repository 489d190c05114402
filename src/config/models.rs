use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Resolved once by `Config::load`, never read from file
    #[serde(skip)]
    pub identity: WorkerIdentity,
}

/// Queue server connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_address")]
    pub base_address: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Label presented to the server as `server=`
    pub server: Option<String>,
    /// Request the fixed practice task instead of real work
    #[serde(default)]
    pub demo: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    /// Wait used when an error body carries no usable `nextRequestInSec`
    #[serde(default = "default_delay_fallback")]
    pub delay_fallback: HumanDuration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            user_agent: default_user_agent(),
            api_key: None,
            server: None,
            demo: false,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            delay_fallback: default_delay_fallback(),
        }
    }
}

fn default_base_address() -> String {
    "https://ocr.hlidacstatu.cz".to_string()
}

fn default_user_agent() -> String {
    concat!("ocr-minion/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(5 * 60)
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_delay_fallback() -> HumanDuration {
    HumanDuration::from_secs(60)
}

/// Transient failure retry policy and circuit breaker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait after a connection-level failure
    #[serde(default = "default_network_error_delay")]
    pub network_error_delay: HumanDuration,
    /// Wait after a 5xx whose body has no `nextRequestInSec`
    #[serde(default = "default_server_error_delay")]
    pub server_error_delay: HumanDuration,
    /// Consecutive failed attempts before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown: HumanDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            network_error_delay: default_network_error_delay(),
            server_error_delay: default_server_error_delay(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown: default_breaker_cooldown(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_network_error_delay() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_server_error_delay() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_breaker_threshold() -> u32 {
    10
}

fn default_breaker_cooldown() -> HumanDuration {
    HumanDuration::from_secs(5 * 60)
}

/// OCR engine invocation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_page_segmentation_mode")]
    pub page_segmentation_mode: u8,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Kill the engine if it runs longer than this
    pub timeout: Option<HumanDuration>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            language: default_language(),
            page_segmentation_mode: default_page_segmentation_mode(),
            dpi: default_dpi(),
            timeout: None,
        }
    }
}

fn default_program() -> String {
    "tesseract".to_string()
}

fn default_language() -> String {
    "ces".to_string()
}

fn default_page_segmentation_mode() -> u8 {
    1
}

fn default_dpi() -> u32 {
    300
}

/// Worker loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Directory downloaded images and OCR output are written to
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Pause after an unexpected cycle failure
    #[serde(default = "default_fault_cooldown")]
    pub fault_cooldown: HumanDuration,
    /// Acquire and download the next task while the current one is processed
    #[serde(default)]
    pub prefetch: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            fault_cooldown: default_fault_cooldown(),
            prefetch: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_fault_cooldown() -> HumanDuration {
    HumanDuration::from_secs(5 * 60)
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Identity presented to the queue server on every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub api_key: String,
    pub server: String,
}

impl WorkerIdentity {
    pub fn new(api_key: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            server: server.into(),
        }
    }

    /// Build the identity, generating a random label when none is configured
    pub fn resolve(api_key: &str, server: Option<&str>) -> Self {
        let server = server
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self::new(api_key.trim(), server)
    }

    /// API key with everything but the first characters masked, for logs
    pub fn redacted_api_key(&self) -> String {
        let visible: String = self.api_key.chars().take(3).collect();
        format!("{}***", visible)
    }
}
