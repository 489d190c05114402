use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "OCRM_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/ocr-minion.toml";
const ENV_PREFIX: &str = "OCRM";
const ENV_SEPARATOR: &str = "__";

const API_KEY_VAR: &str = "OCRM_APIKEY";
const SERVER_VAR: &str = "OCRM_SERVER";
const LEGACY_SERVER_VAR: &str = "OCRM_EMAIL";
const DEMO_VAR: &str = "OCRM_DEMO";
const BASE_ADDRESS_VAR: &str = "base_address";
const USER_AGENT_VAR: &str = "user_agent";

/// Default config file location, honouring `OCRM_CONFIG`
pub fn default_config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_path: PathBuf) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;

    apply_environment(&mut config, |key| env::var(key).ok());

    Ok(config)
}

/// Apply the flat deployment variables (API key, worker label, demo flag,
/// base address, user agent). The API key is never stored in TOML files,
/// only in the environment.
pub fn apply_environment<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(api_key) = non_blank(API_KEY_VAR) {
        config.client.api_key = Some(api_key);
    }

    if let Some(server) = non_blank(SERVER_VAR).or_else(|| non_blank(LEGACY_SERVER_VAR)) {
        config.client.server = Some(server);
    }

    if let Some(demo) = non_blank(DEMO_VAR) {
        config.client.demo = parse_flag(&demo);
    }

    if let Some(base_address) = non_blank(BASE_ADDRESS_VAR) {
        config.client.base_address = base_address;
    }

    if let Some(user_agent) = non_blank(USER_AGENT_VAR) {
        config.client.user_agent = user_agent;
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // OCRM__CLIENT__BASE_ADDRESS -> client.base_address
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
