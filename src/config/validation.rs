use super::models::Config;
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("API key is not set (export OCRM_APIKEY)")]
    MissingApiKey,

    #[error("Invalid base address '{address}': {reason}")]
    InvalidBaseAddress { address: String, reason: String },

    #[error("User agent must not be empty")]
    EmptyUserAgent,

    #[error("OCR setting '{field}' must not be empty")]
    EmptyOcrSetting { field: &'static str },

    #[error("OCR dpi must be positive")]
    InvalidDpi,

    #[error("Circuit breaker threshold must be positive")]
    InvalidBreakerThreshold,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_client(config)?;
    validate_ocr(config)?;
    validate_retry(config)?;
    Ok(())
}

fn validate_client(config: &Config) -> Result<(), ValidationError> {
    let has_key = config
        .client
        .api_key
        .as_deref()
        .is_some_and(|key| !key.trim().is_empty());
    if !has_key {
        return Err(ValidationError::MissingApiKey);
    }

    let address = &config.client.base_address;
    let url = Url::parse(address).map_err(|e| ValidationError::InvalidBaseAddress {
        address: address.clone(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidBaseAddress {
            address: address.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if config.client.user_agent.trim().is_empty() {
        return Err(ValidationError::EmptyUserAgent);
    }

    Ok(())
}

fn validate_ocr(config: &Config) -> Result<(), ValidationError> {
    if config.ocr.program.trim().is_empty() {
        return Err(ValidationError::EmptyOcrSetting { field: "program" });
    }
    if config.ocr.language.trim().is_empty() {
        return Err(ValidationError::EmptyOcrSetting { field: "language" });
    }
    if config.ocr.dpi == 0 {
        return Err(ValidationError::InvalidDpi);
    }
    Ok(())
}

fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    if config.retry.breaker_threshold == 0 {
        return Err(ValidationError::InvalidBreakerThreshold);
    }
    Ok(())
}
