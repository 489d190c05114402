use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use super::models::ErrorResult;

/// Status the queue server uses for "no task available right now"
pub const NO_TASKS_STATUS: u16 = 420;

const BODY_PREVIEW_CHARS: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server has no task available: {message} (next try in {}s)", .delay.as_secs())]
    NoWorkAvailable { message: String, delay: Duration },

    #[error("blocked by server: {message} (next try in {}s)", .delay.as_secs())]
    AccessDenied { message: String, delay: Duration },

    #[error("unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("circuit breaker open, next attempt allowed in {}s", .retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },

    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Server-suggested wait for the expected-delay kinds
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            ClientError::NoWorkAvailable { delay, .. } | ClientError::AccessDenied { delay, .. } => {
                Some(*delay)
            }
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

/// Map a non-success response to an error kind
///
/// 420 (and 204, used by an older server revision) means the queue is empty,
/// 401/403 means the key is refused or rate limited. Both carry the server's
/// `nextRequestInSec`, or `fallback` if the body doesn't provide it.
pub fn classify(status: StatusCode, body: &str, fallback: Duration) -> ClientError {
    let parsed = ErrorResult::parse(body);
    let delay = parsed
        .as_ref()
        .and_then(ErrorResult::delay)
        .unwrap_or(fallback);
    let message = parsed
        .and_then(|r| r.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no reason given").to_string());

    match status.as_u16() {
        NO_TASKS_STATUS | 204 => ClientError::NoWorkAvailable { message, delay },
        401 | 403 => ClientError::AccessDenied { message, delay },
        other => ClientError::UnexpectedStatus {
            status: other,
            body: preview(body),
        },
    }
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(BODY_PREVIEW_CHARS).collect();
    format!("{}...", cut)
}
