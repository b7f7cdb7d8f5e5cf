//! Failure taxonomy for the conversation gateway.
//!
//! Every failure is returned as a tagged value, never panicked or buried in a
//! string. The tag decides retry behavior (see `retry`); url and attempt
//! count travel with the error so callers can tell "bad input, never retried"
//! from "degraded after N attempts".

use std::time::Duration;

use thiserror::Error;

/// Classified failure of a gateway call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, connect, reset). Retryable.
    #[error("network error calling {url} (attempt {attempts}): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The attempt deadline elapsed and the in-flight call was aborted.
    #[error("request to {url} timed out (attempt {attempts})")]
    Timeout { url: String, attempts: u32 },

    /// 5xx from the service. Retryable.
    #[error("server error {status} from {url} (attempt {attempts}): {message}")]
    Server {
        status: u16,
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-429 4xx. The request itself is wrong; retrying cannot help.
    #[error("client error {status} from {url}: {message}")]
    Client {
        status: u16,
        url: String,
        message: String,
    },

    /// 429. Retryable, honoring the server-supplied delay when present.
    #[error("rate limited ({status}) by {url} (attempt {attempts})")]
    RateLimited {
        status: u16,
        url: String,
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// Response body did not match its declared media type or schema.
    #[error("unparseable response: {message}")]
    Parse { message: String },

    /// The caller cancelled the call.
    #[error("request to {url} was aborted")]
    Aborted { url: String },

    /// Anything that escaped classification.
    #[error("unclassified failure: {message}")]
    Unknown { message: String },
}

impl GatewayError {
    /// Whether the retry policy may consider another attempt at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::Server { .. }
                | GatewayError::RateLimited { .. }
        )
    }

    /// How many attempts had been made when this error was produced.
    pub fn attempts(&self) -> u32 {
        match self {
            GatewayError::Network { attempts, .. }
            | GatewayError::Timeout { attempts, .. }
            | GatewayError::Server { attempts, .. }
            | GatewayError::RateLimited { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408 counts as a timeout at the server's discretion; 429 carries the
    /// parsed `Retry-After`; remaining 4xx (413 included) are the caller's
    /// problem and never retried.
    pub fn from_status(
        status: u16,
        url: &str,
        attempts: u32,
        retry_after: Option<Duration>,
        message: String,
    ) -> Self {
        match status {
            408 => GatewayError::Timeout {
                url: url.to_string(),
                attempts,
            },
            429 => GatewayError::RateLimited {
                status,
                url: url.to_string(),
                attempts,
                retry_after,
            },
            400..=499 => GatewayError::Client {
                status,
                url: url.to_string(),
                message,
            },
            500..=599 => GatewayError::Server {
                status,
                url: url.to_string(),
                attempts,
                message,
            },
            _ => GatewayError::Unknown {
                message: format!("unexpected status {status} from {url}: {message}"),
            },
        }
    }

    /// Classify a transport error from reqwest.
    pub fn from_transport(error: &reqwest::Error, url: &str, attempts: u32) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout {
                url: url.to_string(),
                attempts,
            }
        } else {
            GatewayError::Network {
                url: url.to_string(),
                attempts,
                message: error.to_string(),
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
