use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// How rate-limit tokens are distributed within each second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpsMode {
    /// Mint all tokens at once at each one-second boundary.
    #[default]
    Burst,
    /// Mint one token every 1/rate seconds, spreading issuance evenly.
    Even,
}

impl RpsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpsMode::Burst => "burst",
            RpsMode::Even => "even",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http1,
    /// HTTP/2: prior knowledge for http://, ALPN for https://.
    #[default]
    Http2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line: timestamp, status, latency.
    #[default]
    Json,
    /// Three whitespace-separated integers: epoch micros, status, latency micros.
    Compact,
}

/// Status code recorded when a request failed at the transport level
/// (connect error, timeout, reset) and no response status exists.
pub const STATUS_TRANSPORT_ERROR: u16 = 0;

/// One immutable record per completed (or failed) request attempt.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    /// Wall-clock time the request was dispatched.
    pub start: SystemTime,
    /// Response status, or [`STATUS_TRANSPORT_ERROR`] for transport failures.
    pub status: u16,
    /// Elapsed time from dispatch to response-header completion.
    pub latency: Duration,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
