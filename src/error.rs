use std::fmt::Write as _;
use thiserror::Error;

/// Configuration validation errors. Always fatal and always reported
/// before any connection is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target URL is required")]
    MissingUrl,

    #[error("invalid target URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid server address '{0}': expected host:port")]
    InvalidServerAddress(String),
}

/// Errors surfaced by a single connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected; call connect() first")]
    NotConnected,

    /// A connection's telemetry queues close when its run loop returns;
    /// it is never resurrected for a second run.
    #[error("connection already finished its run")]
    Finished,

    #[error("request body cannot be rebuilt per attempt (streaming body)")]
    UnclonableBody,

    #[error("failed to set up transport: {0}")]
    Connect(#[source] reqwest::Error),

    /// The first transport-level request failure observed during a run.
    /// Later failures are counted in statistics but not surfaced.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Every connection failure for one pool operation, indexed by connection.
///
/// The pool never drops a sibling's error to make the operation look
/// successful; the Display form is one line per failed connection.
#[derive(Debug, Error)]
#[error("{}", render_indexed(.errors))]
pub struct PoolError {
    pub errors: Vec<(usize, ClientError)>,
}

impl PoolError {
    /// Returns `Err` only when at least one connection failed.
    pub fn from_indexed(errors: Vec<(usize, ClientError)>) -> Result<(), PoolError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError { errors })
        }
    }
}

fn render_indexed(errors: &[(usize, ClientError)]) -> String {
    let mut out = String::new();
    for (i, (index, err)) in errors.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "connection {index}: {err}");
    }
    out
}
