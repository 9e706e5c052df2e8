//! Error type shared by every ipamkit operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpamError>;

#[derive(Debug, Error)]
pub enum IpamError {
    /// The service has no entity at the requested controller/path.
    #[error("no {controller} entity found at '{path}'")]
    NotFound { controller: String, path: String },

    /// The service answered with an unsuccessful envelope.
    #[error("IPAM API returned {code}: {message}")]
    Api { code: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode IPAM response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A protection rule on the record forbids the change.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A record is missing a field or holds a malformed value.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IpamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IpamError::NotFound { .. })
    }
}

/// Turns a "not found" answer into an empty list, the way every listing
/// operation reports absence.
pub(crate) fn or_empty<T>(result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}
