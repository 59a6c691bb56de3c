use std::time::Duration;
use thiserror::Error;

/// Workspace-wide error kinds, matching the error taxonomy every component
/// reports into: configuration failures are fatal at startup, transient
/// remote failures are retried by the caller a bounded number of times,
/// content-store conflicts are surfaced for the caller to decide on, and
/// safety refusals are logged rather than treated as failures.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient remote failure calling {endpoint}: {message}")]
    TransientRemote { endpoint: String, message: String },

    #[error("permanent remote failure calling {endpoint}: {message}")]
    PermanentRemote { endpoint: String, message: String },

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("optimistic lock conflict on document {doc_id}")]
    Conflict { doc_id: String },

    #[error("circuit open for endpoint '{endpoint}', retry after {retry_after:?}")]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
