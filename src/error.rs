//! Core error taxonomy.
//!
//! The transient/permanent upload distinction is carried in the variant
//! itself so callers can decide whether a batch was retryable without
//! inspecting error sources.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Rejected at the facade boundary before any filesystem or network work.
    #[error("{0}")]
    InvalidInput(String),

    /// The configured token is empty or still the placeholder default.
    #[error("token not configured")]
    TokenNotConfigured,

    /// `projects.json` exists but cannot be parsed. Never silently reset:
    /// losing the acknowledged set would re-upload whole projects.
    #[error("project registry corrupt at {path}: {detail}")]
    RegistryCorrupt { path: String, detail: String },

    /// Upload kept failing on retryable conditions until retries ran out.
    #[error("upload failed after {attempts} attempts: {message}")]
    UploadTransient { attempts: usize, message: String },

    /// Upload was rejected outright (4xx or undecodable response).
    #[error("upload rejected: {message}")]
    UploadPermanent { message: String },

    /// Retrieval call failed after retries.
    #[error("retrieval failed: {0}")]
    Search(String),
}

impl BridgeError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UploadTransient { .. })
    }
}
