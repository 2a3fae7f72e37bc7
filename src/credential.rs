//! Credential record and persistent store.
//!
//! The [`Credential`] is the only mutable shared resource in the service:
//! the refresh activity replaces it and the collection activity reads it,
//! concurrently. All access goes through the [`CredentialStore`] handle,
//! which serializes every load and save through a single owner task so a
//! reader can never observe a partially written record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod store;

pub use store::CredentialStore;

/// Errors that can occur in the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No credential record exists at the configured path.
    #[error("no credential found; run the interactive authorization flow first")]
    NotFound,

    /// Filesystem error while reading or writing the record.
    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),

    /// The record on disk is not valid JSON for a credential.
    #[error("malformed credential record: {0}")]
    Json(#[from] serde_json::Error),

    /// The store owner task is gone.
    #[error("credential store is shut down")]
    Closed,
}

/// An OAuth2-style credential: access/refresh token pair plus expiry.
///
/// A refresh replaces the entire record; the fields of one record are never
/// mixed with another. Validity is a pure function of `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token presented to the remote data API.
    pub access_token: String,
    /// Opaque token exchanged at the authorization server for a new record.
    pub refresh_token: String,
    /// Token kind as reported by the authorization server (e.g., "bearer").
    pub token_type: String,
    /// Absolute expiry of the access token (UTC).
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the access token is still valid at `now`.
    ///
    /// Pure expiry comparison; performs no I/O and no network call.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Convenience check against the current wall clock.
    pub fn is_valid_now(&self) -> bool {
        self.is_valid(Utc::now())
    }
}
