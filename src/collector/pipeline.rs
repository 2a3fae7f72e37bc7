//! Best-effort collection across the six data domains.
//!
//! One cycle performs one authenticated GET per domain, each under its own
//! retry budget. A domain that stays down is recorded as a [`DomainError`]
//! and its snapshot slot stays empty; the remaining domains are still
//! fetched. The whole cycle fails only when the credential is already
//! invalid at entry.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backoff::{retry_with_backoff, BackoffPolicy, RetryError, RetryOutcome};
use crate::collector::types::{
    BodyMeasurement, CycleRecord, Domain, DomainError, RecordPage, RecoveryRecord, SleepRecord,
    Snapshot, UserProfile, WorkoutRecord,
};
use crate::config::ApiConfig;
use crate::credential::Credential;

/// Errors that abort a whole collection cycle.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The credential was already expired when the cycle started.
    #[error("credential is expired or invalid")]
    InvalidCredential,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// A single failed request against one domain endpoint.
#[derive(Debug, Error)]
enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("malformed response body: {0}")]
    Decode(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status(status) => status.is_server_error(),
            Self::Decode(_) => false,
        }
    }
}

/// Fetches all domains from the remote data API and assembles a snapshot.
pub struct Pipeline {
    client: Client,
    base_url: String,
    record_limit: u32,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("base_url", &self.base_url)
            .field("record_limit", &self.record_limit)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline from the API configuration.
    ///
    /// # Errors
    /// Returns `CollectError::Client` if the HTTP client cannot be built.
    pub fn new(api: &ApiConfig, backoff: BackoffPolicy) -> Result<Self, CollectError> {
        let client = Client::builder()
            .timeout(api.timeout)
            .build()
            .map_err(CollectError::Client)?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            record_limit: api.record_limit,
            backoff,
        })
    }

    /// Run one collection cycle with `credential`.
    ///
    /// Validity is checked once, up front; a credential that expires
    /// mid-cycle does not abort the cycle. Domains are fetched in a fixed
    /// order and a failure in one never prevents the others.
    pub async fn collect(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<(Snapshot, Vec<DomainError>), CollectError> {
        if !credential.is_valid(Utc::now()) {
            return Err(CollectError::InvalidCredential);
        }

        let token = credential.access_token.as_str();
        let mut snapshot = Snapshot::empty(Utc::now());
        let mut errors = Vec::new();

        for domain in Domain::ALL {
            match domain {
                Domain::Profile => match self.fetch::<UserProfile>(domain, token, cancel).await {
                    Ok(profile) => snapshot.profile = Some(profile),
                    Err(e) => errors.push(e),
                },
                Domain::Body => match self.fetch::<BodyMeasurement>(domain, token, cancel).await {
                    Ok(body) => snapshot.body = Some(body),
                    Err(e) => errors.push(e),
                },
                Domain::Sleep => match self.fetch_page::<SleepRecord>(domain, token, cancel).await {
                    Ok(records) => snapshot.sleep = Some(records),
                    Err(e) => errors.push(e),
                },
                Domain::Recovery => {
                    match self.fetch_page::<RecoveryRecord>(domain, token, cancel).await {
                        Ok(records) => snapshot.recovery = Some(records),
                        Err(e) => errors.push(e),
                    }
                }
                Domain::Workout => {
                    match self.fetch_page::<WorkoutRecord>(domain, token, cancel).await {
                        Ok(records) => snapshot.workouts = Some(records),
                        Err(e) => errors.push(e),
                    }
                }
                Domain::Cycle => match self.fetch_page::<CycleRecord>(domain, token, cancel).await {
                    Ok(records) => snapshot.cycles = Some(records),
                    Err(e) => errors.push(e),
                },
            }

            if cancel.is_cancelled() {
                // Shutdown grace expired mid-cycle; leave the remaining
                // slots unattempted rather than racing the abort.
                break;
            }
        }

        tracing::debug!(
            populated = snapshot.populated_domains(),
            failed = errors.len(),
            "collection cycle assembled"
        );

        Ok((snapshot, errors))
    }

    /// Fetch a paginated domain and unwrap its first page of records.
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        domain: Domain,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, DomainError> {
        self.fetch::<RecordPage<T>>(domain, token, cancel)
            .await
            .map(|page| page.records)
    }

    /// Fetch one domain under the backoff policy.
    async fn fetch<T: DeserializeOwned>(
        &self,
        domain: Domain,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<T, DomainError> {
        let result = retry_with_backoff(&self.backoff, cancel, |_| async move {
            match self.get::<T>(domain, token).await {
                Ok(value) => RetryOutcome::Success(value),
                Err(e) if e.is_transient() => RetryOutcome::Retry(e),
                Err(e) => RetryOutcome::Fail(e),
            }
        })
        .await;

        result.map_err(|e| {
            let reason = match e {
                RetryError::Exhausted { elapsed, last } => {
                    format!("retries exhausted after {elapsed:?}: {last}")
                }
                RetryError::Permanent(err) => err.to_string(),
                RetryError::Cancelled => "cancelled by shutdown".to_string(),
            };
            tracing::warn!(domain = %domain, reason = %reason, "domain fetch failed");
            DomainError { domain, reason }
        })
    }

    /// One authenticated GET against a domain endpoint.
    async fn get<T: DeserializeOwned>(&self, domain: Domain, token: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, domain.path());
        let mut request = self.client.get(&url).bearer_auth(token);
        if domain.is_paginated() {
            request = request.query(&[("limit", self.record_limit)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
