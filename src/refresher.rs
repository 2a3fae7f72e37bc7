//! OAuth2 token refresh against the authorization server.
//!
//! The refresher exchanges the stored refresh token for a new access
//! credential. It never writes the store itself: the scheduler is the
//! single writer, and the refresher only hands back the new record.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backoff::{retry_with_backoff, BackoffPolicy, RetryError, RetryOutcome};
use crate::config::ApiConfig;
use crate::credential::Credential;

/// Errors that can occur during a token refresh.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The stored credential has no refresh token to exchange.
    #[error("credential has no refresh token")]
    InvalidCredential,

    /// Network-level failure talking to the token endpoint.
    #[error("token endpoint network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned status {0}")]
    Status(StatusCode),

    /// The token endpoint answered 2xx but the body was not a token grant.
    #[error("malformed token response: {0}")]
    Decode(String),

    /// The retry budget for the exchange ran out.
    #[error("token refresh retries exhausted: {last}")]
    Exhausted { last: String },

    /// Shutdown was requested mid-refresh.
    #[error("token refresh cancelled by shutdown")]
    Cancelled,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl RefreshError {
    /// Whether a retry under the backoff policy can help.
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

/// Wire shape of a successful token grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Access token lifetime in seconds.
    expires_in: u64,
    token_type: String,
}

/// Exchanges refresh tokens at the authorization server's token endpoint.
pub struct TokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl TokenRefresher {
    /// Create a refresher from the API configuration.
    ///
    /// # Errors
    /// Returns `RefreshError::Client` if the HTTP client cannot be built.
    pub fn new(api: &ApiConfig, backoff: BackoffPolicy) -> Result<Self, RefreshError> {
        let client = Client::builder()
            .timeout(api.timeout)
            .build()
            .map_err(RefreshError::Client)?;

        Ok(Self {
            client,
            token_url: api.token_url.clone(),
            client_id: api.client_id.clone(),
            client_secret: api.client_secret.clone(),
            backoff,
        })
    }

    /// Exchange `credential`'s refresh token for a new record.
    ///
    /// Transient failures (connect, timeout, 5xx) are retried under the
    /// backoff policy; a 4xx answer fails immediately. On success the new
    /// record's expiry is `now + expires_in` as reported by the server.
    pub async fn refresh(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Credential, RefreshError> {
        if credential.refresh_token.is_empty() {
            return Err(RefreshError::InvalidCredential);
        }

        let refresh_token = credential.refresh_token.as_str();
        let result = retry_with_backoff(&self.backoff, cancel, |_| async move {
            match self.exchange(refresh_token).await {
                Ok(new_credential) => RetryOutcome::Success(new_credential),
                Err(e) if e.is_transient() => RetryOutcome::Retry(e),
                Err(e) => RetryOutcome::Fail(e),
            }
        })
        .await;

        match result {
            Ok(new_credential) => {
                tracing::info!(
                    expires_at = %new_credential.expires_at,
                    "access credential refreshed"
                );
                Ok(new_credential)
            }
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { elapsed, last }) => {
                tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %last,
                    "token refresh gave up"
                );
                Err(RefreshError::Exhausted {
                    last: last.to_string(),
                })
            }
            Err(RetryError::Cancelled) => Err(RefreshError::Cancelled),
        }
    }

    /// One exchange against the token endpoint.
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, RefreshError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "offline"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status(status));
        }

        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Decode(e.to_string()))?;

        Ok(Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_type: grant.token_type,
            expires_at: Utc::now() + chrono::Duration::seconds(grant.expires_in as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use chrono::Duration;

    fn refresher() -> TokenRefresher {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            token_url: "http://127.0.0.1:1/oauth/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            timeout: std::time::Duration::from_millis(200),
            record_limit: 25,
        };
        TokenRefresher::new(&api, BackoffPolicy::default()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_refresh_token_is_rejected_without_io() {
        let credential = Credential {
            access_token: "access".to_string(),
            refresh_token: String::new(),
            token_type: "bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };

        // Token URL is unroutable; reaching the network would error differently.
        let result = refresher()
            .refresh(&credential, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RefreshError::InvalidCredential)));
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(RefreshError::Status(StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(RefreshError::Status(StatusCode::BAD_GATEWAY).is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!RefreshError::Status(StatusCode::BAD_REQUEST).is_transient());
        assert!(!RefreshError::Status(StatusCode::UNAUTHORIZED).is_transient());
        assert!(!RefreshError::Decode("truncated".to_string()).is_transient());
    }
}
