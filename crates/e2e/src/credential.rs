//! OAuth client-credentials token cache

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::ApiSettings;
use crate::error::{HarnessError, HarnessResult};

/// An access token and the instant it stops being accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Fails with `Authentication` when `expires_in` lands past the last
    /// representable instant
    pub fn new(value: impl Into<String>, expires_in: Duration) -> HarnessResult<Self> {
        let expires_at = chrono::Duration::from_std(expires_in)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                HarnessError::Authentication(format!(
                    "token lifetime of {} seconds is out of range",
                    expires_in.as_secs()
                ))
            })?;
        Ok(Self {
            value: value.into(),
            expires_at,
        })
    }

    /// Valid while `now < expires_at - margin`
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| self.expires_at.checked_sub_signed(margin))
            .map_or(false, |deadline| now < deadline)
    }

    pub fn is_valid(&self, margin: Duration) -> bool {
        self.is_valid_at(Utc::now(), margin)
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Caches a bearer token obtained through the client-credentials grant.
///
/// The cache slot is an async mutex held for the whole exchange: callers that
/// arrive while a token is being fetched wait for it instead of starting their
/// own request.
pub struct CredentialCache {
    settings: ApiSettings,
    http_client: reqwest::Client,
    cached: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(settings: ApiSettings) -> HarnessResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self::with_client(settings, http_client))
    }

    pub fn with_client(settings: ApiSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid token, exchanging for a new one when needed
    pub async fn get_token(&self) -> HarnessResult<String> {
        let mut cached = self.cached.lock().await;

        if let Some(credential) = cached.as_ref() {
            if credential.is_valid(self.settings.safety_margin()) {
                return Ok(credential.value.clone());
            }
            debug!("Cached token expires at {}, refreshing", credential.expires_at);
        }

        let credential = self.exchange().await?;
        let value = credential.value.clone();
        *cached = Some(credential);
        Ok(value)
    }

    /// Forget the cached token so the next call performs an exchange
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    /// The cached credential, if any, regardless of validity
    pub async fn current(&self) -> Option<Credential> {
        self.cached.lock().await.clone()
    }

    async fn exchange(&self) -> HarnessResult<Credential> {
        debug!(
            "OAuth request: client_id={}, scope={}, grant_type={}",
            self.settings.client_id, self.settings.scope, self.settings.grant_type
        );

        let response = self
            .http_client
            .post(&self.settings.token_url)
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("scope", self.settings.scope.as_str()),
                ("grant_type", self.settings.grant_type.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            error!("Failed to get access token. Status: {}, Response: {}", status, body);
            return Err(HarnessError::Authentication(format!(
                "token request failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Invalid token response: {}", body);
            HarnessError::Authentication(format!("invalid token response: {}", e))
        })?;

        if token.access_token.is_empty() {
            return Err(HarnessError::Authentication(
                "token response carried an empty access_token".to_string(),
            ));
        }

        info!("Obtained new access token, expires in {} seconds", token.expires_in);
        debug!(
            "Token type: {}, scope: {}",
            token.token_type.as_deref().unwrap_or("-"),
            token.scope.as_deref().unwrap_or("-")
        );

        Credential::new(token.access_token, Duration::from_secs(token.expires_in))
    }

    fn transport_error(&self, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::timeout(
                format!("token exchange at {}", self.settings.token_url),
                self.settings.request_timeout_ms,
            )
        } else {
            HarnessError::Authentication(format!("token request failed: {}", e))
        }
    }
}
