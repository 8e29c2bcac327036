//! Bearer-authenticated JSON client for the Books API

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Status and raw body of an API call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    /// Decode the body; an undecodable body counts as an assertion failure
    pub fn json<T: DeserializeOwned>(&self) -> HarnessResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            HarnessError::assertion(format!(
                "response body is not a valid {}: {} (body: {})",
                std::any::type_name::<T>(),
                e,
                self.body
            ))
        })
    }

    pub fn expect_status(&self, expected: StatusCode) -> HarnessResult<&Self> {
        if self.status != expected {
            return Err(HarnessError::assertion(format!(
                "expected status {}, got {} (body: {})",
                expected, self.status, self.body
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> HarnessResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, endpoint: &str) -> HarnessResult<ApiResponse> {
        self.send(Method::GET, endpoint, None::<&()>).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> HarnessResult<ApiResponse> {
        self.send(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> HarnessResult<ApiResponse> {
        self.send(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> HarnessResult<ApiResponse> {
        self.send(Method::DELETE, endpoint, None::<&()>).await
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&T>,
    ) -> HarnessResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} {}", method, url);

        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HarnessError::timeout(format!("{} {}", method, url), self.timeout.as_millis() as u64)
            } else {
                HarnessError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        debug!("{} {} -> {}", method, url, status);

        Ok(ApiResponse { status, body })
    }
}
