//! Common utilities for the tailnet API client
//!
//! Provides the authenticated HTTP wrapper shared by the directory calls.

use crate::error::TailnetError;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// HTTP client wrapper with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, TailnetError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = check_status(response, "GET", path).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(TailnetError::Serialization)
    }

    /// Make a PUT request with a JSON body, discarding the response body
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), TailnetError> {
        let url = self.build_url(path);
        debug!(
            "PUT {} with body: {}",
            url,
            serde_json::to_string(body).unwrap_or_default()
        );

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        check_status(response, "PUT", path).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), TailnetError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        check_status(response, "DELETE", path).await?;
        Ok(())
    }
}

/// Map non-success responses onto `TailnetError` variants.
pub(crate) async fn check_status(
    response: Response,
    method: &str,
    path: &str,
) -> Result<Response, TailnetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(TailnetError::NotFound(format!(
            "{} {}: {}",
            method, path, body
        ))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TailnetError::Authentication(
            format!("{} {} failed: {} - {}", method, path, status, body),
        )),
        StatusCode::BAD_REQUEST => Err(TailnetError::InvalidRequest(format!(
            "{} {} failed: {}",
            method, path, body
        ))),
        _ => Err(TailnetError::Api {
            status: status.as_u16(),
            message: format!("{} {} failed: {}", method, path, body),
        }),
    }
}
