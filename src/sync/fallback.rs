//! HTTP fallback used while the live channel is down.
//!
//! Three endpoints, all relative to the server base URL:
//!
//! - `GET /grid` → `{"grid": [[...]]}`
//! - `POST /place-pixel` with a bearer token → 2xx, or an error body whose
//!   text becomes the failure message
//! - `GET <backup path>` → `{"data": [[...]]}`, a static last-known-good
//!   snapshot

use std::time::Duration;

use neuroplace_wire::{BackupSnapshot, GridResponse, GridSnapshot, PlacePixelRequest};
use url::Url;

/// Failures from the HTTP fallback.
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    /// Request could not be sent or the body could not be read or decoded.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text, possibly empty.
        body: String,
    },

    /// An endpoint URL could not be built.
    #[error("invalid url: {0}")]
    Url(String),
}

impl FallbackError {
    /// Text suitable for a user notice: the server's own body when it sent
    /// one, otherwise `default`.
    #[must_use]
    pub fn user_message(&self, default: &str) -> String {
        match self {
            Self::Status { body, .. } if !body.trim().is_empty() => body.trim().to_owned(),
            Self::Status { .. } => default.to_owned(),
            other => other.to_string(),
        }
    }
}

/// Thin `reqwest` wrapper around the fallback endpoints.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct FallbackClient {
    base: Url,
    client: reqwest::Client,
}

impl FallbackClient {
    /// Client for `base` with a per-request timeout.
    #[must_use]
    pub fn new(base: Url, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { base, client }
    }

    /// Server base URL.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Fetch the authoritative grid.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] on transport failure, non-2xx status, or an
    /// undecodable body.
    pub async fn fetch_grid(&self) -> Result<GridSnapshot, FallbackError> {
        let url = self.endpoint("grid")?;
        tracing::debug!("GET {url}");
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        let body: GridResponse = response.json().await?;
        Ok(body.grid)
    }

    /// Place one pixel with bearer auth.
    ///
    /// # Errors
    ///
    /// A rejected placement comes back as [`FallbackError::Status`] carrying
    /// the server's message.
    pub async fn place_pixel(
        &self,
        request: &PlacePixelRequest,
        token: &str,
    ) -> Result<(), FallbackError> {
        let url = self.endpoint("place-pixel")?;
        tracing::debug!(x = request.x, y = request.y, "POST {url}");
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Fetch the static backup snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] if the file is missing or malformed.
    pub async fn fetch_backup(&self, path: &str) -> Result<GridSnapshot, FallbackError> {
        let url = self.endpoint(path)?;
        tracing::debug!("GET {url}");
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        let body: BackupSnapshot = response.json().await?;
        Ok(body.data)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FallbackError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| FallbackError::Url(format!("{path}: {e}")))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FallbackError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(FallbackError::Status { status, body })
}
