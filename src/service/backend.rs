// Copyright 2024 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use config::{meta::query::Response, CACHE_CONTROL_HEADER, VERSION};
use reqwest::header::AUTHORIZATION;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Request(_) | BackendError::Timeout => true,
            BackendError::Status { status, .. } => *status >= 500,
            BackendError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Request(e.to_string())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheDirective {
    MaxAge(u64),
    NoCache,
}

impl fmt::Display for CacheDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDirective::MaxAge(secs) => write!(f, "max-age={secs}"),
            CacheDirective::NoCache => f.write_str("no-cache"),
        }
    }
}

/// One forwarded chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendRequest {
    /// Inbound query parameters other than `q`, in their original order.
    pub params: Vec<(String, String)>,
    pub query: String,
    pub directive: CacheDirective,
    pub authorization: Option<String>,
    /// Only side-effect free statements may be sent twice.
    pub retryable: bool,
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, req: &BackendRequest) -> Result<Response, BackendError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpBackend {
    pub fn new(cfg: &config::Backend) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout))
            .timeout(Duration::from_secs(cfg.timeout))
            .user_agent(format!("chopcache/{VERSION}"))
            .build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_millis(cfg.retry_delay),
        })
    }

    async fn send(&self, req: &BackendRequest) -> Result<Response, BackendError> {
        let mut builder = self
            .client
            .get(&self.url)
            .query(&req.params)
            .query(&[("q", req.query.as_str())])
            .header(CACHE_CONTROL_HEADER, req.directive.to_string());
        if let Some(auth) = &req.authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn query(&self, req: &BackendRequest) -> Result<Response, BackendError> {
        let mut attempt = 0;
        loop {
            match self.send(req).await {
                Err(e) if req.retryable && e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "[BACKEND] attempt {} failed: {e}, retrying in {}ms",
                        attempt + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("[BACKEND] query failed: {e}");
                    return Err(e);
                }
                Ok(resp) => return Ok(resp),
            }
        }
    }
}
