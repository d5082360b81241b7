use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for upstream HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to an upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when a request or probe exceeds its deadline
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// Error when the outgoing request could not be constructed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A probe reached the instance but it answered with a non-success status
    #[error("Unhealthy response status: {0}")]
    UnhealthyStatus(u16),
}

/// Result type alias for upstream HTTP operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for talking to upstream instances.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward a fully rewritten request to an upstream instance, bounded by
    /// `timeout` (time to response headers; streaming bodies run on).
    async fn forward(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;

    /// Probe an instance's health endpoint. Returns the observed latency on
    /// success; any connect failure, timeout or non-success status is an
    /// error.
    async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<Duration>;
}
