use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Upstream HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Forwards already-rewritten requests to upstream instances, preserving
///   headers and streaming bodies
/// * Fixes up the Host header to match the upstream authority
/// * Performs GET based liveness probes with a per-probe timeout, measuring
///   latency
///
/// Retry policy and circuit breaking live above this adapter: the worker
/// router excludes failing targets, and the registry owner evicts them.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new upstream client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!("upstream HTTP client created");
        Ok(Self { client })
    }

    /// Rewrite the Host header to the upstream authority so virtual-hosted
    /// upstreams see the address they were registered under.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let host = req
            .uri()
            .host()
            .ok_or_else(|| HttpClientError::InvalidRequest("outgoing URI has no host".into()))?;
        let value = match req.uri().port() {
            Some(port) => format!("{host}:{}", port.as_u16()),
            None => host.to_string(),
        };
        let value = HeaderValue::from_str(&value)
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid host header: {e}")))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn forward(
        &self,
        mut req: Request<AxumBody>,
        deadline: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_host_header(&mut req)?;

        // ALPN negotiates the actual version; forcing 1.1 here keeps
        // plaintext upstreams on a protocol they all speak.
        *req.version_mut() = Version::HTTP_11;

        let method = req.method().clone();
        let uri = req.uri().clone();

        let span = tracing::info_span!(
            "upstream_request",
            upstream.url = %uri,
            http.method = %method,
            http.status_code = tracing::field::Empty,
        );

        match timeout(deadline, self.client.request(req))
            .instrument(span.clone())
            .await
        {
            Ok(Ok(response)) => {
                span.record("http.status_code", response.status().as_u16());

                let (mut parts, body) = response.into_parts();
                // The body is re-framed on the way out to the client.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(body)))
            }
            Ok(Err(e)) => {
                tracing::warn!("upstream request {method} {uri} failed: {e}");
                Err(HttpClientError::ConnectionError(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!("upstream request {method} {uri} timed out");
                Err(HttpClientError::Timeout(deadline.as_secs()))
            }
        }
    }

    async fn probe(&self, url: &str, deadline: Duration) -> HttpClientResult<Duration> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let started = Instant::now();
        match timeout(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let elapsed = started.elapsed();
                let status = response.status();
                // Consume the body so the connection can be reused.
                let _ = response.into_body().collect().await;
                if status.is_success() {
                    tracing::debug!("probe {url} ok in {}ms", elapsed.as_millis());
                    Ok(elapsed)
                } else {
                    Err(HttpClientError::UnhealthyStatus(status.as_u16()))
                }
            }
            Ok(Err(e)) => Err(HttpClientError::ConnectionError(e.to_string())),
            Err(_) => Err(HttpClientError::Timeout(deadline.as_secs())),
        }
    }
}
