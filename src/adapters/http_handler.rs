//! Worker-side request handling.
//!
//! Every worker router owns a [`GatewayHandler`]: it authenticates and relays
//! the control surface (`/register`, `/restart`), renders the status page
//! from the worker's local snapshot, and proxies everything else to the
//! target selected by the circuit-breaking round-robin. Workers never mutate
//! registry state: control requests go through the owner's mailbox.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use http::{HeaderMap, Method, StatusCode, header, header::HeaderValue};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    core::{
        owner::OwnerCommand,
        registry::ServiceRegistration,
        snapshot::RegistrySnapshot,
    },
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
};

/// Header carrying the correlation identifier attached to proxied requests
/// and upstream error responses, for cross-process log correlation.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Header carrying the shared control-plane secret.
pub const SECRET_HEADER: &str = "x-postern-key";

/// Errors surfaced to clients, mapped onto status codes.
#[derive(Debug)]
enum RequestError {
    /// Missing or wrong shared secret on a control endpoint.
    Unauthorized,
    /// Malformed registration payload.
    BadRequest(String),
    /// No registered prefix matches the request path.
    NoRoute(String),
    /// The selected upstream could not be reached in time.
    Upstream {
        correlation_id: String,
        detail: String,
    },
    /// The gateway itself failed (owner mailbox gone, header build failure).
    Internal(String),
}

impl RequestError {
    fn into_response(self) -> Response<AxumBody> {
        match self {
            RequestError::Unauthorized => json_response(
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "success": false, "error": "authentication required" }),
                None,
            ),
            RequestError::BadRequest(detail) => json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "error": detail }),
                None,
            ),
            RequestError::NoRoute(path) => json_response(
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "success": false,
                    "error": format!("no service registered for path '{path}'"),
                }),
                None,
            ),
            RequestError::Upstream {
                correlation_id,
                detail,
            } => json_response(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "success": false,
                    "error": format!("upstream request failed: {detail}"),
                    "correlation_id": correlation_id.as_str(),
                }),
                Some(&correlation_id),
            ),
            RequestError::Internal(detail) => {
                tracing::error!("internal gateway error: {detail}");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "error": "internal gateway error" }),
                    None,
                )
            }
        }
    }
}

/// HTTP handler for one worker router.
pub struct GatewayHandler {
    snapshot: Arc<ArcSwap<RegistrySnapshot>>,
    http_client: Arc<dyn HttpClient>,
    commands: mpsc::Sender<OwnerCommand>,
    config: Arc<GatewayConfig>,
}

impl GatewayHandler {
    pub fn new(
        snapshot: Arc<ArcSwap<RegistrySnapshot>>,
        http_client: Arc<dyn HttpClient>,
        commands: mpsc::Sender<OwnerCommand>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            snapshot,
            http_client,
            commands,
            config,
        }
    }

    /// The worker's local snapshot handle, replaced wholesale on broadcast.
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<RegistrySnapshot>> {
        self.snapshot.clone()
    }

    /// Main request entry point. Never fails: every error becomes a response.
    pub async fn handle(&self, req: Request<AxumBody>, peer: SocketAddr) -> Response<AxumBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let timer = metrics::RequestTimer::new(&path, method.as_str());

        let response = if method == Method::POST && path == "/register" {
            match self.authorize(&req) {
                Ok(()) => self
                    .relay_registration(req)
                    .await
                    .unwrap_or_else(RequestError::into_response),
                Err(e) => e.into_response(),
            }
        } else if method == Method::POST && path == "/restart" {
            match self.authorize(&req) {
                Ok(()) => self
                    .relay_restart()
                    .await
                    .unwrap_or_else(RequestError::into_response),
                Err(e) => e.into_response(),
            }
        } else if method == Method::GET && path == "/gateway-status" {
            match self.authorize(&req) {
                Ok(()) => self.status_page(),
                Err(e) => e.into_response(),
            }
        } else {
            self.proxy(req, peer)
                .await
                .unwrap_or_else(RequestError::into_response)
        };

        drop(timer);
        metrics::increment_request_total(&path, method.as_str(), response.status().as_u16());
        response
    }

    /// Check the shared secret, supplied as a header or `key` query
    /// parameter. Runs before any routing logic on control endpoints.
    fn authorize(&self, req: &Request<AxumBody>) -> Result<(), RequestError> {
        let secret = self.config.shared_secret.as_str();
        if secret.is_empty() {
            return Err(RequestError::Unauthorized);
        }

        if let Some(value) = req.headers().get(SECRET_HEADER)
            && value.as_bytes() == secret.as_bytes()
        {
            return Ok(());
        }
        if let Some(query) = req.uri().query()
            && query
                .split('&')
                .any(|pair| pair.strip_prefix("key=") == Some(secret))
        {
            return Ok(());
        }
        Err(RequestError::Unauthorized)
    }

    /// Relay a registration to the registry owner and return its ack.
    async fn relay_registration(
        &self,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, RequestError> {
        let bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| RequestError::BadRequest(format!("failed to read body: {e}")))?
            .to_bytes();
        let registration: ServiceRegistration = serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::BadRequest(format!("invalid registration payload: {e}")))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(OwnerCommand::Register {
                registration,
                ack: ack_tx,
            })
            .await
            .map_err(|_| RequestError::Internal("registry owner unavailable".to_string()))?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(json_response(
                StatusCode::OK,
                serde_json::json!({ "success": true }),
                None,
            )),
            Ok(Err(e)) => Err(RequestError::BadRequest(e.to_string())),
            Err(_) => Err(RequestError::Internal(
                "registry owner dropped the ack".to_string(),
            )),
        }
    }

    /// Relay a restart request; the owner signals the worker supervisor.
    async fn relay_restart(&self) -> Result<Response<AxumBody>, RequestError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(OwnerCommand::Restart { ack: ack_tx })
            .await
            .map_err(|_| RequestError::Internal("registry owner unavailable".to_string()))?;
        ack_rx
            .await
            .map_err(|_| RequestError::Internal("registry owner dropped the ack".to_string()))?;

        Ok(json_response(
            StatusCode::OK,
            serde_json::json!({ "success": true }),
            None,
        ))
    }

    /// Render the operator status page from the local snapshot.
    fn status_page(&self) -> Response<AxumBody> {
        let snapshot = self.snapshot.load();

        let mut rows = String::new();
        for entry in snapshot.entries() {
            for target in &entry.targets {
                let (status, latency, failures, last_error) = entry
                    .metric(target)
                    .map(|m| {
                        (
                            m.status.to_string(),
                            format!("{} ms", m.latency_ms),
                            m.fail_count.to_string(),
                            m.last_error.clone().unwrap_or_else(|| "-".to_string()),
                        )
                    })
                    .unwrap_or_else(|| {
                        ("healthy".to_string(), "-".to_string(), "0".to_string(), "-".to_string())
                    });
                rows.push_str(&format!(
                    "<tr><td>{}</td><td><code>{}</code></td><td><code>{}</code></td>\
                     <td class=\"{status}\">{status}</td><td>{latency}</td>\
                     <td>{failures}</td><td>{last_error}</td></tr>\n",
                    entry.service_name, entry.prefix, target,
                ));
            }
        }

        let html = format!(
            "<!DOCTYPE html>\n<html><head><title>Postern Gateway Status</title>\n\
             <style>\n\
             body {{ font-family: sans-serif; margin: 2em; }}\n\
             table {{ border-collapse: collapse; }}\n\
             td, th {{ border: 1px solid #ccc; padding: 0.4em 0.8em; }}\n\
             .healthy {{ color: #2e7d32; }}\n\
             .failing {{ color: #c62828; }}\n\
             </style></head><body>\n\
             <h1>Postern Gateway</h1>\n\
             <p>{} route(s) registered, generated {}</p>\n\
             <table>\n\
             <tr><th>Service</th><th>Prefix</th><th>Target</th><th>Status</th>\
             <th>Latency</th><th>Strikes</th><th>Last error</th></tr>\n\
             {rows}</table>\n</body></html>\n",
            snapshot.len(),
            chrono::Utc::now().to_rfc3339(),
        );

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(AxumBody::from(html))
            .unwrap_or_else(|_| Response::new(AxumBody::from("status page unavailable")))
    }

    /// Proxy a request to the selected upstream, tunnelling protocol
    /// upgrades (WebSocket) as raw bidirectional byte streams.
    async fn proxy(
        &self,
        mut req: Request<AxumBody>,
        peer: SocketAddr,
    ) -> Result<Response<AxumBody>, RequestError> {
        let correlation_id = Uuid::new_v4().to_string();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        // Clone what we need out of the snapshot before awaiting anything.
        let (target, service_name) = {
            let snapshot = self.snapshot.load();
            let entry = snapshot
                .find_route(&path)
                .ok_or_else(|| RequestError::NoRoute(path.clone()))?;
            let target = entry
                .pick_target()
                .ok_or_else(|| RequestError::NoRoute(path.clone()))?
                .to_string();
            (target, entry.service_name.clone())
        };

        // For upgrade requests, take the client-side upgrade handle before
        // the request is consumed by the forward.
        let client_upgrade = req
            .headers()
            .contains_key(header::UPGRADE)
            .then(|| hyper::upgrade::on(&mut req));

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.clone());
        *req.uri_mut() = format!("{target}{path_and_query}")
            .parse()
            .map_err(|e| RequestError::Internal(format!("failed to build upstream uri: {e}")))?;

        append_forwarded_for(req.headers_mut(), peer);
        insert_header(req.headers_mut(), CORRELATION_HEADER, &correlation_id);

        let span = tracing_setup::create_request_span(method.as_str(), &path, &correlation_id);
        tracing::debug!(
            parent: &span,
            service = %service_name,
            target_url = %target,
            "proxying request"
        );

        let deadline = Duration::from_secs(self.config.proxy.timeout_secs);
        match self
            .http_client
            .forward(req, deadline)
            .instrument(span)
            .await
        {
            Ok(mut response) => {
                if response.status() == StatusCode::SWITCHING_PROTOCOLS
                    && let Some(client_upgrade) = client_upgrade
                {
                    let upstream_upgrade = hyper::upgrade::on(&mut response);
                    tunnel(client_upgrade, upstream_upgrade, correlation_id.clone());
                }
                metrics::increment_upstream_request(&target, response.status().as_u16());
                insert_header(response.headers_mut(), CORRELATION_HEADER, &correlation_id);
                Ok(response)
            }
            Err(e) => {
                metrics::increment_upstream_request(&target, StatusCode::BAD_GATEWAY.as_u16());
                tracing::warn!(
                    correlation_id = %correlation_id,
                    target_url = %target,
                    "upstream request failed: {e}"
                );
                Err(RequestError::Upstream {
                    correlation_id,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Spawn the bidirectional byte tunnel backing an upgraded connection.
fn tunnel(
    client_upgrade: hyper::upgrade::OnUpgrade,
    upstream_upgrade: hyper::upgrade::OnUpgrade,
    correlation_id: String,
) {
    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok((client_io, upstream_io)) => {
                let mut client_io = TokioIo::new(client_io);
                let mut upstream_io = TokioIo::new(upstream_io);
                match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
                    Ok((from_client, from_upstream)) => tracing::debug!(
                        correlation_id = %correlation_id,
                        from_client,
                        from_upstream,
                        "tunnel closed"
                    ),
                    Err(e) => tracing::debug!(
                        correlation_id = %correlation_id,
                        "tunnel terminated: {e}"
                    ),
                }
            }
            Err(e) => tracing::warn!(
                correlation_id = %correlation_id,
                "connection upgrade failed: {e}"
            ),
        }
    });
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::debug!("skipping invalid value for header {name}"),
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {}", peer.ip()),
        None => peer.ip().to_string(),
    };
    insert_header(headers, "x-forwarded-for", &value);
}

fn json_response(
    status: StatusCode,
    body: serde_json::Value,
    correlation_id: Option<&str>,
) -> Response<AxumBody> {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = correlation_id {
        builder = builder.header(CORRELATION_HEADER, id);
    }
    builder
        .body(AxumBody::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(AxumBody::from(body.to_string())))
}
