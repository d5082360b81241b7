//! Worker routers.
//!
//! N workers run in parallel, all accepting from the same listener. Each one
//! holds its own local registry snapshot, replaced wholesale whenever the
//! owner broadcasts, and serves HTTP/1.1 + HTTP/2 connections with upgrade
//! support. Workers know nothing about each other; the supervisor respawns
//! any that die.
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use hyper::{Request, body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    adapters::http_handler::GatewayHandler,
    core::snapshot::RegistrySnapshot,
    utils::graceful_shutdown::ShutdownToken,
};

/// One worker router task.
pub struct Worker {
    id: usize,
    listener: Arc<TcpListener>,
    tls: Option<TlsAcceptor>,
    handler: Arc<GatewayHandler>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    shutdown: ShutdownToken,
    drain_timeout: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        listener: Arc<TcpListener>,
        tls: Option<TlsAcceptor>,
        handler: Arc<GatewayHandler>,
        snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
        shutdown: ShutdownToken,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            id,
            listener,
            tls,
            handler,
            snapshots,
            shutdown,
            drain_timeout,
        }
    }

    /// Accept-and-serve loop. Returns the worker id so the supervisor knows
    /// which slot to respawn.
    pub async fn run(self) -> usize {
        let Worker {
            id,
            listener,
            tls,
            handler,
            mut snapshots,
            mut shutdown,
            drain_timeout,
        } = self;

        let local_snapshot = handler.snapshot_handle();
        // Catch up on any broadcast that happened between construction and
        // this task actually starting.
        local_snapshot.store(snapshots.borrow_and_update().clone());

        let mut connections: JoinSet<()> = JoinSet::new();
        tracing::info!(worker = id, "worker router started");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let tls = tls.clone();
                        let handler = handler.clone();
                        connections.spawn(async move {
                            serve_connection(stream, peer, tls, handler).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(worker = id, "accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                changed = snapshots.changed() => match changed {
                    Ok(()) => {
                        // Wholesale replacement: in-flight lookups keep the
                        // generation they loaded, new ones see this one.
                        local_snapshot.store(snapshots.borrow_and_update().clone());
                        tracing::debug!(worker = id, "registry snapshot replaced");
                    }
                    Err(_) => {
                        tracing::info!(worker = id, "replication channel closed; stopping");
                        break;
                    }
                },
                _ = shutdown.wait_for_stop() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Stop accepting, then drain what is still in flight.
        if !connections.is_empty() {
            tracing::info!(
                worker = id,
                in_flight = connections.len(),
                "worker draining connections"
            );
            let drained = tokio::time::timeout(drain_timeout, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(worker = id, "drain timed out; aborting remaining connections");
                connections.abort_all();
            }
        }

        tracing::info!(worker = id, "worker router stopped");
        id
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    handler: Arc<GatewayHandler>,
) {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_io(tls_stream, peer, handler).await,
            Err(e) => tracing::debug!("TLS handshake with {peer} failed: {e}"),
        },
        None => serve_io(stream, peer, handler).await,
    }
}

async fn serve_io<I>(io: I, peer: SocketAddr, handler: Arc<GatewayHandler>)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = handler.clone();
        async move {
            let (parts, body) = req.into_parts();
            let req = Request::from_parts(parts, AxumBody::new(body));
            Ok::<_, Infallible>(handler.handle(req, peer).await)
        }
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(io), service)
        .await
    {
        tracing::debug!("connection from {peer} ended: {e}");
    }
}
