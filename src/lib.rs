//! Postern - a self-provisioning ingress gateway.
//!
//! Postern is a registration-driven reverse proxy. Backend services announce
//! themselves over a small HTTP protocol (`POST /register` with a name, an
//! instance URL and one or more path prefixes) and the gateway takes care of
//! the rest: longest-prefix routing, health-checked round-robin load
//! balancing with circuit breaking, durable registry state, and TLS that can
//! provision itself.
//!
//! # Architecture
//! The registry has exactly one writer: the [`core::owner::RegistryOwner`]
//! actor. Worker routers and the health checker talk to it through a command
//! mailbox and receive immutable [`core::snapshot::RegistrySnapshot`]s over a
//! replication channel, replacing their local copy wholesale, so the read path
//! takes no locks. A supervisor keeps the N worker routers alive and recycles
//! them on demand.
//!
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the registry logic inside `core`. End users should prefer
//! the re-exports documented below instead of reaching into internal modules
//! directly.
//!
//! # Quick Example
//! ```no_run
//! use postern::config::GatewayConfig;
//!
//! # fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::builder()
//!     .listen_addr("0.0.0.0:8443")
//!     .shared_secret("swordfish")
//!     .tls_self_signed("certs")
//!     .build()
//!     .map_err(|e| eyre::eyre!(e))?;
//! // Wire the config into the binary crate's serve path, or embed the
//! // owner/supervisor pieces in your own runtime.
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain specific error type
//! (`RegistryError`, `StoreError`, `ProvisioningError`, `HttpClientError`).
//!
//! # Concurrency Model
//! One owner task, one health-checker task, N worker tasks, one supervisor.
//! Coordination is message passing only; the single shared-memory structure
//! on the hot path is each worker's `ArcSwap` snapshot handle.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod supervisor;
pub mod tls;
pub mod tracing_setup;
pub mod utils;
pub mod worker;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{
        GatewayHandler, HealthChecker, HttpClientAdapter, RegistryStore,
        http_handler::{CORRELATION_HEADER, SECRET_HEADER},
    },
    core::{OwnerCommand, Registry, RegistryOwner, RegistrySnapshot, ServiceRegistration},
    ports::http_client::HttpClient,
    supervisor::WorkerSupervisor,
    utils::{GracefulShutdown, ShutdownReason},
    worker::Worker,
};
