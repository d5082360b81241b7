pub mod cert_provider;
pub mod health_checker;
pub mod http_client;
pub mod http_handler;
pub mod store;

/// Re-export commonly used types from adapters
pub use cert_provider::{FileCertProvider, SelfSignedCertProvider};
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use http_handler::GatewayHandler;
pub use store::RegistryStore;
