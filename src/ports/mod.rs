pub mod cert_provider;
pub mod http_client;
