use std::{path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use postern::{
    GracefulShutdown, HealthChecker, HttpClientAdapter, Registry, RegistryOwner, RegistryStore,
    WorkerSupervisor,
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
};
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "postern.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "postern.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "postern.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "postern.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path).await,
        "init" => return init_config_command(&config_path).await,
        "serve" => serve(&config_path).await,
        _ => unreachable!(),
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if rustls::crypto::CryptoProvider::install_default(provider).is_err() {
        // A provider may already be installed by an embedding host.
        tracing::debug!("rustls crypto provider was already installed");
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration:\n{e}"))?;
    let config = Arc::new(config);

    // Recover persisted registry state. Metrics are rebuilt by probing, and a
    // corrupt file must not keep the gateway down.
    let store = RegistryStore::new(&config.state_path);
    let registry = match store.load() {
        Ok(Some(persisted)) => {
            tracing::info!(
                routes = persisted.len(),
                state_path = %config.state_path,
                "restored registry state"
            );
            Registry::restore(
                persisted
                    .into_iter()
                    .map(|(prefix, service)| (prefix, service.name, service.targets)),
            )
        }
        Ok(None) => {
            tracing::info!(state_path = %config.state_path, "no registry state found, starting empty");
            Registry::new()
        }
        Err(e) => {
            tracing::error!("failed to read registry state, starting empty: {e}");
            Registry::new()
        }
    };

    // TLS bootstrap runs once, before any worker exists.
    let tls_acceptor = postern::tls::bootstrap(&config.tls);

    // Wiring: workers and the health checker talk to the owner through the
    // command mailbox; the owner replicates snapshots over the watch channel.
    let (command_tx, command_rx) = mpsc::channel(64);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(registry.snapshot()));
    let (restart_tx, restart_rx) = mpsc::channel(4);

    let owner = RegistryOwner::new(
        registry,
        store,
        command_rx,
        snapshot_tx,
        restart_tx,
        config.health.strikes,
    );
    tokio::spawn(owner.run());

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create upstream HTTP client")?);

    let health_checker = HealthChecker::new(
        snapshot_rx.clone(),
        command_tx.clone(),
        http_client.clone(),
        config.health.clone(),
    );
    tokio::spawn(health_checker.run());

    let graceful_shutdown = Arc::new(GracefulShutdown::with_grace(Duration::from_secs(
        config.shutdown_grace_secs,
    )));
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let local_addr = listener.local_addr().context("Failed to get local addr")?;

    tracing::info!(
        "Postern gateway listening on {} (TLS: {}, workers: {})",
        local_addr,
        tls_acceptor.is_some(),
        config.worker_count()
    );
    println!(
        "Postern gateway listening on {} (TLS: {}, workers: {})",
        local_addr,
        tls_acceptor.is_some(),
        config.worker_count()
    );

    let supervisor = WorkerSupervisor::new(
        Arc::new(listener),
        tls_acceptor,
        http_client,
        command_tx,
        config.clone(),
        snapshot_rx,
        restart_rx,
        graceful_shutdown.clone(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run());

    // Block until a terminal shutdown signal; worker recycling happens
    // entirely inside the supervisor.
    let mut stop_token = graceful_shutdown.token();
    let reason = stop_token.wait_for_stop().await;
    tracing::info!("shutting down: {:?}", reason);

    // Give the supervisor the drain grace plus a little slack to unwind.
    let drain = graceful_shutdown.grace() + Duration::from_secs(5);
    if tokio::time::timeout(drain, supervisor_handle).await.is_err() {
        tracing::warn!("supervisor did not stop within the drain window");
    }

    tracing_setup::shutdown_tracing();
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config: GatewayConfig = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Workers: {}", config.worker_count());
            println!("   • State File: {}", config.state_path);
            println!("   • TLS Enabled: {}", config.tls.enabled);
            println!(
                "   • Health Checks: {} (every {}s, {} strikes)",
                config.health.enabled, config.health.interval_secs, config.health.strikes
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Set a non-empty shared_secret");
            println!("   • Verify listen address format (e.g., '0.0.0.0:8443')");
            println!("   • Provide tls.cert_path and tls.key_path together, or neither");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Postern Gateway Configuration

# The address to listen on
listen_addr = "0.0.0.0:8080"

# Shared secret required on /register, /restart and /gateway-status
shared_secret = "change-me"

# Worker routers; 0 means one per available core
workers = 0

# Where registry state is persisted across restarts
state_path = "registry.json"

[health]
enabled = true
interval_secs = 30
timeout_secs = 5
path = "/health"
strikes = 3

[proxy]
# Long timeout so streaming responses and tunnels survive
timeout_secs = 3600

[tls]
enabled = false
# With enabled = true and no material, a self-signed pair is provisioned
# cert_path = "certs/gateway.cert.pem"
# key_path = "certs/gateway.key.pem"
cache_dir = "certs"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'postern serve --config {config_path}' to start the gateway");
    Ok(())
}
