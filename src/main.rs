use clap::Parser;
use roadlink_server::{
    config::{is_valid_custom_ip, ServerConfig, SharedSettings},
    heartbeat::{HeartbeatEngine, HttpBackend},
    outbound::{spawn_pps_sampler, PpsCounter},
    registry::ClientRegistry,
    resources::{DirectoryCatalog, ResourceCatalog},
    shutdown::ShutdownCoordinator,
    SERVER_VERSION,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Public IPv4 to report to the backend instead of the autodetected one
    custom_ip: Option<String>,

    /// Path to server.toml configuration file
    #[arg(short, long, default_value = "./server.toml")]
    config: String,

    /// Override log level (trace|debug|info|warn|error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = args.log_level.as_deref().unwrap_or("info");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!("Roadlink Server v{}", SERVER_VERSION);

    let mut config = ServerConfig::load_or_default(&args.config);
    info!("Configuration loaded from: {}", args.config);

    if let Some(ip) = args.custom_ip {
        if is_valid_custom_ip(&ip) {
            config.network.custom_ip = Some(ip);
            info!("server started with custom IP");
        } else {
            warn!("IP specified is invalid! Ignoring");
        }
    }

    let settings = SharedSettings::new(config.clone());
    let registry = Arc::new(ClientRegistry::new());
    let shutdown = Arc::new(ShutdownCoordinator::new());

    let resources: Arc<dyn ResourceCatalog> =
        Arc::new(DirectoryCatalog::scan(Path::new(&config.content.resources_dir)));
    info!(
        "serving {} client mod(s), {} bytes total",
        resources.mods_loaded(),
        resources.total_size()
    );

    let pps = Arc::new(PpsCounter::new());
    spawn_pps_sampler(Arc::clone(&pps), &shutdown);

    let engine = HeartbeatEngine::new(
        settings.clone(),
        Arc::clone(&registry),
        Arc::clone(&resources),
        Arc::clone(&pps),
        HttpBackend::new(),
    );
    let is_auth = engine.auth_flag();
    engine.spawn(&shutdown);

    info!("Server is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Cleaning up...");
    shutdown.shutdown().await;

    info!(
        "server shut down ({} clients connected, authenticated: {})",
        registry.client_count(),
        is_auth.load(std::sync::atomic::Ordering::SeqCst)
    );

    Ok(())
}
