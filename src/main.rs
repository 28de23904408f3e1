use robustirc_bridge::config::Config;
use robustirc_bridge::registry::ServerRegistry;
use robustirc_bridge::router::Router;
use robustirc_bridge::acceptor;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "robustirc-bridge starting");

    let config = Config::parse().unwrap_or_else(|e| {
        eprintln!("FATAL: invalid configuration: {e}");
        std::process::exit(1);
    });

    info!(servers = ?config.servers, listen = %config.listen, "configuration loaded");

    let registry = Arc::new(ServerRegistry::new(config.servers.clone()));
    let router = Arc::new(Router::new(registry.clone()));

    if let Err(e) = acceptor::run(config.listen, router, registry).await {
        eprintln!("FATAL: acceptor failed: {e}");
        std::process::exit(1);
    }
}
