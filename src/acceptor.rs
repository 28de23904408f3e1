//! TCP acceptor: binds the configured listen address and spawns one
//! [`engine`] task per accepted connection.

use crate::engine;
use crate::registry::ServerRegistry;
use crate::router::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run(
    listen: SocketAddr,
    router: Arc<Router>,
    registry: Arc<ServerRegistry>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listen, "listening for IRC clients");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!(peer = %peer, "accepted connection");
                let router = router.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    engine::run(socket, router, registry).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed, continuing");
            }
        }
    }
}
