// src/server/mod.rs

//! The proxy frontend: a TCP accept loop that admits client sessions
//! against whatever `Router` implementation the embedding binary provides.

use crate::config::ProxyConfig;
use crate::core::router::Router;
use crate::core::session::Session;
use crate::core::stats::ProxyStats;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Binds the configured listen address and serves until shutdown.
pub async fn run(
    config: Arc<ProxyConfig>,
    router: Arc<dyn Router>,
    stats: Arc<ProxyStats>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    serve(listener, config, router, stats, shutdown).await;
    Ok(())
}

/// The accept loop. Admission decisions (client cap, router online) belong
/// to the session itself and run off this task, so one slow or rejected
/// client never stalls the next accept.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    router: Arc<dyn Router>,
    stats: Arc<ProxyStats>,
    shutdown: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => info!("proxy listening on {addr}"),
        Err(_) => info!("proxy listening"),
    }
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("listener received shutdown signal");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    debug!("accepted new connection from {addr}");
                    let session =
                        Session::new(socket, addr, config.password.clone(), stats.clone());
                    session.start(router.clone(), &config);
                }
                Err(e) => error!("failed to accept connection: {e}"),
            },
        }
    }
}
