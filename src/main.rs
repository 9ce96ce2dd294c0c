use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use env_logger::Env;
use log::{debug, info, warn};
use tokio::net::TcpListener;

use crate::config::{get_config, VERSION_PROTOCOL_NAME, VERSION_PROXY_NAME};
use crate::router::Router;

mod backend;
mod chat;
mod client_packets;
mod config;
mod frontend;
mod limiter;
mod packet;
mod proxy_protocol;
mod reader;
mod realip;
mod router;
mod server_packets;
mod status_cache;
mod tunnel;
mod utils;
mod writer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let start_time = Instant::now();
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let config = get_config();
    info!(
        "pistonproxy version {}, protocol version {}",
        VERSION_PROXY_NAME, VERSION_PROTOCOL_NAME
    );

    let (router, _workers) = Router::build(&config);
    let router = Arc::new(router);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.settings.listen)
        .parse()
        .context("invalid listen port in config.yaml")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;

    let conn_counter = Arc::new(AtomicU32::new(0));

    info!("listening on {addr}");
    debug!(
        "server is ready in {:.2} ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("[{peer}] accepted new connection");

                if conn_counter.load(Ordering::Relaxed) >= config.settings.clients_limit {
                    debug!("[{peer}] clients_limit exceeded, closing");
                    drop(stream);
                    continue;
                }

                conn_counter.fetch_add(1, Ordering::SeqCst);
                let counter = conn_counter.clone();
                let router = router.clone();
                let config = config.clone();

                tokio::spawn(async move {
                    frontend::handle_connection(stream, peer, router, config).await;
                    debug!("[{peer}] socket closed");
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    Ok(())
}
