use snapsolve_api::Server;
use snapsolve_core::{ConfigManager, SnapSolveError};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> snapsolve_core::Result<()> {
    let manager = ConfigManager::load()?;
    let config = Arc::new(manager.config().clone());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "snapsolve_api={0},snapsolve_core={0},snapsolve_ai={0},snapsolve_store={0},snapsolve_auth={0},tower_http=info",
                    config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host: IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| SnapSolveError::Config(format!("invalid server.host: {e}")))?;
    let addr = SocketAddr::from((host, config.server.port));

    let server = Server::new(addr, config)?;
    server.run().await
}
