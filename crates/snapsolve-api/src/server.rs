use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::info;

use snapsolve_core::{Result, SnapSolveConfig, SnapSolveError};

use crate::{create_router, AppState};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub fn new(addr: SocketAddr, config: Arc<SnapSolveConfig>) -> Result<Self> {
        crate::metrics::register_metrics();
        let state = AppState::new(config)?;
        Ok(Self { state, addr })
    }

    pub async fn run(self) -> Result<()> {
        let router = create_router(self.state);

        info!("Starting SnapSolve API server on {}", self.addr);

        // Bind with tuned socket options for better keep-alive behavior
        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }
            .map_err(SnapSolveError::Io)?;

            // Reuse addr/port to improve rebind under restarts
            let _ = socket.set_reuseaddr(true);
            #[cfg(unix)]
            let _ = socket.set_reuseport(true);

            let _ = socket.set_keepalive(true);

            socket.bind(self.addr).map_err(SnapSolveError::Io)?;
            socket.listen(1024)?
        };

        info!("Server listening on http://{}", self.addr);
        info!("API documentation:");
        info!("  POST   /api/v1/solve - Solve an uploaded math problem");
        info!("  GET    /api/v1/history?limit=<n> - List solved problems");
        info!("  DELETE /api/v1/history/{{problem_id}} - Delete one problem");
        info!("  GET    /health - Health check");
        info!("  GET    /metrics - Prometheus metrics");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(SnapSolveError::Io)?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
