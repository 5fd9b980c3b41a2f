use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_common::{Error, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::SharedState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The HTTP server and its lifecycle.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let addr: SocketAddr = format!("{}:{}", gateway.host, gateway.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid gateway address: {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Gateway(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then close
    /// remote sessions.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        self.state.store.spawn_sweeper(SWEEP_INTERVAL);
        let app = build_router(Arc::clone(&self.state));

        info!(%addr, "gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        info!("gateway stopped, closing remote sessions");
        self.state.bridge.disconnect_all().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!("failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}
