pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::scheduler::{AuctionDirectory, ResolverScheduler};

use self::routes::{register_handler, status_handler, AppState};

pub fn router<D: AuctionDirectory>(scheduler: Arc<ResolverScheduler<D>>) -> Router {
    Router::new()
        .route("/register-auction", post(register_handler::<D>))
        .route("/status/{address}", get(status_handler::<D>))
        .with_state(AppState { scheduler })
}

/// Start the resolver scheduling service.
///
/// Binds `addr` (port 0 picks a free port) and serves in a background task.
/// Returns the task handle and the bound address.
pub async fn start_server<D: AuctionDirectory>(
    scheduler: Arc<ResolverScheduler<D>>,
    addr: SocketAddr,
) -> Result<(JoinHandle<()>, SocketAddr), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind { addr, source: e })?;
    let bound = listener.local_addr().map_err(|e| ServerError::Bind { addr, source: e })?;

    let app = router(scheduler);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "resolver service stopped");
        }
    });

    info!(%bound, "resolver service listening");
    Ok((handle, bound))
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
