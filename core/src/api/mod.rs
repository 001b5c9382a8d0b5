// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Coordinator REST API.
//!
//! One axum router exposes job CRUD with state-machine enforcement,
//! cancel/retry, worker heartbeat ingest, the error log, dashboard
//! aggregates, and a health probe. Rate limiting (tower-governor,
//! keyed by peer IP) caps the whole API at 200 requests/minute and
//! `PUT /api/put/*` at 60, since workers hammer it.

pub mod error;
pub mod middleware;
pub mod models;
pub mod rest;

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::Coordinator;

pub use error::{ApiError, ApiResult};
pub use middleware::{CorsConfig, RateLimits};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Coordinator context: store, assignment policy, watchdog
    pub coordinator: Arc<Coordinator>,
    /// Directory of project config files for `/api/submit`
    pub projects_dir: PathBuf,
}

/// Build the application router.
///
/// Pass `None` for `limits` to disable rate limiting (tests do).
pub fn router(state: AppState, limits: Option<RateLimits>) -> Router {
    rest::routes(limits)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsConfig::default().to_layer())
}

/// Bind and serve the API until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    limits: Option<RateLimits>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state, limits);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("coordinator listening on {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
