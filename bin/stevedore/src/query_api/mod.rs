use axum::Router;
use axum::middleware;
use axum::routing::get;

use crate::state::AppState;

mod auth;
mod handlers;

#[derive(Clone)]
struct QueryState {
  app: AppState,
}

fn router(state: QueryState) -> Router {
  let authenticated = Router::new()
    .route("/deployments", get(handlers::get_deployments))
    .route("/status/{name}", get(handlers::get_status))
    .route("/services", get(handlers::get_services))
    .route("/poll", get(handlers::poll))
    .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

  Router::new()
    .route("/healthz", get(handlers::healthz))
    .merge(authenticated)
    .with_state(state)
}

/// Binds the read-only query API to a Unix domain socket (§4.8),
/// creating the parent directory and widening permissions to 0666 so
/// co-located services running as other users can connect.
#[cfg(unix)]
pub async fn run(app: AppState) -> anyhow::Result<()> {
  use anyhow::Context;

  let socket_path = &app.config.query_socket_path;
  if let Some(parent) = socket_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  // A stale socket file from an unclean shutdown must be removed before
  // binding, or the bind itself fails with "address in use".
  if socket_path.exists() {
    std::fs::remove_file(socket_path)
      .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
  }

  let listener = tokio::net::UnixListener::bind(socket_path)
    .with_context(|| format!("failed to bind query socket {}", socket_path.display()))?;

  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o666))
    .with_context(|| format!("failed to chmod {}", socket_path.display()))?;

  tracing::info!("query API listening on {}", socket_path.display());

  let state = QueryState { app: app.clone() };
  let result = axum::serve(listener, router(state).into_make_service())
    .with_graceful_shutdown(async move {
      app.shutdown.cancelled().await;
    })
    .await
    .context("query API server crashed");

  let _ = std::fs::remove_file(socket_path);
  result
}

#[cfg(not(unix))]
pub async fn run(_app: AppState) -> anyhow::Result<()> {
  anyhow::bail!("the query socket API requires a Unix-like OS")
}
