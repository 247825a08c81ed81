use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tower::Service;

use crate::state::AppState;

mod admin_key;
mod auth;
mod handlers;
mod idle_io;

use idle_io::IdleTimeoutIo;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub use admin_key::resolve_or_generate as resolve_admin_key;

/// Result of one CLI command run through the injected executor (§4.7).
pub struct ExecOutcome {
  pub output: String,
  pub exit_code: i32,
  pub error: Option<String>,
}

/// Runs a CLI command inside the daemon process on behalf of `/api/exec`.
/// Supplied by `main` so this module never has to know about `cli`'s
/// internals.
pub type Executor = Arc<
  dyn Fn(Vec<String>) -> Pin<Box<dyn Future<Output = ExecOutcome> + Send>>
    + Send
    + Sync,
>;

#[derive(Clone)]
struct AdminState {
  app: AppState,
  admin_key: Arc<str>,
  executor: Executor,
}

fn router(state: AdminState) -> Router {
  let authenticated = Router::new()
    .route("/api/status", get(handlers::get_status_all))
    .route("/api/status/{name}", get(handlers::get_status_one))
    .route("/api/sync/{name}", post(handlers::post_sync))
    .route("/api/deploy/{name}", post(handlers::post_deploy))
    .route("/api/check/{name}", post(handlers::post_check))
    .route("/api/exec", post(handlers::post_exec))
    .route_layer(middleware::from_fn_with_state(
      state.clone(),
      auth::require_auth_and_version,
    ));

  Router::new()
    .route("/healthz", get(handlers::healthz))
    .merge(authenticated)
    .with_state(state)
}

/// Binds and serves the admin HTTP API on `config.admin_bind_address`
/// until `state.shutdown` is cancelled. §4.7's three timeouts are each
/// enforced at the layer that can actually see them: a header-read
/// timeout on the connection builder (10s), a `tower_http` timeout
/// layer around the whole response (60s), and a hand-rolled idle guard
/// around the raw socket that disconnects a connection sitting between
/// requests too long (120s).
pub async fn run(app: AppState, executor: Executor) -> anyhow::Result<()> {
  let admin_key = resolve_admin_key(&app.config.admin_key_path())
    .context("failed to resolve admin API key")?;

  let state = AdminState { app: app.clone(), admin_key: admin_key.into(), executor };

  let addr = bind_address(&state.app.config.admin_bind_address);
  let listener = tokio::net::TcpListener::bind(&addr)
    .await
    .with_context(|| format!("failed to bind admin API on {addr}"))?;
  tracing::info!("admin API listening on {addr}");

  let app_router = router(state.clone()).layer(tower_http::timeout::TimeoutLayer::new(WRITE_TIMEOUT));
  let shutdown = state.app.shutdown.clone();

  loop {
    let (stream, peer) = tokio::select! {
      accepted = listener.accept() => match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
          tracing::warn!("admin API accept failed | {e:#}");
          continue;
        }
      },
      _ = shutdown.cancelled() => break,
    };

    let tower_service = app_router.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
      let io = TokioIo::new(IdleTimeoutIo::new(stream, IDLE_TIMEOUT));
      let service = hyper::service::service_fn(move |request| {
        let mut tower_service = tower_service.clone();
        async move { tower_service.call(request).await }
      });

      let mut builder = auto::Builder::new(TokioExecutor::new());
      builder.http1().header_read_timeout(READ_TIMEOUT);

      let connection = builder.serve_connection_with_upgrades(io, service);
      tokio::pin!(connection);

      tokio::select! {
        result = connection.as_mut() => {
          if let Err(e) = result {
            tracing::debug!("admin API connection from {peer} closed | {e:#}");
          }
        }
        _ = shutdown.cancelled() => {
          connection.as_mut().graceful_shutdown();
          let _ = connection.await;
        }
      }
    });
  }

  Ok(())
}

/// `:42107`-style addresses (port only, all interfaces) are the common
/// case; anything else is passed through as a host:port pair.
fn bind_address(configured: &str) -> String {
  if let Some(port) = configured.strip_prefix(':') {
    format!("0.0.0.0:{port}")
  } else {
    configured.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bind_address_expands_port_only_form() {
    assert_eq!(bind_address(":42107"), "0.0.0.0:42107");
  }

  #[test]
  fn bind_address_passes_through_explicit_host() {
    assert_eq!(bind_address("127.0.0.1:9000"), "127.0.0.1:9000");
  }
}
