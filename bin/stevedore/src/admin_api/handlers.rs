use axum::Json;
use axum::extract::{Path, State};
use response::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AdminState;
use crate::layout::Layout;
use crate::scheduler::poll_worker;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthView {
  status: &'static str,
  version: &'static str,
  build: String,
}

/// Unauthenticated so a CLI `doctor` run can compare versions before it
/// has an admin key available.
pub async fn healthz(State(state): State<AdminState>) -> Json<HealthView> {
  Json(HealthView {
    status: "ok",
    version: state.app.config.version,
    build: state.app.config.build.clone(),
  })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
  deployment: String,
  url: String,
  branch: String,
  enabled: bool,
  desired_state: &'static str,
  last_commit: Option<String>,
  last_sync_at: Option<i64>,
  last_deploy_at: Option<i64>,
  last_error: Option<String>,
  last_error_at: Option<i64>,
}

async fn status_view(
  state: &AdminState,
  deployment: &str,
) -> CoreResult<StatusView> {
  let repo = state
    .app
    .store
    .get_repository(deployment)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("deployment '{deployment}' not found")))?;
  let sync = state.app.store.get_sync_status(deployment).await?;
  Ok(StatusView {
    deployment: repo.deployment,
    url: repo.url,
    branch: repo.branch,
    enabled: repo.enabled,
    desired_state: repo.desired_state.as_str(),
    last_commit: sync.last_commit,
    last_sync_at: sync.last_sync_at,
    last_deploy_at: sync.last_deploy_at,
    last_error: sync.last_error,
    last_error_at: sync.last_error_at,
  })
}

pub async fn get_status_all(
  State(state): State<AdminState>,
) -> CoreResult<Json<Vec<StatusView>>> {
  let names = state.app.store.list_deployments().await?;
  let mut views = Vec::with_capacity(names.len());
  for name in names {
    if let Ok(view) = status_view(&state, &name).await {
      views.push(view);
    }
  }
  Ok(Json(views))
}

pub async fn get_status_one(
  State(state): State<AdminState>,
  Path(name): Path<String>,
) -> CoreResult<Json<StatusView>> {
  Ok(Json(status_view(&state, &name).await?))
}

/// Runs the check -> sync -> deploy pipeline for `name` inline, behind
/// the same active-slot lock the scheduler uses, and returns the
/// resulting status once the pipeline completes.
pub async fn post_sync(
  State(state): State<AdminState>,
  Path(name): Path<String>,
) -> CoreResult<Json<StatusView>> {
  let repo = state
    .app
    .store
    .get_repository(&name)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("deployment '{name}' not found")))?;

  let guard = state
    .app
    .active
    .try_acquire(&name)
    .await
    .ok_or_else(|| CoreError::Busy(format!("deployment '{name}' is already active")))?;

  poll_worker::run(&state.app, &repo).await;
  drop(guard);

  Ok(Json(status_view(&state, &name).await?))
}

/// Forces a Compose `up` for `name` with the currently-stored parameters,
/// independent of whether a new commit is available.
pub async fn post_deploy(
  State(state): State<AdminState>,
  Path(name): Path<String>,
) -> CoreResult<Json<StatusView>> {
  state
    .app
    .store
    .get_repository(&name)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("deployment '{name}' not found")))?;

  let guard = state
    .app
    .active
    .try_acquire(&name)
    .await
    .ok_or_else(|| CoreError::Busy(format!("deployment '{name}' is already active")))?;

  let layout = Layout::new(state.app.config);
  let (checkout_dir, data_dir, logs_dir) = (
    layout.checkout_dir(&name)?,
    layout.data_dir(&name)?,
    layout.logs_dir(&name)?,
  );
  let shared_dir = layout.shared_dir();
  let parameters = state.app.store.list_parameters(&name).await?;

  let result = compose::deploy(
    &name,
    &checkout_dir,
    &data_dir,
    &logs_dir,
    &shared_dir,
    &parameters,
    state.app.config.deploy_timeout,
  )
  .await;
  drop(guard);

  match result {
    Ok(_) => {
      state.app.store.record_deploy(&name).await?;
      state.app.events.publish(stevedore_types::Event::new(
        stevedore_types::EventKind::DeploymentUpdated,
        name.clone(),
        json!({}),
      ));
    }
    Err(e) => {
      state.app.store.record_error(&name, &e.to_string()).await?;
      return Err(CoreError::Internal(anyhow::anyhow!(e)));
    }
  }

  Ok(Json(status_view(&state, &name).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckView {
  deployment: String,
  branch: String,
  has_changes: bool,
  current_commit: String,
  remote_commit: String,
}

/// Fetch-only update check; never touches the working tree, so it does
/// not need the active-slot lock.
pub async fn post_check(
  State(state): State<AdminState>,
  Path(name): Path<String>,
) -> CoreResult<Json<CheckView>> {
  let repo = state
    .app
    .store
    .get_repository(&name)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("deployment '{name}' not found")))?;

  let layout = Layout::new(state.app.config);
  let checkout_dir = layout.checkout_dir(&name)?;
  let ssh_key = layout.ssh_private_key_path(&name)?;

  let check = git::check_remote(
    &checkout_dir,
    &repo.branch,
    &ssh_key,
    state.app.config.sync_timeout,
  )
  .await
  .map_err(CoreError::Internal)?;

  Ok(Json(CheckView {
    deployment: name,
    branch: check.branch,
    has_changes: check.has_changes,
    current_commit: check.current_commit,
    remote_commit: check.remote_commit,
  }))
}

#[derive(Deserialize)]
pub struct ExecRequest {
  pub args: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
  pub output: String,
  pub exit_code: i32,
  pub error: Option<String>,
}

/// Runs a CLI command inside the daemon through the injected executor.
/// Always answers 200; the inner exit code carries failure.
pub async fn post_exec(
  State(state): State<AdminState>,
  Json(request): Json<ExecRequest>,
) -> Json<ExecResponse> {
  let outcome = (state.executor)(request.args).await;
  Json(ExecResponse {
    output: outcome.output,
    exit_code: outcome.exit_code,
    error: outcome.error,
  })
}
