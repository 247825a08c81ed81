use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use response::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

use super::QueryState;

pub async fn healthz() -> &'static str {
  "ok"
}

pub async fn get_deployments(
  State(state): State<QueryState>,
) -> CoreResult<Json<Vec<String>>> {
  Ok(Json(state.app.store.list_deployments().await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
  deployment: String,
  enabled: bool,
  desired_state: &'static str,
  last_commit: Option<String>,
  last_sync_at: Option<i64>,
  last_deploy_at: Option<i64>,
  last_error: Option<String>,
}

pub async fn get_status(
  State(state): State<QueryState>,
  Path(name): Path<String>,
) -> CoreResult<Json<StatusView>> {
  let repo = state
    .app
    .store
    .get_repository(&name)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("deployment '{name}' not found")))?;
  let sync = state.app.store.get_sync_status(&name).await?;
  Ok(Json(StatusView {
    deployment: repo.deployment,
    enabled: repo.enabled,
    desired_state: repo.desired_state.as_str(),
    last_commit: sync.last_commit,
    last_sync_at: sync.last_sync_at,
    last_deploy_at: sync.last_deploy_at,
    last_error: sync.last_error,
  }))
}

#[derive(Deserialize)]
pub struct ServicesQuery {
  #[serde(default)]
  ingress: bool,
}

pub async fn get_services(
  State(state): State<QueryState>,
  Query(query): Query<ServicesQuery>,
) -> CoreResult<Json<Vec<compose::ServiceView>>> {
  let names = state.app.store.list_deployments().await?;
  let mut parameters = HashMap::new();
  for name in names {
    let params = state.app.store.list_parameters(&name).await?;
    parameters.insert(
      name,
      params.into_iter().map(|p| (p.name, p.value)).collect(),
    );
  }

  let mut services = compose::list_services(&parameters).await.map_err(CoreError::Internal)?;
  if query.ingress {
    services.retain(|s| s.ingress.as_ref().is_some_and(|i| i.enabled));
  }
  Ok(Json(services))
}

#[derive(Deserialize)]
pub struct PollQuery {
  since: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
  changed: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  timestamp: Option<i64>,
}

/// Long-polls for any event after `since` (default: now), up to
/// `LongPollTimeout`. Returns as soon as a change lands; exits silently
/// (the connection simply drops) if the client disconnects first.
pub async fn poll(
  State(state): State<QueryState>,
  Query(query): Query<PollQuery>,
) -> Json<PollResponse> {
  let since = query.since.unwrap_or_else(stevedore_types::unix_timestamp);

  if state.app.events.last_change_at() > since {
    return Json(PollResponse { changed: true, timestamp: Some(state.app.events.last_change_at()) });
  }

  let mut rx = state.app.events.subscribe();
  let wait = async {
    loop {
      match rx.recv().await {
        Ok(event) if event.timestamp > since => return Some(event.timestamp),
        Ok(_) => continue,
        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
        Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
      }
    }
  };

  match tokio::time::timeout(state.app.config.long_poll_timeout, wait).await {
    Ok(Some(timestamp)) => Json(PollResponse { changed: true, timestamp: Some(timestamp) }),
    Ok(None) | Err(_) => Json(PollResponse { changed: false, timestamp: None }),
  }
}
