use stevedore_types::is_self_deployment;

use super::{layout, publish_deployment_updated};
use crate::state::AppState;

/// The check -> sync -> deploy pipeline for one deployment (§4.5). Callers
/// are responsible for holding the active-slot guard for the duration.
pub async fn run(state: &AppState, repo: &stevedore_types::Repository) {
  let layout = layout(state);
  let deployment = repo.deployment.as_str();

  let checkout_dir = match layout.checkout_dir(deployment) {
    Ok(dir) => dir,
    Err(e) => {
      tracing::error!("bad deployment name '{deployment}' | {e:#}");
      return;
    }
  };
  let ssh_key = match layout.ssh_private_key_path(deployment) {
    Ok(path) => path,
    Err(e) => {
      tracing::error!("bad deployment name '{deployment}' | {e:#}");
      return;
    }
  };

  let check = match git::check_remote(
    &checkout_dir,
    &repo.branch,
    &ssh_key,
    state.config.sync_timeout,
  )
  .await
  {
    Ok(check) => check,
    Err(e) => {
      tracing::warn!("check-remote failed for '{deployment}' | {e:#}");
      record_error(state, deployment, &e).await;
      return;
    }
  };

  // Even when nothing changed, the tick still counts as a successful
  // sync attempt: a known-good commit clears any stale error state.
  if !check.current_commit.is_empty() {
    if let Err(e) =
      state.store.record_sync_success(deployment, &check.current_commit).await
    {
      tracing::error!("failed to record sync status for '{deployment}' | {e:#}");
    }
  }

  if !check.has_changes {
    return;
  }

  let sync = match git::sync_clean(
    &checkout_dir,
    &repo.url,
    &repo.branch,
    &ssh_key,
    true,
    state.config.sync_timeout,
  )
  .await
  {
    Ok(sync) => sync,
    Err(e) => {
      tracing::warn!("sync-clean failed for '{deployment}' | {e:#}");
      record_error(state, deployment, &e).await;
      return;
    }
  };

  if let Err(e) = state.store.record_sync_success(deployment, &sync.commit).await {
    tracing::error!("failed to record sync status for '{deployment}' | {e:#}");
  }

  if is_self_deployment(deployment) {
    tracing::info!(
      "self-deployment synced to {}; self-update handles its own deploy",
      git::short_commit(&sync.commit)
    );
    return;
  }

  deploy(state, &layout, deployment).await;
}

async fn deploy(state: &AppState, layout: &crate::layout::Layout<'_>, deployment: &str) {
  let (checkout_dir, data_dir, logs_dir) = match (
    layout.checkout_dir(deployment),
    layout.data_dir(deployment),
    layout.logs_dir(deployment),
  ) {
    (Ok(a), Ok(b), Ok(c)) => (a, b, c),
    _ => return,
  };
  let shared_dir = layout.shared_dir();

  let parameters = match state.store.list_parameters(deployment).await {
    Ok(parameters) => parameters,
    Err(e) => {
      tracing::error!("failed to load parameters for '{deployment}' | {e:#}");
      return;
    }
  };

  match compose::deploy(
    deployment,
    &checkout_dir,
    &data_dir,
    &logs_dir,
    &shared_dir,
    &parameters,
    state.config.deploy_timeout,
  )
  .await
  {
    Ok(outcome) => {
      tracing::info!(
        "deployed '{deployment}' ({} services)",
        outcome.services.len()
      );
      if let Err(e) = state.store.record_deploy(deployment).await {
        tracing::error!("failed to record deploy for '{deployment}' | {e:#}");
      }
      publish_deployment_updated(state, deployment);
    }
    Err(e) => {
      tracing::warn!("deploy failed for '{deployment}' | {e:#}");
      record_error(state, deployment, &e).await;
    }
  }
}

async fn record_error(state: &AppState, deployment: &str, error: &impl std::fmt::Display) {
  if let Err(e) = state.store.record_error(deployment, &error.to_string()).await {
    tracing::error!("failed to record error for '{deployment}' | {e:#}");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn self_deployment_short_circuits_before_compose() {
    assert!(is_self_deployment(stevedore_types::SELF_DEPLOYMENT));
  }
}
