use compose::{ContainerState, ContainerStatus};
use stevedore_types::{Repository, is_self_deployment};

use super::{layout, publish_deployment_updated, publish_status_changed};
use crate::state::AppState;

/// §4.5's reconcile predicate: no containers, or any container stopped,
/// or no container running/restarting. Deliberately independent of
/// health-check status -- a Running-but-Unhealthy container is not, by
/// itself, a reason to redeploy.
fn needs_reconcile(containers: &[ContainerStatus]) -> bool {
  if containers.is_empty() {
    return true;
  }
  let any_stopped = containers
    .iter()
    .any(|c| matches!(c.state, ContainerState::Exited | ContainerState::Dead));
  if any_stopped {
    return true;
  }
  !containers
    .iter()
    .any(|c| matches!(c.state, ContainerState::Running | ContainerState::Restarting))
}

/// Health-driven reconciliation for one deployment (§4.5): inspects the
/// running containers and redeploys if they need reconciling. Unlike
/// the poll pipeline this never touches git -- it only restarts what is
/// already checked out.
pub async fn run(state: &AppState, repo: &Repository) {
  let deployment = repo.deployment.as_str();
  if is_self_deployment(deployment) {
    return;
  }

  let status = match state.store.get_sync_status(deployment).await {
    Ok(status) => status,
    Err(e) => {
      tracing::error!("failed to read sync status for '{deployment}' | {e:#}");
      return;
    }
  };
  // Nothing has ever been deployed yet; that's the poll pipeline's job.
  if status.last_deploy_at.is_none() {
    return;
  }

  let layout = layout(state);
  let inspected = match compose::inspect_deployment(deployment).await {
    Ok(inspected) => inspected,
    Err(e) => {
      tracing::warn!("inspect failed for '{deployment}' | {e:#}");
      return;
    }
  };

  if !needs_reconcile(&inspected.containers) {
    return;
  }

  tracing::info!(
    "reconcile: '{deployment}' needs reconcile ({}), redeploying",
    inspected.message
  );
  publish_status_changed(state, deployment, inspected.healthy);

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
    Ok(_) => {
      if let Err(e) = state.store.record_deploy(deployment).await {
        tracing::error!("failed to record deploy for '{deployment}' | {e:#}");
      }
      publish_deployment_updated(state, deployment);
    }
    Err(e) => {
      tracing::warn!("reconcile redeploy failed for '{deployment}' | {e:#}");
      if let Err(e) = state.store.record_error(deployment, &e.to_string()).await {
        tracing::error!("failed to record error for '{deployment}' | {e:#}");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn container(state: ContainerState) -> ContainerStatus {
    ContainerStatus {
      container_id: "id".to_string(),
      container_name: "name".to_string(),
      service: "svc".to_string(),
      state,
      health: compose::ContainerHealth::None,
    }
  }

  #[test]
  fn self_deployment_is_skipped_by_construction() {
    assert!(is_self_deployment(stevedore_types::SELF_DEPLOYMENT));
  }

  #[test]
  fn no_containers_needs_reconcile() {
    assert!(needs_reconcile(&[]));
  }

  #[test]
  fn any_stopped_container_needs_reconcile() {
    let containers = vec![container(ContainerState::Running), container(ContainerState::Exited)];
    assert!(needs_reconcile(&containers));
  }

  #[test]
  fn running_needs_no_reconcile() {
    let containers = vec![container(ContainerState::Running)];
    assert!(!needs_reconcile(&containers));
  }

  #[test]
  fn restarting_needs_no_reconcile() {
    let containers = vec![container(ContainerState::Restarting)];
    assert!(!needs_reconcile(&containers));
  }

  #[test]
  fn unhealthy_but_running_needs_no_reconcile() {
    let mut c = container(ContainerState::Running);
    c.health = compose::ContainerHealth::Unhealthy;
    assert!(!needs_reconcile(&[c]));
  }
}
