use std::sync::Arc;

use stevedore_types::{Event, EventKind, Repository, is_self_deployment};

use crate::layout::Layout;
use crate::state::AppState;

pub(crate) mod poll_worker;
mod reconcile_worker;

/// Spawns the poll loop and the reconcile loop (§4.5), each on its own
/// background task tied to `state.shutdown`. Returns immediately; the
/// loops run until the token is cancelled.
pub fn spawn_loops(state: AppState) {
  spawn_poll_loop(state.clone());
  spawn_reconcile_loop(state);
}

fn spawn_poll_loop(state: AppState) {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(state.config.min_poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = state.shutdown.cancelled() => {
          tracing::info!("poll loop shutting down");
          return;
        }
        _ = ticker.tick() => {
          run_poll_tick(&state).await;
        }
      }
    }
  });
}

fn spawn_reconcile_loop(state: AppState) {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(state.config.reconcile_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = state.shutdown.cancelled() => {
          tracing::info!("reconcile loop shutting down");
          return;
        }
        _ = ticker.tick() => {
          run_reconcile_tick(&state).await;
        }
      }
    }
  });
}

async fn run_poll_tick(state: &AppState) {
  let repos = match state.store.list_active_repositories().await {
    Ok(repos) => repos,
    Err(e) => {
      tracing::error!("failed to list active repositories | {e:#}");
      return;
    }
  };

  for repo in repos {
    spawn_poll_worker(state.clone(), repo);
  }
}

/// Spawns a single deployment's sync-then-deploy pipeline, guarded by
/// the active-slot lock so a slow sync never overlaps with a reconcile
/// pass or a concurrently-triggered admin sync for the same deployment.
pub fn spawn_poll_worker(state: AppState, repo: Repository) {
  tokio::spawn(async move {
    let Some(guard) = state.active.try_acquire(&repo.deployment).await
    else {
      tracing::debug!(
        "skipping poll for '{}', already active",
        repo.deployment
      );
      return;
    };

    // Re-check enabled/desired-state right before doing any work: the
    // row may have been disabled between the listing query and now.
    let current = match state.store.get_repository(&repo.deployment).await {
      Ok(Some(current)) => current,
      Ok(None) => return,
      Err(e) => {
        tracing::error!(
          "failed to re-read repository '{}' | {e:#}",
          repo.deployment
        );
        return;
      }
    };
    if !current.enabled || current.desired_state != stevedore_types::DesiredState::Up {
      return;
    }

    // §4.5 poll-tick algorithm: skip if now < last_sync_at + poll_interval_seconds.
    match state.store.get_sync_status(&current.deployment).await {
      Ok(sync) => {
        if let Some(last_sync_at) = sync.last_sync_at {
          let due_at = last_sync_at + current.poll_interval_seconds;
          if stevedore_types::unix_timestamp() < due_at {
            return;
          }
        }
      }
      Err(e) => {
        tracing::error!(
          "failed to read sync status for '{}' | {e:#}",
          current.deployment
        );
        return;
      }
    }

    poll_worker::run(&state, &current).await;
    drop(guard);
  });
}

async fn run_reconcile_tick(state: &AppState) {
  let repos = match state.store.list_active_repositories().await {
    Ok(repos) => repos,
    Err(e) => {
      tracing::error!("failed to list active repositories (reconcile) | {e:#}");
      return;
    }
  };

  for repo in repos {
    let state = state.clone();
    tokio::spawn(async move {
      let Some(guard) = state.active.try_acquire(&repo.deployment).await
      else {
        return;
      };
      reconcile_worker::run(&state, &repo).await;
      drop(guard);
    });
  }
}

fn publish_deployment_updated(state: &AppState, deployment: &str) {
  state.events.publish(Event::new(
    EventKind::DeploymentUpdated,
    deployment.to_string(),
    serde_json::json!({}),
  ));
}

fn publish_status_changed(state: &AppState, deployment: &str, healthy: bool) {
  state.events.publish(Event::new(
    EventKind::DeploymentStatusChanged,
    deployment.to_string(),
    serde_json::json!({ "healthy": healthy }),
  ));
}

fn layout(state: &AppState) -> Layout<'_> {
  Layout::new(state.config)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn self_deployment_is_excluded_from_auto_deploy() {
    assert!(is_self_deployment("stevedore"));
  }
}
