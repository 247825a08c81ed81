use clap::Subcommand;
use config::Config;
use store::Store;

use crate::layout::Layout;

#[derive(Subcommand, Debug, Clone)]
pub enum DeployCommand {
  /// Runs the check -> sync -> deploy pipeline inline, bypassing the poll interval.
  Sync { name: String },
  /// Sets the deployment's desired state to `up` (the reconcile/poll loops take it from there).
  Up { name: String },
  /// Stops the deployment's containers and sets its desired state to `down`.
  Down { name: String },
}

pub async fn handle(
  config: &Config,
  store: &Store,
  layout: &Layout<'_>,
  command: DeployCommand,
) -> anyhow::Result<String> {
  match command {
    DeployCommand::Sync { name } => sync(config, store, layout, &name).await,
    DeployCommand::Up { name } => up(store, &name).await,
    DeployCommand::Down { name } => down(config, store, layout, &name).await,
  }
}

/// Runs check -> sync -> deploy inline, outside the daemon's active-slot
/// lock and event bus (a one-shot CLI invocation has neither). Mirrors
/// `scheduler::poll_worker::run`'s pipeline but talks to the store and
/// Compose directly, since the CLI never holds an `AppState`.
async fn sync(
  config: &Config,
  store: &Store,
  layout: &Layout<'_>,
  name: &str,
) -> anyhow::Result<String> {
  let repo = store
    .get_repository(name)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{name}'"))?;

  let checkout_dir = layout.checkout_dir(name)?;
  let ssh_key = layout.ssh_private_key_path(name)?;

  let check =
    git::check_remote(&checkout_dir, &repo.branch, &ssh_key, config.sync_timeout).await?;
  if !check.current_commit.is_empty() {
    store.record_sync_success(name, &check.current_commit).await?;
  }
  if !check.has_changes {
    return Ok(format!("'{name}' is already up to date"));
  }

  let synced =
    git::sync_clean(&checkout_dir, &repo.url, &repo.branch, &ssh_key, true, config.sync_timeout)
      .await?;
  store.record_sync_success(name, &synced.commit).await?;

  if stevedore_types::is_self_deployment(name) {
    return Ok(format!(
      "Synced self-deployment to {}; run 'self-update' to apply it",
      git::short_commit(&synced.commit)
    ));
  }

  let data_dir = layout.data_dir(name)?;
  let logs_dir = layout.logs_dir(name)?;
  let shared_dir = layout.shared_dir();
  let parameters = store.list_parameters(name).await?;

  match compose::deploy(
    name,
    &checkout_dir,
    &data_dir,
    &logs_dir,
    &shared_dir,
    &parameters,
    config.deploy_timeout,
  )
  .await
  {
    Ok(outcome) => {
      store.record_deploy(name).await?;
      Ok(format!(
        "Synced and deployed '{name}' at {} ({} services)",
        git::short_commit(&synced.commit),
        outcome.services.len()
      ))
    }
    Err(e) => {
      store.record_error(name, &e.to_string()).await?;
      Err(e.into())
    }
  }
}

async fn up(store: &Store, name: &str) -> anyhow::Result<String> {
  store
    .get_repository(name)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{name}'"))?;
  store
    .set_desired_state(name, stevedore_types::DesiredState::Up)
    .await?;
  Ok(format!("'{name}' desired state set to up"))
}

async fn down(
  config: &Config,
  store: &Store,
  layout: &Layout<'_>,
  name: &str,
) -> anyhow::Result<String> {
  store
    .get_repository(name)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{name}'"))?;
  let checkout_dir = layout.checkout_dir(name)?;
  compose::stop(name, &checkout_dir, config.deploy_timeout).await?;
  store
    .set_desired_state(name, stevedore_types::DesiredState::Down)
    .await?;
  Ok(format!("'{name}' stopped, desired state set to down"))
}

pub async fn status(store: &Store, name: Option<&str>) -> anyhow::Result<String> {
  let names = match name {
    Some(name) => vec![name.to_string()],
    None => store.list_deployments().await?,
  };
  if names.is_empty() {
    return Ok("No deployments registered.".to_string());
  }

  let mut table = comfy_table::Table::new();
  table.set_header(vec!["DEPLOYMENT", "LAST COMMIT", "LAST SYNC", "LAST DEPLOY", "LAST ERROR"]);
  for name in names {
    let sync = store.get_sync_status(&name).await?;
    table.add_row(vec![
      sync.deployment,
      sync.last_commit.map(|c| git::short_commit(&c).to_string()).unwrap_or_default(),
      sync.last_sync_at.map(format_timestamp).unwrap_or_default(),
      sync.last_deploy_at.map(format_timestamp).unwrap_or_default(),
      sync.last_error.unwrap_or_default(),
    ]);
  }
  Ok(table.to_string())
}

/// Renders a unix-seconds timestamp for human-facing CLI tables; the
/// HTTP APIs keep raw epoch ints for their JSON clients to format.
fn format_timestamp(unix_seconds: i64) -> String {
  chrono::DateTime::from_timestamp(unix_seconds, 0)
    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| unix_seconds.to_string())
}

pub async fn check(
  config: &Config,
  store: &Store,
  layout: &Layout<'_>,
  name: &str,
) -> anyhow::Result<String> {
  let repo = store
    .get_repository(name)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{name}'"))?;
  let checkout_dir = layout.checkout_dir(name)?;
  let ssh_key = layout.ssh_private_key_path(name)?;
  let check = git::check_remote(&checkout_dir, &repo.branch, &ssh_key, config.sync_timeout).await?;

  Ok(if check.has_changes {
    format!(
      "'{name}'\nStatus:     Updates available\nCurrent:    {}\nRemote:     {}",
      git::short_commit(&check.current_commit),
      git::short_commit(&check.remote_commit),
    )
  } else {
    format!(
      "'{name}'\nStatus:     Up to date\nCurrent:    {}",
      git::short_commit(&check.current_commit)
    )
  })
}
