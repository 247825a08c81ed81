use std::path::{Path, PathBuf};

use config::Config;
use serde::Deserialize;
use store::Store;

const DEFAULT_SELF_CONTAINER: &str = "stevedore";
const WORKER_GRACE_SECONDS: u64 = 5;
const WORKER_IMAGE: &str = "docker:cli";

fn runtime_bin() -> String {
  std::env::var("STEVEDORE_RUNTIME_BIN").unwrap_or_else(|_| "docker".to_string())
}

fn applied_commit_path(config: &Config) -> PathBuf {
  config.system_dir().join("self_applied_commit")
}

fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

/// Syncs the self-deployment, then, if its commit has advanced past the
/// last applied one, builds a new image and hands replacement off to a
/// detached sidecar worker (§4.9). Never touches workload containers.
pub async fn run_once(config: &Config, store: &Store) -> anyhow::Result<String> {
  let repo = store
    .get_repository(stevedore_types::SELF_DEPLOYMENT)
    .await?
    .ok_or_else(|| {
      anyhow::anyhow!(
        "self-deployment '{}' is not registered; run 'repo add {} ...' first",
        stevedore_types::SELF_DEPLOYMENT,
        stevedore_types::SELF_DEPLOYMENT
      )
    })?;

  let layout = crate::layout::Layout::new(config);
  let checkout_dir = layout.checkout_dir(stevedore_types::SELF_DEPLOYMENT)?;
  let ssh_key = layout.ssh_private_key_path(stevedore_types::SELF_DEPLOYMENT)?;

  let sync = git::sync_clean(
    &checkout_dir,
    &repo.url,
    &repo.branch,
    &ssh_key,
    true,
    config.sync_timeout,
  )
  .await?;
  store
    .record_sync_success(stevedore_types::SELF_DEPLOYMENT, &sync.commit)
    .await?;

  let marker = applied_commit_path(config);
  let previous = std::fs::read_to_string(&marker).ok().map(|s| s.trim().to_string());

  if previous.as_deref() == Some(sync.commit.as_str()) {
    return Ok(format!(
      "Already running {}; nothing to update",
      git::short_commit(&sync.commit)
    ));
  }
  if previous.is_none() {
    tracing::info!("no recorded applied commit for self-deployment; forcing update");
  }

  let container_name =
    std::env::var("STEVEDORE_SELF_CONTAINER").unwrap_or_else(|_| DEFAULT_SELF_CONTAINER.to_string());
  let running = inspect_running_container(&container_name).await?;

  let backup_tag = format!("{}:backup-{}", running.image_repo, stevedore_types::unix_timestamp());
  tag_image(&running.image, &backup_tag).await?;

  let new_image = format!("{}:latest", running.image_repo);
  build_image(&checkout_dir, &new_image, config.deploy_timeout).await?;

  spawn_replacement_worker(
    stevedore_types::SELF_DEPLOYMENT,
    &container_name,
    &running,
    &new_image,
  )
  .await?;

  if let Some(parent) = marker.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(&marker, &sync.commit)?;

  Ok(format!(
    "Self-update to {} launched; prior image backed up as {backup_tag}; replacement worker running",
    git::short_commit(&sync.commit)
  ))
}

struct RunningContainer {
  image: String,
  image_repo: String,
  mounts: Vec<(String, String)>,
  env: Vec<String>,
  restart_policy: String,
  ports: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct InspectEntry {
  #[serde(rename = "Image")]
  image: String,
  #[serde(rename = "Config")]
  config: InspectConfig,
  #[serde(rename = "HostConfig")]
  host_config: InspectHostConfig,
  #[serde(rename = "Mounts", default)]
  mounts: Vec<InspectMount>,
}

#[derive(Deserialize)]
struct InspectConfig {
  #[serde(rename = "Env", default)]
  env: Vec<String>,
  #[serde(rename = "Image")]
  image_name: String,
}

#[derive(Deserialize)]
struct InspectHostConfig {
  #[serde(rename = "RestartPolicy")]
  restart_policy: InspectRestartPolicy,
  #[serde(rename = "PortBindings", default)]
  port_bindings: std::collections::HashMap<String, Option<Vec<InspectPortBinding>>>,
}

#[derive(Deserialize)]
struct InspectRestartPolicy {
  #[serde(rename = "Name")]
  name: String,
}

#[derive(Deserialize)]
struct InspectPortBinding {
  #[serde(rename = "HostPort")]
  host_port: String,
}

#[derive(Deserialize)]
struct InspectMount {
  #[serde(rename = "Source")]
  source: String,
  #[serde(rename = "Destination")]
  destination: String,
}

async fn inspect_running_container(name: &str) -> anyhow::Result<RunningContainer> {
  let command = format!("{} inspect {}", runtime_bin(), shell_quote(name));
  let output = command::run_shell_command(&command, None).await;
  if !output.success() {
    anyhow::bail!("failed to inspect running container '{name}': {}", output.stderr_tail(20));
  }

  let entries: Vec<InspectEntry> = serde_json::from_str(&output.stdout)?;
  let entry = entries
    .into_iter()
    .next()
    .ok_or_else(|| anyhow::anyhow!("'{name}' did not resolve to a container"))?;

  let image_repo = entry
    .config
    .image_name
    .rsplit_once(':')
    .map(|(repo, _tag)| repo.to_string())
    .unwrap_or(entry.config.image_name.clone());

  let ports = entry
    .host_config
    .port_bindings
    .into_iter()
    .filter_map(|(container_port, bindings)| {
      bindings?.into_iter().next().map(|b| (b.host_port, container_port))
    })
    .collect();

  Ok(RunningContainer {
    image: entry.image,
    image_repo,
    mounts: entry.mounts.into_iter().map(|m| (m.source, m.destination)).collect(),
    env: entry.config.env,
    restart_policy: entry.host_config.restart_policy.name,
    ports,
  })
}

async fn tag_image(image: &str, tag: &str) -> anyhow::Result<()> {
  let command = format!("{} tag {} {}", runtime_bin(), shell_quote(image), shell_quote(tag));
  let output = command::run_shell_command(&command, None).await;
  if !output.success() {
    anyhow::bail!("failed to tag backup image: {}", output.stderr_tail(20));
  }
  Ok(())
}

async fn build_image(
  checkout_dir: &Path,
  tag: &str,
  timeout: std::time::Duration,
) -> anyhow::Result<()> {
  let command = format!(
    "{} build -t {} {}",
    runtime_bin(),
    shell_quote(tag),
    shell_quote(&checkout_dir.to_string_lossy()),
  );
  let log =
    command::run_shell_logged_timeout("self-update-build", checkout_dir, &command, timeout).await;
  if !log.success {
    anyhow::bail!("image build failed: {}", log.stderr);
  }
  Ok(())
}

/// Launches a detached sidecar container, bind-mounted onto the host
/// Docker socket, that waits briefly then stops, removes, and replaces
/// the running self-container. `exec`ing into it is unnecessary here --
/// it is itself a detached container, so it outlives this process by
/// construction rather than needing to be kept alive by it.
async fn spawn_replacement_worker(
  deployment: &str,
  container_name: &str,
  running: &RunningContainer,
  new_image: &str,
) -> anyhow::Result<()> {
  let mut run_flags = vec![
    "-d".to_string(),
    "--name".to_string(),
    shell_quote(container_name),
    "--restart".to_string(),
    shell_quote(&running.restart_policy),
  ];
  for (host_port, container_port) in &running.ports {
    run_flags.push("-p".to_string());
    run_flags.push(shell_quote(&format!("{host_port}:{container_port}")));
  }
  for (source, destination) in &running.mounts {
    run_flags.push("-v".to_string());
    run_flags.push(shell_quote(&format!("{source}:{destination}")));
  }
  for entry in &running.env {
    run_flags.push("-e".to_string());
    run_flags.push(shell_quote(entry));
  }
  run_flags.push(shell_quote(new_image));

  let replacement_script = format!(
    "sleep {WORKER_GRACE_SECONDS} && \
     {bin} stop {name} && {bin} rm {name} && \
     {bin} run {flags}",
    bin = runtime_bin(),
    name = shell_quote(container_name),
    flags = run_flags.join(" "),
  );

  let worker_name = format!("{container_name}-self-update-worker");
  let command = format!(
    "{bin} run -d --rm --name {worker_name} \
     --label com.stevedore.managed=true \
     --label com.stevedore.role=update-worker \
     --label {deployment_label} \
     -v /var/run/docker.sock:/var/run/docker.sock \
     {image} sh -c {script}",
    bin = runtime_bin(),
    worker_name = shell_quote(&worker_name),
    deployment_label = shell_quote(&format!("com.stevedore.deployment={deployment}")),
    image = WORKER_IMAGE,
    script = shell_quote(&replacement_script),
  );

  let output = command::run_shell_command(&command, None).await;
  if !output.success() {
    anyhow::bail!("failed to launch replacement worker: {}", output.stderr_tail(20));
  }
  Ok(())
}
