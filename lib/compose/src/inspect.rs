use std::time::Duration;

use command::run_shell_command;
use serde::{Deserialize, Serialize};

use crate::driver::project_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
  Running,
  Exited,
  Created,
  Restarting,
  Paused,
  Dead,
}

impl ContainerState {
  fn parse(raw: &str) -> Self {
    match raw {
      "running" => Self::Running,
      "exited" => Self::Exited,
      "created" => Self::Created,
      "restarting" => Self::Restarting,
      "paused" => Self::Paused,
      _ => Self::Dead,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
  Healthy,
  Unhealthy,
  Starting,
  None,
}

impl ContainerHealth {
  fn parse(raw: Option<&str>) -> Self {
    match raw {
      Some("healthy") => Self::Healthy,
      Some("unhealthy") => Self::Unhealthy,
      Some("starting") => Self::Starting,
      _ => Self::None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
  pub container_id: String,
  pub container_name: String,
  pub service: String,
  pub state: ContainerState,
  pub health: ContainerHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
  pub deployment: String,
  pub healthy: bool,
  pub message: String,
  pub containers: Vec<ContainerStatus>,
}

/// Lists containers whose `com.docker.compose.project` label is this
/// deployment's project name, then inspects each to produce a
/// deployment-level health verdict.
pub async fn inspect_deployment(deployment: &str) -> anyhow::Result<DeploymentStatus> {
  let project = project_name(deployment);
  let ids = list_container_ids(&project).await?;

  if ids.is_empty() {
    return Ok(DeploymentStatus {
      deployment: deployment.to_string(),
      healthy: false,
      message: "No containers found".to_string(),
      containers: Vec::new(),
    });
  }

  let containers = inspect_containers(&ids).await?;
  let total = containers.len();
  let running_healthy = containers
    .iter()
    .filter(|c| {
      c.state == ContainerState::Running && c.health != ContainerHealth::Unhealthy
    })
    .count();

  let healthy = running_healthy == total;
  let message = if healthy {
    format!("All {total} containers healthy")
  } else {
    format!("{running_healthy}/{total} containers running")
  };

  Ok(DeploymentStatus { deployment: deployment.to_string(), healthy, message, containers })
}

/// Polls `inspect_deployment` every 2s until it reports healthy with at
/// least one container, or `timeout` elapses.
pub async fn wait_for_healthy(
  deployment: &str,
  timeout: Duration,
) -> anyhow::Result<DeploymentStatus> {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    let status = inspect_deployment(deployment).await?;
    if status.healthy && !status.containers.is_empty() {
      return Ok(status);
    }
    if tokio::time::Instant::now() >= deadline {
      return Ok(status);
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
  }
}

async fn list_container_ids(project: &str) -> anyhow::Result<Vec<String>> {
  let command = format!(
    "{} ps -a --filter label=com.docker.compose.project={project} --format {{{{.ID}}}}",
    crate::driver::runtime_bin(),
  );
  let output = run_shell_command(&command, None).await;
  if !output.success() {
    return Err(anyhow::anyhow!("container listing failed: {}", output.stderr));
  }
  Ok(
    output
      .stdout
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(str::to_string)
      .collect(),
  )
}

#[derive(Deserialize)]
struct InspectEntry {
  #[serde(rename = "Id")]
  id: String,
  #[serde(rename = "Name")]
  name: String,
  #[serde(rename = "Config")]
  config: InspectConfig,
  #[serde(rename = "State")]
  state: InspectState,
}

#[derive(Deserialize)]
struct InspectConfig {
  #[serde(rename = "Labels", default)]
  labels: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct InspectState {
  #[serde(rename = "Status")]
  status: String,
  #[serde(rename = "Health", default)]
  health: Option<InspectHealth>,
}

#[derive(Deserialize)]
struct InspectHealth {
  #[serde(rename = "Status")]
  status: String,
}

async fn inspect_containers(ids: &[String]) -> anyhow::Result<Vec<ContainerStatus>> {
  let command =
    format!("{} inspect {}", crate::driver::runtime_bin(), ids.join(" "));
  let output = run_shell_command(&command, None).await;
  if !output.success() {
    return Err(anyhow::anyhow!("container inspect failed: {}", output.stderr));
  }

  let entries: Vec<InspectEntry> = serde_json::from_str(&output.stdout)?;
  Ok(
    entries
      .into_iter()
      .map(|entry| {
        let service = entry
          .config
          .labels
          .get("com.docker.compose.service")
          .cloned()
          .unwrap_or_default();
        ContainerStatus {
          container_id: entry.id,
          container_name: entry.name.trim_start_matches('/').to_string(),
          service,
          state: ContainerState::parse(&entry.state.status),
          health: ContainerHealth::parse(
            entry.state.health.as_ref().map(|h| h.status.as_str()),
          ),
        }
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_state_parses_closed_set() {
    assert_eq!(ContainerState::parse("running"), ContainerState::Running);
    assert_eq!(ContainerState::parse("weird"), ContainerState::Dead);
  }

  #[test]
  fn container_health_defaults_to_none() {
    assert_eq!(ContainerHealth::parse(None), ContainerHealth::None);
    assert_eq!(ContainerHealth::parse(Some("healthy")), ContainerHealth::Healthy);
  }
}
