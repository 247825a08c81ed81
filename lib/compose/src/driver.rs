use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use command::{Log, run_shell_command, run_shell_logged_timeout};
use stevedore_types::Parameter;

/// Search order for the Compose entrypoint in a checkout. The first
/// non-directory hit wins.
const ENTRYPOINT_CANDIDATES: &[&str] = &[
  "docker-compose.yaml",
  "docker-compose.yml",
  "compose.yaml",
  "compose.yml",
  "stevedore.yaml",
];

pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
  #[error("no compose entrypoint found in {0}")]
  MissingEntrypoint(PathBuf),
  #[error("compose deploy failed: {stderr_tail}")]
  Deploy { stderr_tail: String },
  #[error("compose stop failed: {stderr_tail}")]
  Stop { stderr_tail: String },
}

pub fn project_name(deployment: &str) -> String {
  format!("stevedore-{deployment}")
}

/// Finds the Compose entrypoint in `checkout_dir`, in priority order.
pub fn find_entrypoint(
  checkout_dir: &Path,
) -> Result<PathBuf, ComposeError> {
  for candidate in ENTRYPOINT_CANDIDATES {
    let path = checkout_dir.join(candidate);
    if path.is_file() {
      return Ok(path);
    }
  }
  Err(ComposeError::MissingEntrypoint(checkout_dir.to_path_buf()))
}

pub struct DeployOutcome {
  pub services: Vec<String>,
  pub log: Log,
}

/// Runs `up -d --build --remove-orphans` against the discovered
/// entrypoint, with the deployment's directories ensured first and its
/// parameters plus the well-known `STEVEDORE_*` variables passed as
/// environment. Returns the service list from `compose config
/// --services`, which is non-fatal if it fails.
pub async fn deploy(
  deployment: &str,
  checkout_dir: &Path,
  data_dir: &Path,
  logs_dir: &Path,
  shared_dir: &Path,
  parameters: &[Parameter],
  timeout: Duration,
) -> Result<DeployOutcome, ComposeError> {
  let entrypoint = find_entrypoint(checkout_dir)?;

  for dir in [data_dir, logs_dir, shared_dir] {
    std::fs::create_dir_all(dir).map_err(|e| ComposeError::Deploy {
      stderr_tail: format!("failed to create {}: {e}", dir.display()),
    })?;
  }

  let project = project_name(deployment);
  let env = build_env(deployment, data_dir, logs_dir, shared_dir, parameters);

  let command = format!(
    "{} compose -f {} -p {} up -d --build --remove-orphans",
    runtime_bin(),
    shell_quote(&entrypoint.to_string_lossy()),
    shell_quote(&project),
  );

  let log = run_shell_logged_timeout(
    "compose-up",
    checkout_dir,
    &with_env_prefix(&env, &command),
    timeout,
  )
  .await;

  if !log.success {
    return Err(ComposeError::Deploy {
      stderr_tail: tail(&log.stderr, 20),
    });
  }

  let services = list_services(&entrypoint, &project, checkout_dir)
    .await
    .unwrap_or_default();

  Ok(DeployOutcome { services, log })
}

/// `down --remove-orphans`, preferring the discovered entrypoint but
/// falling back to project-name-only addressing when the checkout is
/// missing. A missing checkout is not itself fatal.
pub async fn stop(
  deployment: &str,
  checkout_dir: &Path,
  timeout: Duration,
) -> Result<Log, ComposeError> {
  let project = project_name(deployment);

  let command = match find_entrypoint(checkout_dir) {
    Ok(entrypoint) => format!(
      "{} compose -f {} -p {} down --remove-orphans",
      runtime_bin(),
      shell_quote(&entrypoint.to_string_lossy()),
      shell_quote(&project),
    ),
    Err(_) => format!(
      "{} compose -p {} down --remove-orphans",
      runtime_bin(),
      shell_quote(&project),
    ),
  };

  let log =
    run_shell_logged_timeout("compose-down", checkout_dir, &command, timeout)
      .await;

  if !log.success {
    return Err(ComposeError::Stop { stderr_tail: tail(&log.stderr, 20) });
  }
  Ok(log)
}

async fn list_services(
  entrypoint: &Path,
  project: &str,
  checkout_dir: &Path,
) -> anyhow::Result<Vec<String>> {
  let command = format!(
    "{} compose -f {} -p {} config --services",
    runtime_bin(),
    shell_quote(&entrypoint.to_string_lossy()),
    shell_quote(project),
  );
  let output = run_shell_command(&command, checkout_dir).await;
  if !output.success() {
    return Err(anyhow!("compose config --services failed"));
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

fn build_env(
  deployment: &str,
  data_dir: &Path,
  logs_dir: &Path,
  shared_dir: &Path,
  parameters: &[Parameter],
) -> Vec<(String, String)> {
  let mut env = vec![
    ("STEVEDORE_DEPLOYMENT".to_string(), deployment.to_string()),
    ("STEVEDORE_DATA".to_string(), data_dir.to_string_lossy().to_string()),
    ("STEVEDORE_LOGS".to_string(), logs_dir.to_string_lossy().to_string()),
    ("STEVEDORE_SHARED".to_string(), shared_dir.to_string_lossy().to_string()),
  ];
  for param in parameters {
    env.push((param.name.clone(), String::from_utf8_lossy(&param.value).to_string()));
  }
  env
}

fn with_env_prefix(env: &[(String, String)], command: &str) -> String {
  if env.is_empty() {
    return command.to_string();
  }
  let assignments = env
    .iter()
    .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
    .collect::<Vec<_>>()
    .join(" ");
  format!("export {assignments}; {command}")
}

fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

fn tail(text: &str, max_lines: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  let start = lines.len().saturating_sub(max_lines);
  lines[start..].join("\n")
}

/// The container runtime's Compose-capable binary. Overridable via
/// `STEVEDORE_RUNTIME_BIN` for hosts running Podman instead of Docker.
pub(crate) fn runtime_bin() -> String {
  std::env::var("STEVEDORE_RUNTIME_BIN").unwrap_or_else(|_| "docker".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn project_name_is_deterministic() {
    assert_eq!(project_name("app1"), "stevedore-app1");
  }

  #[test]
  fn find_entrypoint_prefers_docker_compose_yaml() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("compose.yaml"), "services: {}").unwrap();
    std::fs::write(dir.path().join("docker-compose.yaml"), "services: {}").unwrap();

    let found = find_entrypoint(dir.path()).unwrap();
    assert_eq!(found.file_name().unwrap(), "docker-compose.yaml");
  }

  #[test]
  fn find_entrypoint_errors_when_none_present() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      find_entrypoint(dir.path()),
      Err(ComposeError::MissingEntrypoint(_))
    ));
  }

  #[test]
  fn shell_quote_escapes_single_quotes() {
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
  }
}
