use colored::Colorize;
use config::Config;
use serde::Deserialize;
use store::Store;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthView {
  version: String,
  build: String,
}

/// Prints version, on-disk paths, deployment count, and contacts the
/// running daemon's `/healthz`, warning if its version/build differs
/// from this CLI binary's (§6).
pub async fn run(config: &Config, store: &Store) -> anyhow::Result<String> {
  let mut lines = Vec::new();
  lines.push(format!("Version:    {} (build {})", config.version, config.build));
  lines.push(format!("Root:       {}", config.root.display()));
  lines.push(format!("Admin key:  {}", config.admin_key_path().display()));
  lines.push(format!("DB:         {}", config.db_path().display()));

  let deployments = store.list_deployments().await?;
  lines.push(format!("Deployments: {}", deployments.len()));

  lines.push(String::new());
  lines.push(contact_daemon(config).await);

  Ok(lines.join("\n"))
}

async fn contact_daemon(config: &Config) -> String {
  let url = format!("http://{}/healthz", admin_http_address(&config.admin_bind_address));
  let response = match reqwest::get(&url).await {
    Ok(response) => response,
    Err(e) => return format!("Daemon:     {} ({e})", "unreachable".red()),
  };
  let health: HealthView = match response.json().await {
    Ok(health) => health,
    Err(e) => return format!("Daemon:     {} (bad /healthz response: {e})", "unreachable".red()),
  };

  if health.version == config.version && health.build == config.build {
    format!("Daemon:     {} ({} build {})", "reachable, version matches".green(), health.version, health.build)
  } else {
    format!(
      "Daemon:     {} (daemon is {}/{}, this CLI is {}/{})",
      "reachable, VERSION MISMATCH".red(),
      health.version,
      health.build,
      config.version,
      config.build,
    )
  }
}

fn admin_http_address(configured: &str) -> String {
  match configured.strip_prefix(':') {
    Some(port) => format!("127.0.0.1:{port}"),
    None => configured.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn admin_http_address_expands_port_only_form() {
    assert_eq!(admin_http_address(":42107"), "127.0.0.1:42107");
  }

  #[test]
  fn admin_http_address_passes_through_explicit_host() {
    assert_eq!(admin_http_address("127.0.0.1:9000"), "127.0.0.1:9000");
  }
}
