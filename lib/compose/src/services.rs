use std::collections::HashMap;

use command::run_shell_command;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingress {
  pub enabled: bool,
  pub subdomain: Option<String>,
  pub port: Option<u16>,
  pub websocket: bool,
  pub health_check: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceView {
  pub deployment: String,
  pub service: String,
  pub container_id: String,
  pub container_name: String,
  pub running: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ingress: Option<Ingress>,
}

#[derive(Deserialize)]
struct ContainerEntry {
  #[serde(rename = "ID")]
  id: String,
  #[serde(rename = "Names")]
  names: String,
  #[serde(rename = "State")]
  state: String,
  #[serde(rename = "Labels")]
  labels: String,
}

/// Enumerates every container across all `stevedore-`-prefixed Compose
/// projects (not just one deployment) for the service discovery view
/// used by the query socket API.
///
/// `parameters` maps `deployment -> (name -> value)`, used for the
/// label-absent ingress fallback.
pub async fn list_services(
  parameters: &HashMap<String, HashMap<String, Vec<u8>>>,
) -> anyhow::Result<Vec<ServiceView>> {
  let command = format!(
    "{} ps -a --format json",
    crate::driver::runtime_bin(),
  );
  let output = run_shell_command(&command, None).await;
  if !output.success() {
    return Err(anyhow::anyhow!("container listing failed: {}", output.stderr));
  }

  let mut views = Vec::new();
  for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
    let entry: ContainerEntry = match serde_json::from_str(line) {
      Ok(entry) => entry,
      Err(_) => continue,
    };
    let labels = parse_labels(&entry.labels);

    let Some(project) = labels.get("com.docker.compose.project") else {
      continue;
    };
    let Some(deployment) = project.strip_prefix("stevedore-") else {
      continue;
    };

    let service = labels
      .get("com.docker.compose.service")
      .cloned()
      .unwrap_or_default();

    let ingress = resolve_ingress(
      &labels,
      deployment,
      &service,
      parameters.get(deployment),
    );

    views.push(ServiceView {
      deployment: deployment.to_string(),
      service,
      container_id: entry.id,
      container_name: entry.names.trim_start_matches('/').to_string(),
      running: entry.state == "running",
      ingress,
    });
  }

  Ok(views)
}

/// `docker ps --format json` emits labels as a single comma-joined
/// `key=value` string, not a nested object.
fn parse_labels(raw: &str) -> HashMap<String, String> {
  raw
    .split(',')
    .filter_map(|pair| pair.split_once('='))
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn resolve_ingress(
  labels: &HashMap<String, String>,
  _deployment: &str,
  service: &str,
  parameters: Option<&HashMap<String, Vec<u8>>>,
) -> Option<Ingress> {
  if labels.contains_key("stevedore.ingress.enabled") {
    return Some(Ingress {
      enabled: truthy(labels.get("stevedore.ingress.enabled")),
      subdomain: labels.get("stevedore.ingress.subdomain").cloned(),
      port: labels.get("stevedore.ingress.port").and_then(|p| p.parse().ok()),
      websocket: truthy(labels.get("stevedore.ingress.websocket")),
      health_check: labels.get("stevedore.ingress.healthCheck").cloned(),
    });
  }

  let parameters = parameters?;
  let prefix = format!(
    "STEVEDORE_INGRESS_{}_",
    service.to_uppercase().replace('-', "_")
  );
  let get = |suffix: &str| -> Option<String> {
    parameters
      .get(&format!("{prefix}{suffix}"))
      .map(|bytes| String::from_utf8_lossy(bytes).to_string())
  };

  let enabled_raw = get("ENABLED")?;
  Some(Ingress {
    enabled: truthy(Some(&enabled_raw)),
    subdomain: get("SUBDOMAIN"),
    port: get("PORT").and_then(|p| p.parse().ok()),
    websocket: truthy(get("WEBSOCKET").as_ref()),
    health_check: get("HEALTHCHECK"),
  })
}

fn truthy(value: Option<&String>) -> bool {
  matches!(
    value.map(|v| v.to_ascii_lowercase()).as_deref(),
    Some("true") | Some("1") | Some("yes")
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_ingress_takes_precedence_over_parameters() {
    let mut labels = HashMap::new();
    labels.insert("stevedore.ingress.enabled".to_string(), "true".to_string());
    labels.insert("stevedore.ingress.subdomain".to_string(), "app".to_string());

    let ingress = resolve_ingress(&labels, "app1", "web", None).unwrap();
    assert!(ingress.enabled);
    assert_eq!(ingress.subdomain.as_deref(), Some("app"));
  }

  #[test]
  fn falls_back_to_normalized_parameter_names() {
    let labels = HashMap::new();
    let mut params = HashMap::new();
    params.insert("STEVEDORE_INGRESS_WEB_API_ENABLED".to_string(), b"yes".to_vec());
    params.insert("STEVEDORE_INGRESS_WEB_API_PORT".to_string(), b"8080".to_vec());

    let ingress =
      resolve_ingress(&labels, "app1", "web-api", Some(&params)).unwrap();
    assert!(ingress.enabled);
    assert_eq!(ingress.port, Some(8080));
  }

  #[test]
  fn no_ingress_when_neither_label_nor_parameter_present() {
    let labels = HashMap::new();
    assert!(resolve_ingress(&labels, "app1", "web", None).is_none());
  }
}
