use serde::{Deserialize, Serialize};

mod validate;

pub use validate::{
  validate_deployment_name, validate_ident, validate_param_name,
};

/// The reserved deployment name denoting stevedore's own source repository.
/// When synced, it is never deployed through the Compose path -- see
/// [crate::is_self_deployment] and the self-update component.
pub const SELF_DEPLOYMENT: &str = "stevedore";

pub const MIN_POLL_INTERVAL_SECONDS: i64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECONDS: i64 = 300;

pub fn is_self_deployment(name: &str) -> bool {
  name == SELF_DEPLOYMENT
}

pub fn unix_timestamp() -> i64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs() as i64
}

/// Clamps a poll interval to the minimum allowed by the data model
/// (`poll_interval_seconds < 60` is clamped to 60 on write).
pub fn clamp_poll_interval(seconds: i64) -> i64 {
  seconds.max(MIN_POLL_INTERVAL_SECONDS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
  pub name: String,
  pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
  Up,
  Down,
}

impl Default for DesiredState {
  fn default() -> Self {
    DesiredState::Up
  }
}

impl DesiredState {
  pub fn as_str(&self) -> &'static str {
    match self {
      DesiredState::Up => "up",
      DesiredState::Down => "down",
    }
  }

  pub fn from_str_lenient(s: &str) -> Self {
    match s {
      "down" => DesiredState::Down,
      _ => DesiredState::Up,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
  pub deployment: String,
  pub url: String,
  pub branch: String,
  pub poll_interval_seconds: i64,
  pub enabled: bool,
  /// Not in the distilled data model's field list verbatim, but called
  /// for explicitly in the design notes (open question: reconcile vs.
  /// manual `down`) as the hardened replacement for inferring "desired"
  /// state from `last_deploy_at` alone.
  pub desired_state: DesiredState,
  pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
  pub deployment: String,
  pub name: String,
  #[serde(with = "serde_bytes_as_base64")]
  pub value: Vec<u8>,
  pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
  pub deployment: String,
  pub last_commit: Option<String>,
  pub last_sync_at: Option<i64>,
  pub last_deploy_at: Option<i64>,
  pub last_error: Option<String>,
  pub last_error_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryToken {
  pub deployment: String,
  pub token: String,
  pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMigration {
  pub version: i64,
  pub description: String,
  pub applied_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  DeploymentCreated,
  DeploymentUpdated,
  DeploymentRemoved,
  DeploymentStatusChanged,
  ParamsChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub kind: EventKind,
  pub deployment: Option<String>,
  pub timestamp: i64,
  pub data: serde_json::Value,
}

impl Event {
  pub fn new(
    kind: EventKind,
    deployment: impl Into<Option<String>>,
    data: serde_json::Value,
  ) -> Self {
    Self {
      kind,
      deployment: deployment.into(),
      timestamp: unix_timestamp(),
      data,
    }
  }
}

/// Serializes parameter values (opaque bytes) as base64 strings over the
/// wire / in JSON responses, while the store keeps them as raw bytes.
mod serde_bytes_as_base64 {
  use data_encoding::BASE64;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(
    bytes: &[u8],
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clamps_low_poll_interval() {
    assert_eq!(clamp_poll_interval(10), MIN_POLL_INTERVAL_SECONDS);
    assert_eq!(clamp_poll_interval(0), MIN_POLL_INTERVAL_SECONDS);
    assert_eq!(clamp_poll_interval(120), 120);
  }

  #[test]
  fn identifies_self_deployment() {
    assert!(is_self_deployment("stevedore"));
    assert!(!is_self_deployment("app1"));
  }
}
