use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use logger::{LogConfig, LogLevel, StdioLogMode};
use serde::Deserialize;

/// Overrides sourced from CLI flags, which win over the environment and
/// the defaults below. Populated by `bin/stevedore`'s clap parser --
/// this crate only owns resolution and storage, not argument parsing.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub root: Option<PathBuf>,
  pub admin_bind_address: Option<String>,
  pub log_level: Option<LogLevel>,
}

/// `STEVEDORE_*` environment overrides. Every field is optional; an
/// absent field falls through to the CLI override (if any) or the
/// built-in default.
#[derive(Debug, Deserialize)]
struct Env {
  #[serde(default)]
  stevedore_root: Option<PathBuf>,
  #[serde(default)]
  stevedore_admin_bind_address: Option<String>,
  #[serde(default)]
  stevedore_query_socket_path: Option<PathBuf>,
  #[serde(default)]
  stevedore_min_poll_interval_seconds: Option<u64>,
  #[serde(default)]
  stevedore_reconcile_interval_seconds: Option<u64>,
  #[serde(default)]
  stevedore_sync_timeout_seconds: Option<u64>,
  #[serde(default)]
  stevedore_deploy_timeout_seconds: Option<u64>,
  #[serde(default)]
  stevedore_long_poll_timeout_seconds: Option<u64>,
  #[serde(default)]
  stevedore_event_history_capacity: Option<usize>,
  #[serde(default)]
  stevedore_log_level: Option<LogLevel>,
  #[serde(default)]
  stevedore_log_stdio: Option<StdioLogMode>,
  #[serde(default)]
  stevedore_log_pretty: Option<bool>,
  #[serde(default)]
  stevedore_log_ansi: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub root: PathBuf,
  pub admin_bind_address: String,
  pub query_socket_path: PathBuf,
  pub min_poll_interval: Duration,
  pub reconcile_interval: Duration,
  pub sync_timeout: Duration,
  pub deploy_timeout: Duration,
  pub long_poll_timeout: Duration,
  pub event_history_capacity: usize,
  pub log: LogConfig,
  pub version: &'static str,
  pub build: String,
}

impl Config {
  pub fn system_dir(&self) -> PathBuf {
    self.root.join("system")
  }

  pub fn deployments_dir(&self) -> PathBuf {
    self.root.join("deployments")
  }

  pub fn deployment_dir(&self, name: &str) -> PathBuf {
    self.deployments_dir().join(name)
  }

  pub fn shared_dir(&self) -> PathBuf {
    self.root.join("shared")
  }

  pub fn db_path(&self) -> PathBuf {
    self.system_dir().join("stevedore.db")
  }

  pub fn db_key_path(&self) -> PathBuf {
    self.system_dir().join("db.key")
  }

  pub fn admin_key_path(&self) -> PathBuf {
    self.system_dir().join("admin.key")
  }
}

fn default_root() -> PathBuf {
  PathBuf::from("/var/lib/stevedore")
}

fn resolve(overrides: Overrides) -> anyhow::Result<Config> {
  let env: Env = envy::from_env().context("failed to parse stevedore environment")?;

  let root = overrides.root.or(env.stevedore_root).unwrap_or_else(default_root);

  Ok(Config {
    root,
    admin_bind_address: overrides
      .admin_bind_address
      .or(env.stevedore_admin_bind_address)
      .unwrap_or_else(|| ":42107".to_string()),
    query_socket_path: env
      .stevedore_query_socket_path
      .unwrap_or_else(|| PathBuf::from("/var/run/stevedore/query.sock")),
    min_poll_interval: Duration::from_secs(
      env.stevedore_min_poll_interval_seconds.unwrap_or(30),
    ),
    reconcile_interval: Duration::from_secs(
      env.stevedore_reconcile_interval_seconds.unwrap_or(30),
    ),
    sync_timeout: Duration::from_secs(
      env.stevedore_sync_timeout_seconds.unwrap_or(5 * 60),
    ),
    deploy_timeout: Duration::from_secs(
      env.stevedore_deploy_timeout_seconds.unwrap_or(10 * 60),
    ),
    long_poll_timeout: Duration::from_secs(
      env.stevedore_long_poll_timeout_seconds.unwrap_or(60),
    ),
    event_history_capacity: env.stevedore_event_history_capacity.unwrap_or(100),
    log: LogConfig {
      level: overrides.log_level.or(env.stevedore_log_level).unwrap_or_default(),
      stdio: env.stevedore_log_stdio.unwrap_or_default(),
      pretty: env.stevedore_log_pretty.unwrap_or(false),
      ansi: env.stevedore_log_ansi.unwrap_or(true),
      location: false,
    },
    version: env!("CARGO_PKG_VERSION"),
    build: std::env::var("STEVEDORE_BUILD").unwrap_or_else(|_| "dev".to_string()),
  })
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Resolves and stores the global config. Must be called exactly once,
/// before the first call to [config]; called from `bin/stevedore`'s
/// entrypoint with the parsed CLI overrides.
pub fn init(overrides: Overrides) -> anyhow::Result<&'static Config> {
  let resolved = resolve(overrides)?;
  Ok(CONFIG.get_or_init(|| resolved))
}

/// Returns the global config. Panics if [init] has not run yet.
pub fn config() -> &'static Config {
  CONFIG.get().expect("config::init must run before config::config")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cli_override_wins_over_env_and_default() {
    unsafe {
      std::env::set_var("STEVEDORE_ADMIN_BIND_ADDRESS", ":9999");
    }
    let resolved = resolve(Overrides {
      admin_bind_address: Some(":1234".to_string()),
      ..Default::default()
    })
    .unwrap();
    unsafe {
      std::env::remove_var("STEVEDORE_ADMIN_BIND_ADDRESS");
    }
    assert_eq!(resolved.admin_bind_address, ":1234");
  }

  #[test]
  fn env_wins_over_default() {
    unsafe {
      std::env::set_var("STEVEDORE_ADMIN_BIND_ADDRESS", ":9999");
    }
    let resolved = resolve(Overrides::default()).unwrap();
    unsafe {
      std::env::remove_var("STEVEDORE_ADMIN_BIND_ADDRESS");
    }
    assert_eq!(resolved.admin_bind_address, ":9999");
  }

  #[test]
  fn falls_back_to_defaults() {
    unsafe {
      std::env::remove_var("STEVEDORE_ADMIN_BIND_ADDRESS");
      std::env::remove_var("STEVEDORE_ROOT");
    }
    let resolved = resolve(Overrides::default()).unwrap();
    assert_eq!(resolved.admin_bind_address, ":42107");
    assert_eq!(resolved.root, default_root());
  }

  #[test]
  fn derived_paths_are_rooted() {
    let resolved =
      resolve(Overrides { root: Some(PathBuf::from("/tmp/sd")), ..Default::default() })
        .unwrap();
    assert_eq!(resolved.db_path(), PathBuf::from("/tmp/sd/system/stevedore.db"));
    assert_eq!(resolved.deployment_dir("app1"), PathBuf::from("/tmp/sd/deployments/app1"));
  }
}
