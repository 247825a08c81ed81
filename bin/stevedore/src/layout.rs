use std::path::{Path, PathBuf};

use anyhow::Context;
use config::Config;
use stevedore_types::validate_deployment_name;

/// Owns path computation under the instance root and validates
/// identifiers at the entry boundary -- every caller that accepts a
/// deployment or namespace name from a CLI arg or an HTTP path segment
/// goes through here before touching the filesystem or the store.
pub struct Layout<'a> {
  config: &'a Config,
}

impl<'a> Layout<'a> {
  pub fn new(config: &'a Config) -> Self {
    Self { config }
  }

  pub fn deployment_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    validate_deployment_name(name)?;
    Ok(self.config.deployment_dir(name))
  }

  pub fn repo_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.deployment_dir(name)?.join("repo"))
  }

  pub fn checkout_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.repo_dir(name)?.join("git"))
  }

  pub fn ssh_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.repo_dir(name)?.join("ssh"))
  }

  pub fn ssh_private_key_path(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.ssh_dir(name)?.join("id_ed25519"))
  }

  pub fn ssh_public_key_path(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.ssh_dir(name)?.join("id_ed25519.pub"))
  }

  pub fn url_file(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.repo_dir(name)?.join("url.txt"))
  }

  pub fn branch_file(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.repo_dir(name)?.join("branch.txt"))
  }

  pub fn parameters_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.deployment_dir(name)?.join("parameters"))
  }

  pub fn runtime_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.deployment_dir(name)?.join("runtime"))
  }

  pub fn data_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.deployment_dir(name)?.join("data"))
  }

  pub fn logs_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
    Ok(self.deployment_dir(name)?.join("logs"))
  }

  pub fn shared_dir(&self) -> PathBuf {
    self.config.shared_dir()
  }

  pub fn shared_namespace_file(&self, namespace: &str) -> PathBuf {
    self.shared_dir().join(format!("{namespace}.yaml"))
  }

  /// `.git` under a deployment exists iff it has been synced at least
  /// once -- used to decide between clone and fetch in the Git Pipeline.
  pub fn has_local_checkout(&self, name: &str) -> anyhow::Result<bool> {
    Ok(self.checkout_dir(name)?.join(".git").exists())
  }

  /// Writes the freshly generated SSH identity for `name`, creating the
  /// ssh directory with restrictive permissions first.
  pub fn write_ssh_identity(
    &self,
    name: &str,
    identity: &git::SshIdentity,
  ) -> anyhow::Result<()> {
    let ssh_dir = self.ssh_dir(name)?;
    std::fs::create_dir_all(&ssh_dir)
      .with_context(|| format!("failed to create {}", ssh_dir.display()))?;
    set_private_dir_permissions(&ssh_dir)?;

    let private_path = self.ssh_private_key_path(name)?;
    std::fs::write(&private_path, &identity.private_key_pem)
      .with_context(|| format!("failed to write {}", private_path.display()))?;
    set_private_file_permissions(&private_path)?;

    let public_path = self.ssh_public_key_path(name)?;
    std::fs::write(&public_path, &identity.public_key_line)
      .with_context(|| format!("failed to write {}", public_path.display()))?;

    Ok(())
  }
}

#[cfg(unix)]
pub(crate) fn set_private_file_permissions(path: &Path) -> anyhow::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
  Ok(())
}

#[cfg(not(unix))]
pub(crate) fn set_private_file_permissions(_path: &Path) -> anyhow::Result<()> {
  Ok(())
}

#[cfg(unix)]
fn set_private_dir_permissions(path: &Path) -> anyhow::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
  Ok(())
}

#[cfg(not(unix))]
fn set_private_dir_permissions(_path: &Path) -> anyhow::Result<()> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use logger::LogConfig;
  use std::time::Duration;

  fn test_config(root: &Path) -> Config {
    Config {
      root: root.to_path_buf(),
      admin_bind_address: ":42107".to_string(),
      query_socket_path: PathBuf::from("/tmp/stevedore-test.sock"),
      min_poll_interval: Duration::from_secs(30),
      reconcile_interval: Duration::from_secs(30),
      sync_timeout: Duration::from_secs(300),
      deploy_timeout: Duration::from_secs(600),
      long_poll_timeout: Duration::from_secs(60),
      event_history_capacity: 100,
      log: LogConfig::default(),
      version: "test",
      build: "test".to_string(),
    }
  }

  #[test]
  fn rejects_invalid_deployment_names_before_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let layout = Layout::new(&config);
    assert!(layout.deployment_dir("../escape").is_err());
  }

  #[test]
  fn computes_paths_relative_to_root() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let layout = Layout::new(&config);
    let repo_dir = layout.repo_dir("app1").unwrap();
    assert_eq!(repo_dir, dir.path().join("deployments").join("app1").join("repo"));
  }
}
