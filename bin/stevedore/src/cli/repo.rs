use clap::Subcommand;
use config::Config;
use stevedore_types::{DesiredState, Repository, clamp_poll_interval, unix_timestamp};
use store::Store;

use crate::layout::Layout;

#[derive(Subcommand, Debug, Clone)]
pub enum RepoCommand {
  /// Registers a repository, generating its SSH deploy key.
  Add {
    name: String,
    url: String,
    #[arg(long, default_value = "main")]
    branch: String,
    #[arg(long)]
    poll_interval: Option<i64>,
  },
  /// Prints a deployment's SSH public key (add it as a deploy key upstream).
  Key { name: String },
  /// Lists every registered deployment.
  List,
}

pub async fn handle(
  _config: &Config,
  store: &Store,
  layout: &Layout<'_>,
  command: RepoCommand,
) -> anyhow::Result<String> {
  match command {
    RepoCommand::Add { name, url, branch, poll_interval } => {
      add(store, layout, &name, &url, &branch, poll_interval).await
    }
    RepoCommand::Key { name } => show_key(layout, &name),
    RepoCommand::List => list(store).await,
  }
}

async fn add(
  store: &Store,
  layout: &Layout<'_>,
  name: &str,
  url: &str,
  branch: &str,
  poll_interval: Option<i64>,
) -> anyhow::Result<String> {
  stevedore_types::validate_deployment_name(name)?;
  store.ensure_deployment(name).await?;

  let identity = git::generate_identity(&format!("stevedore-{name}"));
  layout.write_ssh_identity(name, &identity)?;

  std::fs::write(layout.url_file(name)?, url)?;
  std::fs::write(layout.branch_file(name)?, branch)?;

  store
    .put_repository(Repository {
      deployment: name.to_string(),
      url: url.to_string(),
      branch: branch.to_string(),
      poll_interval_seconds: clamp_poll_interval(
        poll_interval.unwrap_or(stevedore_types::DEFAULT_POLL_INTERVAL_SECONDS),
      ),
      enabled: true,
      desired_state: DesiredState::Up,
      updated_at: unix_timestamp(),
    })
    .await?;

  let mut output = format!(
    "Registered '{name}' tracking {branch} @ {url}\n\nAdd this deploy key to the repository:\n{}",
    identity.public_key_line.trim_end(),
  );
  if let Some(settings_url) = github_deploy_keys_url(url) {
    output.push_str(&format!("\n\nDeploy keys settings: {settings_url}"));
  }
  Ok(output)
}

/// Recognizes `git@github.com:owner/repo(.git)` and
/// `[ssh://][git@]github.com/owner/repo(.git)` forms and returns the
/// repository's deploy-keys settings page.
fn github_deploy_keys_url(url: &str) -> Option<String> {
  let rest = url
    .strip_prefix("git@github.com:")
    .or_else(|| url.strip_prefix("ssh://git@github.com/"))
    .or_else(|| url.strip_prefix("https://github.com/"))
    .or_else(|| url.strip_prefix("http://github.com/"))?;
  let rest = rest.strip_suffix(".git").unwrap_or(rest);
  let (owner, repo) = rest.split_once('/')?;
  if owner.is_empty() || repo.is_empty() {
    return None;
  }
  Some(format!("https://github.com/{owner}/{repo}/settings/keys"))
}

fn show_key(layout: &Layout<'_>, name: &str) -> anyhow::Result<String> {
  let path = layout.ssh_public_key_path(name)?;
  std::fs::read_to_string(&path)
    .map_err(|e| anyhow::anyhow!("no SSH key for '{name}' ({e}); run 'repo add' first"))
}

async fn list(store: &Store) -> anyhow::Result<String> {
  let names = store.list_deployments().await?;
  if names.is_empty() {
    return Ok("No deployments registered.".to_string());
  }

  let mut table = comfy_table::Table::new();
  table.set_header(vec!["DEPLOYMENT", "URL", "BRANCH", "ENABLED", "DESIRED"]);
  for name in names {
    if let Some(repo) = store.get_repository(&name).await? {
      table.add_row(vec![
        repo.deployment,
        repo.url,
        repo.branch,
        repo.enabled.to_string(),
        repo.desired_state.as_str().to_string(),
      ]);
    }
  }
  Ok(table.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detects_github_ssh_url() {
    assert_eq!(
      github_deploy_keys_url("git@github.com:acme/app1.git"),
      Some("https://github.com/acme/app1/settings/keys".to_string())
    );
  }

  #[test]
  fn detects_github_https_url() {
    assert_eq!(
      github_deploy_keys_url("https://github.com/acme/app1"),
      Some("https://github.com/acme/app1/settings/keys".to_string())
    );
  }

  #[test]
  fn non_github_url_is_none() {
    assert_eq!(github_deploy_keys_url("git@gitlab.com:acme/app1.git"), None);
  }
}
