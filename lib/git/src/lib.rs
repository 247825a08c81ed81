use std::path::Path;

use anyhow::{Context, anyhow};
use command::{run_standard_command, run_standard_logged_timeout};

mod keygen;
pub use keygen::{SshIdentity, generate_identity};

/// Result of a fetch-only update check. The working tree is never touched.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
  pub current_commit: String,
  pub remote_commit: String,
  pub has_changes: bool,
  pub branch: String,
}

/// Result of a fetch + hard-reset + stale file removal.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
  pub commit: String,
  pub branch: String,
  /// Paths present in the previous HEAD but absent from the new one,
  /// removed from the working tree as part of the clean pass.
  pub removed_paths: Vec<String>,
}

/// Truncates a commit hash to its short form. Hashes shorter than
/// the short length are returned unchanged.
pub fn short_commit(hash: &str) -> &str {
  const SHORT_LEN: usize = 12;
  if hash.len() <= SHORT_LEN {
    hash
  } else {
    &hash[..SHORT_LEN]
  }
}

fn ssh_command(ssh_key: &Path) -> String {
  format!(
    "ssh -i {} -o StrictHostKeyChecking=accept-new -o IdentitiesOnly=yes",
    ssh_key.display()
  )
}

async fn git_command(
  args: &str,
  repo_dir: &Path,
  ssh_key: &Path,
) -> command::CommandOutput {
  let lexed = match shlex::split(args) {
    Some(lexed) if !lexed.is_empty() => lexed,
    _ => {
      return command::CommandOutput::from_err(std::io::Error::other(
        "empty git command",
      ));
    }
  };
  let mut cmd = tokio::process::Command::new(&lexed[0]);
  cmd
    .args(&lexed[1..])
    .env("GIT_SSH_COMMAND", ssh_command(ssh_key))
    .kill_on_drop(true)
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::piped());
  match repo_dir.canonicalize() {
    Ok(path) => {
      cmd.current_dir(path);
    }
    Err(e) => return command::CommandOutput::from_err(e),
  }
  command::CommandOutput::from(cmd.output().await)
}

pub fn has_local_checkout(repo_dir: &Path) -> bool {
  repo_dir.join(".git").is_dir()
}

async fn read_head(repo_dir: &Path) -> anyhow::Result<String> {
  let out =
    run_standard_command("git rev-parse HEAD", repo_dir).await;
  if !out.success() {
    return Err(anyhow!("Failed to read HEAD | {}", out.stderr));
  }
  Ok(out.stdout.trim().to_string())
}

async fn read_fetch_head(repo_dir: &Path) -> anyhow::Result<String> {
  let out =
    run_standard_command("git rev-parse FETCH_HEAD", repo_dir).await;
  if !out.success() {
    return Err(anyhow!(
      "Failed to read FETCH_HEAD | {}",
      out.stderr
    ));
  }
  Ok(out.stdout.trim().to_string())
}

async fn run_fetch(
  repo_dir: &Path,
  branch: &str,
  ssh_key: &Path,
  timeout: std::time::Duration,
) -> command::Log {
  let start_ts = command::unix_timestamp_ms();
  let args = format!("git fetch --depth 1 origin {branch}");
  let out = match tokio::time::timeout(
    timeout,
    git_command(&args, repo_dir, ssh_key),
  )
  .await
  {
    Ok(out) => out,
    Err(_) => command::CommandOutput::from_err(std::io::Error::other(
      format!("git fetch timed out after {timeout:?}"),
    )),
  };
  command::output_into_log("Fetch", args, start_ts, out)
}

/// Fetch-only update check. Never modifies the working tree.
///
/// If there is no local checkout yet, returns `has_changes: true` with
/// empty commit hashes instead of erroring (the absent checkout is itself
/// the "change" to converge on).
pub async fn check_remote(
  repo_dir: &Path,
  branch: &str,
  ssh_key: &Path,
  timeout: std::time::Duration,
) -> anyhow::Result<CheckResult> {
  if !has_local_checkout(repo_dir) {
    return Ok(CheckResult {
      current_commit: String::new(),
      remote_commit: String::new(),
      has_changes: true,
      branch: branch.to_string(),
    });
  }

  let current_commit = read_head(repo_dir).await?;

  let log = run_fetch(repo_dir, branch, ssh_key, timeout).await;
  if !log.success {
    return Err(anyhow!("Failed to fetch origin | {}", log.stderr));
  }

  let remote_commit = read_fetch_head(repo_dir).await?;
  let has_changes = current_commit != remote_commit;

  Ok(CheckResult {
    current_commit,
    remote_commit,
    has_changes,
    branch: branch.to_string(),
  })
}

async fn tracked_paths(
  repo_dir: &Path,
) -> anyhow::Result<Vec<String>> {
  let out =
    run_standard_command("git ls-tree -r --name-only HEAD", repo_dir)
      .await;
  if !out.success() {
    return Err(anyhow!(
      "Failed to list tracked paths | {}",
      out.stderr
    ));
  }
  Ok(
    out
      .stdout
      .lines()
      .map(str::to_string)
      .filter(|l| !l.is_empty())
      .collect(),
  )
}

/// Shallow single-branch clone into `repo_dir`, which must not yet exist
/// as a git checkout (it may exist as an empty directory).
async fn clone(
  repo_dir: &Path,
  url: &str,
  branch: &str,
  ssh_key: &Path,
  timeout: std::time::Duration,
) -> anyhow::Result<()> {
  tokio::fs::create_dir_all(repo_dir)
    .await
    .with_context(|| format!("Failed to create {repo_dir:?}"))?;
  let args = format!(
    "git clone --depth 1 --single-branch --branch {branch} {url} ."
  );
  let out = match tokio::time::timeout(
    timeout,
    git_command(&args, repo_dir, ssh_key),
  )
  .await
  {
    Ok(out) => out,
    Err(_) => {
      return Err(anyhow!("git clone timed out after {timeout:?}"));
    }
  };
  if !out.success() {
    return Err(anyhow!("git clone failed | {}", out.stderr_tail(40)));
  }
  Ok(())
}

/// Removes untracked files and directories from the working tree
/// (`git clean -fdx`-equivalent, but without touching ignored build
/// artifacts the deployment itself may have written under `data/`/`logs/`,
/// which live outside the checkout).
async fn remove_untracked(repo_dir: &Path) -> anyhow::Result<()> {
  let out =
    run_standard_command("git clean -fd", repo_dir).await;
  if !out.success() {
    tracing::warn!(
      "git clean reported errors (non-fatal) | {}",
      out.stderr_tail(20)
    );
  }
  Ok(())
}

/// Fetch + hard-reset + (if `clean_enabled`) removal of files tracked at
/// the old HEAD but absent from the new one, followed by an untracked
/// file/directory sweep.
///
/// If there is no local checkout, performs a shallow single-branch clone
/// instead and returns with an empty `removed_paths`.
pub async fn sync_clean(
  repo_dir: &Path,
  url: &str,
  branch: &str,
  ssh_key: &Path,
  clean_enabled: bool,
  timeout: std::time::Duration,
) -> anyhow::Result<SyncResult> {
  if !has_local_checkout(repo_dir) {
    clone(repo_dir, url, branch, ssh_key, timeout).await?;
    let commit = read_head(repo_dir).await?;
    return Ok(SyncResult {
      commit,
      branch: branch.to_string(),
      removed_paths: Vec::new(),
    });
  }

  let before = if clean_enabled {
    tracked_paths(repo_dir).await?
  } else {
    Vec::new()
  };

  let fetch_log = run_fetch(repo_dir, branch, ssh_key, timeout).await;
  if !fetch_log.success {
    return Err(anyhow!(
      "Failed to fetch origin | {}",
      fetch_log.stderr
    ));
  }

  let reset = run_standard_logged_timeout(
    "Reset",
    repo_dir,
    "git reset --hard FETCH_HEAD",
    timeout,
  )
  .await;
  if !reset.success {
    return Err(anyhow!(
      "Failed to reset to FETCH_HEAD | {}",
      reset.stderr
    ));
  }

  let commit = read_head(repo_dir).await?;

  let mut removed_paths = Vec::new();
  if clean_enabled {
    let after: std::collections::HashSet<String> =
      tracked_paths(repo_dir).await?.into_iter().collect();
    for path in before {
      if !after.contains(&path) {
        let full = repo_dir.join(&path);
        match tokio::fs::remove_file(&full).await {
          Ok(()) => removed_paths.push(path),
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
          Err(e) => {
            tracing::warn!(
              "Failed to remove stale file {full:?}: {e:#}"
            );
          }
        }
      }
    }
    remove_untracked(repo_dir).await?;
  }

  Ok(SyncResult {
    commit,
    branch: branch.to_string(),
    removed_paths,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  struct TempDir(PathBuf);

  impl TempDir {
    fn new(tag: &str) -> Self {
      let path = std::env::temp_dir().join(format!(
        "stevedore-git-test-{tag}-{}",
        command::unix_timestamp_ms()
      ));
      std::fs::create_dir_all(&path).unwrap();
      Self(path)
    }
  }

  impl Drop for TempDir {
    fn drop(&mut self) {
      let _ = std::fs::remove_dir_all(&self.0);
    }
  }

  #[test]
  fn short_commit_truncates_long_hash() {
    let hash = "1234567890abcdef1234567890abcdef12345678";
    assert_eq!(short_commit(hash), "1234567890ab");
    assert_eq!(short_commit(hash).len(), 12);
  }

  #[test]
  fn short_commit_passes_through_short_hash() {
    assert_eq!(short_commit("abc123"), "abc123");
  }

  #[tokio::test]
  async fn check_remote_with_no_checkout_reports_changes() {
    let dir = TempDir::new("check-remote");
    let result = check_remote(
      &dir.0,
      "main",
      Path::new("/nonexistent"),
      std::time::Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(result.has_changes);
    assert!(result.current_commit.is_empty());
    assert!(result.remote_commit.is_empty());
  }
}
