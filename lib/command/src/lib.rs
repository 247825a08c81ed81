use std::{
  path::{Path, PathBuf},
  process::Stdio,
  sync::OnceLock,
  time::{Duration, SystemTime, UNIX_EPOCH},
};

mod output;

pub use output::*;
use tokio::process::Command;

/// A single pipeline-stage invocation, ready to attach to `sync_status`
/// or surface over the exec API. Mirrors the shape the teacher codebase
/// uses for its `update::Log`, without the broader update-history machinery
/// this project doesn't need.
#[derive(Debug, Clone)]
pub struct Log {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

pub fn unix_timestamp_ms() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as i64
}

/// Commands are run directly, and cannot include '&&'
pub async fn run_standard_logged(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
) -> Log {
  let command = command.into();
  let start_ts = unix_timestamp_ms();
  let output = run_standard_command(&command, path).await;
  output_into_log(stage, command, start_ts, output)
}

/// Commands are wrapped in 'sh -c', and can include '&&'
pub async fn run_shell_logged(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
) -> Log {
  let command = command.into();
  let start_ts = unix_timestamp_ms();
  let output = run_shell_command(&command, path).await;
  output_into_log(stage, command, start_ts, output)
}

/// Same as [run_standard_logged], but aborts (and kills the child) if
/// `timeout` elapses, producing a failed [Log] with a `TimeoutError`-shaped
/// stderr message instead of hanging the worker forever.
pub async fn run_standard_logged_timeout(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
  timeout: Duration,
) -> Log {
  let command = command.into();
  let start_ts = unix_timestamp_ms();
  let path = path.into();
  let output = match tokio::time::timeout(
    timeout,
    run_standard_command(&command, path),
  )
  .await
  {
    Ok(output) => output,
    Err(_) => CommandOutput::from_err(std::io::Error::other(
      format!("Command timed out after {timeout:?}"),
    )),
  };
  output_into_log(stage, command, start_ts, output)
}

/// Timeout-guarded variant of [run_shell_logged].
pub async fn run_shell_logged_timeout(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
  timeout: Duration,
) -> Log {
  let command = command.into();
  let start_ts = unix_timestamp_ms();
  let path = path.into();
  let output = match tokio::time::timeout(
    timeout,
    run_shell_command(&command, path),
  )
  .await
  {
    Ok(output) => output,
    Err(_) => CommandOutput::from_err(std::io::Error::other(
      format!("Command timed out after {timeout:?}"),
    )),
  };
  output_into_log(stage, command, start_ts, output)
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> Log {
  let success = output.success();
  Log {
    stage: stage.to_string(),
    stdout: output.stdout,
    stderr: output.stderr,
    command,
    success,
    start_ts,
    end_ts: unix_timestamp_ms(),
  }
}

/// Commands are run directly, and cannot include '&&'
pub async fn run_standard_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let lexed = if let Some(lexed) = shlex::split(command)
    && !lexed.is_empty()
  {
    lexed
  } else {
    return CommandOutput::from_err(std::io::Error::other(
      "Command lexed into empty args",
    ));
  };

  let mut cmd = Command::new(&lexed[0]);

  cmd
    .args(&lexed[1..])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e),
    }
  }

  CommandOutput::from(cmd.output().await)
}

fn shell() -> &'static str {
  static DEFAULT_SHELL: OnceLock<String> = OnceLock::new();
  DEFAULT_SHELL.get_or_init(|| {
    if PathBuf::from("/bin/bash").exists()
      || PathBuf::from("/usr/bin/bash").exists()
    {
      String::from("bash")
    } else {
      String::from("sh")
    }
  })
}

/// Commands are wrapped in 'sh -c', and can include '&&'
pub async fn run_shell_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let mut cmd = Command::new(shell());

  cmd
    .args(["-c", command])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e),
    }
  }

  CommandOutput::from(cmd.output().await)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn standard_command_runs() {
    let out = run_standard_command("echo hello", None).await;
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "hello");
  }

  #[tokio::test]
  async fn standard_command_rejects_empty() {
    let out = run_standard_command("   ", None).await;
    assert!(!out.success());
  }

  #[tokio::test]
  async fn shell_command_supports_chaining() {
    let out = run_shell_command("echo a && echo b", None).await;
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "a\nb");
  }

  #[tokio::test]
  async fn timeout_kills_long_running_command() {
    let log = run_standard_logged_timeout(
      "Sleep",
      None,
      "sleep 5",
      Duration::from_millis(50),
    )
    .await;
    assert!(!log.success);
    assert!(log.stderr.contains("timed out"));
  }
}
