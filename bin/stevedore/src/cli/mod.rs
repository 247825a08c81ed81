use clap::{Parser, Subcommand};
use config::Config;

mod deploy;
mod doctor;
mod param;
mod repo;
mod services;
mod shared;
mod token;

/// stevedore -- single-node container orchestrator.
///
/// Pass `-d`/`--daemon` to start the daemon; any subcommand executes a
/// one-shot operation against the on-disk store and exits (§6). The
/// daemon serves the same commands through `POST /api/exec`. Running
/// with neither a subcommand nor `--daemon` is a usage error.
#[derive(Parser, Debug)]
#[command(name = "stevedore", author, about, version)]
pub struct CliArgs {
  #[command(subcommand)]
  pub command: Option<Commands>,

  /// Start the daemon: scheduler loops, admin HTTP API, query socket API.
  #[arg(short, long, global = true)]
  pub daemon: bool,

  /// Overrides `STEVEDORE_ROOT` / the built-in default.
  #[arg(long, global = true)]
  pub root: Option<std::path::PathBuf>,

  /// Overrides the admin HTTP API bind address (daemon mode only).
  #[arg(long, global = true)]
  pub admin_bind_address: Option<String>,

  #[arg(long, global = true)]
  pub log_level: Option<logger::LogLevel>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
  /// Manage tracked Git repositories.
  Repo {
    #[command(subcommand)]
    command: repo::RepoCommand,
  },
  /// Manage per-deployment encrypted parameters.
  Param {
    #[command(subcommand)]
    command: param::ParamCommand,
  },
  /// Trigger sync/up/down against a deployment.
  Deploy {
    #[command(subcommand)]
    command: deploy::DeployCommand,
  },
  /// Show sync/deploy status, for one deployment or all.
  Status { name: Option<String> },
  /// Fetch-only check for upstream changes.
  Check { name: String },
  /// Updates the daemon's own image from its tracked repository.
  SelfUpdate,
  /// Read/write shared YAML namespaces under `root/shared/`.
  Shared {
    #[command(subcommand)]
    command: shared::SharedCommand,
  },
  /// List containers across all managed deployments.
  Services {
    #[command(subcommand)]
    command: services::ServicesCommand,
  },
  /// Manage per-deployment query-socket tokens.
  Token {
    #[command(subcommand)]
    command: token::TokenCommand,
  },
  /// Environment sanity checks.
  Doctor,
  /// Print version and build metadata.
  Version,
}

impl CliArgs {
  pub fn overrides(&self) -> config::Overrides {
    config::Overrides {
      root: self.root.clone(),
      admin_bind_address: self.admin_bind_address.clone(),
      log_level: self.log_level,
    }
  }
}

async fn open_store(config: &Config) -> anyhow::Result<store::Store> {
  let key = store::resolve_key(&config.db_key_path())?;
  store::Store::open(&config.db_path(), &key)
}

/// Runs one CLI command to completion and returns the text that would
/// normally go to stdout. Shared between the direct CLI entrypoint and
/// the admin API's `/api/exec` injected executor, so both surfaces stay
/// behaviorally identical.
pub async fn dispatch(
  config: &'static Config,
  command: Commands,
) -> anyhow::Result<String> {
  let store = open_store(config).await?;
  let layout = crate::layout::Layout::new(config);

  match command {
    Commands::Repo { command } => repo::handle(config, &store, &layout, command).await,
    Commands::Param { command } => param::handle(&store, command).await,
    Commands::Deploy { command } => deploy::handle(config, &store, &layout, command).await,
    Commands::Status { name } => deploy::status(&store, name.as_deref()).await,
    Commands::Check { name } => deploy::check(config, &store, &layout, &name).await,
    Commands::SelfUpdate => crate::self_update::run_once(config, &store).await,
    Commands::Shared { command } => shared::handle(&layout, command).await,
    Commands::Services { command } => services::handle(&store, command).await,
    Commands::Token { command } => token::handle(&store, command).await,
    Commands::Doctor => doctor::run(config, &store).await,
    Commands::Version => Ok(format!("stevedore {} (build {})", config.version, config.build)),
  }
}

/// Builds the `/api/exec` executor: re-parses `argv` (sans program name)
/// as a [Commands] and runs it through [dispatch], capturing success or
/// failure into the `{output, exitCode, error}` shape §4.7 specifies.
pub fn build_executor(config: &'static Config) -> crate::admin_api::Executor {
  std::sync::Arc::new(move |args: Vec<String>| {
    Box::pin(async move {
      let parsed = CliArgs::try_parse_from(
        std::iter::once("stevedore".to_string()).chain(args),
      );
      match parsed {
        Ok(CliArgs { command: Some(command), .. }) => {
          match dispatch(config, command).await {
            Ok(output) => {
              crate::admin_api::ExecOutcome { output, exit_code: 0, error: None }
            }
            Err(e) => crate::admin_api::ExecOutcome {
              output: String::new(),
              exit_code: 1,
              error: Some(format!("{e:#}")),
            },
          }
        }
        Ok(CliArgs { command: None, .. }) => crate::admin_api::ExecOutcome {
          output: String::new(),
          exit_code: 2,
          error: Some("no command given".to_string()),
        },
        Err(e) => crate::admin_api::ExecOutcome {
          output: String::new(),
          exit_code: 2,
          error: Some(e.to_string()),
        },
      }
    })
  })
}
