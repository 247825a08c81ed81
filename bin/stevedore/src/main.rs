use clap::Parser;

mod active;
mod admin_api;
mod cli;
mod events;
mod layout;
mod query_api;
mod scheduler;
mod self_update;
mod state;

use cli::{CliArgs, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  let args = CliArgs::parse();
  let config = config::init(args.overrides())?;
  logger::init(&config.log)?;

  match (args.daemon, args.command) {
    (true, None) => run_daemon(config).await,
    (false, Some(command)) => run_cli(config, command).await,
    (true, Some(_)) => {
      eprintln!("ERROR: --daemon cannot be combined with a subcommand");
      std::process::exit(2);
    }
    (false, None) => {
      eprintln!("ERROR: pass --daemon to start the daemon, or a subcommand to run a one-shot command");
      std::process::exit(2);
    }
  }
}

async fn run_cli(config: &'static config::Config, command: Commands) -> anyhow::Result<()> {
  match cli::dispatch(config, command).await {
    Ok(output) => {
      if !output.is_empty() {
        println!("{output}");
      }
      Ok(())
    }
    Err(e) => {
      eprintln!("ERROR: {e:#}");
      std::process::exit(1);
    }
  }
}

/// Opens the store, builds the shared daemon state, spawns the poll and
/// reconcile loops plus both API surfaces, and waits for SIGTERM/SIGINT
/// to trigger a graceful shutdown (§4.5, §4.7, §4.8).
async fn run_daemon(config: &'static config::Config) -> anyhow::Result<()> {
  tracing::info!("starting stevedore {} (build {})", config.version, config.build);

  let key = store::resolve_key(&config.db_key_path())?;
  let store = store::Store::open(&config.db_path(), &key)?;
  let state = AppState::new(config, store);

  scheduler::spawn_loops(state.clone());

  let admin_state = state.clone();
  let admin_executor = cli::build_executor(config);
  let admin_handle = tokio::spawn(async move {
    if let Err(e) = admin_api::run(admin_state, admin_executor).await {
      tracing::error!("admin API exited with error | {e:#}");
    }
  });

  let query_state = state.clone();
  let query_handle = tokio::spawn(async move {
    if let Err(e) = query_api::run(query_state).await {
      tracing::error!("query API exited with error | {e:#}");
    }
  });

  wait_for_shutdown_signal().await;
  tracing::info!("shutdown signal received, draining workers");
  state.shutdown.cancel();

  let _ = tokio::join!(admin_handle, query_handle);
  tracing::info!("stevedore stopped");
  Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
  use tokio::signal::unix::{SignalKind, signal};

  let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
  let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

  tokio::select! {
    _ = terminate.recv() => {}
    _ = interrupt.recv() => {}
  }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
}
