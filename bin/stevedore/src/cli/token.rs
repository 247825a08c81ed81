use clap::Subcommand;
use store::Store;

#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommand {
  /// Prints a deployment's current query-socket API token, if one has been issued.
  Get { deployment: String },
  /// Regenerates a deployment's query-socket API token, replacing any existing one.
  Regenerate { deployment: String },
  /// Lists every deployment with an issued token.
  List,
}

pub async fn handle(store: &Store, command: TokenCommand) -> anyhow::Result<String> {
  match command {
    TokenCommand::Get { deployment } => get(store, &deployment).await,
    TokenCommand::Regenerate { deployment } => regenerate(store, &deployment).await,
    TokenCommand::List => list(store).await,
  }
}

async fn get(store: &Store, deployment: &str) -> anyhow::Result<String> {
  store
    .get_repository(deployment)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{deployment}'"))?;
  let tokens = store.list_query_tokens().await?;
  match tokens.into_iter().find(|t| t.deployment == deployment) {
    Some(token) => Ok(format!("Query token for '{deployment}': {}", token.token)),
    None => Ok(format!("No query token issued for '{deployment}' yet; run 'token regenerate {deployment}'")),
  }
}

async fn regenerate(store: &Store, deployment: &str) -> anyhow::Result<String> {
  store
    .get_repository(deployment)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no repository registered for '{deployment}'"))?;
  let token = store.regenerate_query_token(deployment).await?;
  Ok(format!("New query token for '{deployment}': {}", token.token))
}

async fn list(store: &Store) -> anyhow::Result<String> {
  let tokens = store.list_query_tokens().await?;
  if tokens.is_empty() {
    return Ok("No query tokens issued.".to_string());
  }
  let mut table = comfy_table::Table::new();
  table.set_header(vec!["DEPLOYMENT", "ISSUED AT"]);
  for token in tokens {
    table.add_row(vec![token.deployment, token.created_at.to_string()]);
  }
  Ok(table.to_string())
}
