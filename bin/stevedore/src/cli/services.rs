use std::collections::HashMap;

use clap::Subcommand;
use store::Store;

#[derive(Subcommand, Debug, Clone)]
pub enum ServicesCommand {
  /// Lists containers across all managed deployments.
  List {
    /// Only show services with ingress enabled.
    #[arg(long)]
    ingress: bool,
  },
}

pub async fn handle(store: &Store, command: ServicesCommand) -> anyhow::Result<String> {
  match command {
    ServicesCommand::List { ingress } => list(store, ingress).await,
  }
}

async fn list(store: &Store, ingress_only: bool) -> anyhow::Result<String> {
  let names = store.list_deployments().await?;
  let mut parameters = HashMap::new();
  for name in &names {
    let params = store.list_parameters(name).await?;
    parameters.insert(
      name.clone(),
      params.into_iter().map(|p| (p.name, p.value)).collect(),
    );
  }

  let mut services = compose::list_services(&parameters).await?;
  if ingress_only {
    services.retain(|s| s.ingress.as_ref().is_some_and(|i| i.enabled));
  }

  if services.is_empty() {
    return Ok("No services found.".to_string());
  }

  let mut table = comfy_table::Table::new();
  table.set_header(vec!["DEPLOYMENT", "SERVICE", "CONTAINER", "RUNNING", "INGRESS"]);
  for service in services {
    let ingress = service
      .ingress
      .as_ref()
      .map(|i| i.subdomain.clone().unwrap_or_else(|| "enabled".to_string()))
      .unwrap_or_else(|| "-".to_string());
    table.add_row(vec![
      service.deployment,
      service.service,
      service.container_name,
      service.running.to_string(),
      ingress,
    ]);
  }
  Ok(table.to_string())
}
