use clap::Subcommand;
use store::Store;

#[derive(Subcommand, Debug, Clone)]
pub enum ParamCommand {
  /// Sets a parameter's raw value for a deployment, from an argument or stdin.
  Set {
    deployment: String,
    name: String,
    value: Option<String>,
    /// Read the value from stdin instead of a positional argument.
    #[arg(long)]
    stdin: bool,
  },
  /// Prints a single parameter's value.
  Get { deployment: String, name: String },
  /// Lists every parameter name set for a deployment (values withheld).
  List { deployment: String },
}

pub async fn handle(store: &Store, command: ParamCommand) -> anyhow::Result<String> {
  match command {
    ParamCommand::Set { deployment, name, value, stdin } => {
      stevedore_types::validate_param_name(&name)?;
      let raw = match (value, stdin) {
        (Some(value), false) => value,
        (None, true) => {
          use tokio::io::AsyncReadExt;
          let mut buf = String::new();
          tokio::io::stdin().read_to_string(&mut buf).await?;
          buf.trim_end_matches('\n').to_string()
        }
        (Some(_), true) => anyhow::bail!("pass either a value argument or --stdin, not both"),
        (None, false) => anyhow::bail!("pass a value argument or --stdin"),
      };
      store.set_parameter(&deployment, &name, raw.into_bytes()).await?;
      Ok(format!("Set {name} for '{deployment}'"))
    }
    ParamCommand::Get { deployment, name } => {
      let param = store
        .get_parameter(&deployment, &name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no parameter '{name}' for '{deployment}'"))?;
      Ok(String::from_utf8_lossy(&param.value).into_owned())
    }
    ParamCommand::List { deployment } => {
      let params = store.list_parameters(&deployment).await?;
      if params.is_empty() {
        return Ok(format!("No parameters set for '{deployment}'."));
      }
      Ok(
        params
          .into_iter()
          .map(|p| p.name)
          .collect::<Vec<_>>()
          .join("\n"),
      )
    }
  }
}
