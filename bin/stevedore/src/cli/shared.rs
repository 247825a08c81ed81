use clap::Subcommand;

use crate::layout::Layout;

#[derive(Subcommand, Debug, Clone)]
pub enum SharedCommand {
  /// Lists shared YAML namespaces.
  List,
  /// Prints a namespace's YAML content.
  Read { namespace: String },
  /// Replaces a namespace's YAML content from a file (or stdin if `--file` is omitted).
  Write {
    namespace: String,
    #[arg(long)]
    file: Option<std::path::PathBuf>,
  },
}

pub async fn handle(layout: &Layout<'_>, command: SharedCommand) -> anyhow::Result<String> {
  match command {
    SharedCommand::List => list(layout),
    SharedCommand::Read { namespace } => read(layout, &namespace),
    SharedCommand::Write { namespace, file } => write(layout, &namespace, file).await,
  }
}

fn list(layout: &Layout<'_>) -> anyhow::Result<String> {
  let dir = layout.shared_dir();
  if !dir.is_dir() {
    return Ok("No shared namespaces.".to_string());
  }
  let mut names = Vec::new();
  for entry in std::fs::read_dir(&dir)? {
    let entry = entry?;
    if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
      if entry.path().extension().is_some_and(|e| e == "yaml") {
        names.push(name.to_string());
      }
    }
  }
  names.sort();
  if names.is_empty() {
    return Ok("No shared namespaces.".to_string());
  }
  Ok(names.join("\n"))
}

fn read(layout: &Layout<'_>, namespace: &str) -> anyhow::Result<String> {
  stevedore_types::validate_ident("shared namespace", namespace)?;
  let path = layout.shared_namespace_file(namespace);
  std::fs::read_to_string(&path)
    .map_err(|e| anyhow::anyhow!("no shared namespace '{namespace}' ({e})"))
}

async fn write(
  layout: &Layout<'_>,
  namespace: &str,
  file: Option<std::path::PathBuf>,
) -> anyhow::Result<String> {
  stevedore_types::validate_ident("shared namespace", namespace)?;

  let raw = match file {
    Some(path) => tokio::fs::read_to_string(&path).await?,
    None => {
      use tokio::io::AsyncReadExt;
      let mut buf = String::new();
      tokio::io::stdin().read_to_string(&mut buf).await?;
      buf
    }
  };

  // Round-trip through serde_yaml_ng so malformed YAML is rejected
  // before it's written, rather than discovered at Compose deploy time.
  let parsed: serde_yaml_ng::Value = serde_yaml_ng::from_str(&raw)?;
  let normalized = serde_yaml_ng::to_string(&parsed)?;

  let dir = layout.shared_dir();
  std::fs::create_dir_all(&dir)?;
  let path = layout.shared_namespace_file(namespace);
  std::fs::write(&path, normalized)?;

  Ok(format!("Wrote shared namespace '{namespace}'"))
}
