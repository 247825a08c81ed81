use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;

/// Both deployment names and parameter names share this shape:
/// alphanumeric, leading with an alphanumeric character, with `.`, `_`,
/// `-` allowed afterwards.
fn ident_regex() -> &'static Regex {
  static REGEX: OnceLock<Regex> = OnceLock::new();
  REGEX.get_or_init(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$")
      .expect("Failed to compile ident regex")
  })
}

pub fn validate_ident(kind: &str, input: &str) -> anyhow::Result<()> {
  if input.is_empty() {
    return Err(anyhow!("{kind} cannot be empty"));
  }
  if !ident_regex().is_match(input) {
    return Err(anyhow!(
      "{kind} '{input}' is invalid: must match ^[A-Za-z0-9][A-Za-z0-9._-]*$"
    ));
  }
  Ok(())
}

pub fn validate_deployment_name(name: &str) -> anyhow::Result<()> {
  validate_ident("deployment name", name)
}

pub fn validate_param_name(name: &str) -> anyhow::Result<()> {
  validate_ident("parameter name", name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_valid_names() {
    assert!(validate_deployment_name("app1").is_ok());
    assert!(validate_deployment_name("My-App.2").is_ok());
    assert!(validate_param_name("DATABASE_URL").is_ok());
  }

  #[test]
  fn rejects_leading_punctuation() {
    assert!(validate_deployment_name("-app").is_err());
    assert!(validate_deployment_name(".app").is_err());
  }

  #[test]
  fn rejects_empty_and_bad_chars() {
    assert!(validate_deployment_name("").is_err());
    assert!(validate_deployment_name("app name").is_err());
    assert!(validate_deployment_name("app/name").is_err());
  }
}
