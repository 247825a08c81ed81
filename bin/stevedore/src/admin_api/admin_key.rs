use std::path::Path;

use anyhow::Context;
use rand::RngCore;

use crate::layout::set_private_file_permissions;

/// Resolves the admin API bearer key, in order: `STEVEDORE_ADMIN_KEY`,
/// the file named by `STEVEDORE_ADMIN_KEY_FILE`, or `default_path`. If
/// none of those are present, a fresh random key is generated and
/// persisted to `default_path` (mirrors `store::resolve_key`, except a
/// missing admin key is self-healing rather than fatal -- there is no
/// existing ciphertext whose key would otherwise be lost).
pub fn resolve_or_generate(default_path: &Path) -> anyhow::Result<String> {
  if let Ok(key) = std::env::var("STEVEDORE_ADMIN_KEY") {
    if !key.is_empty() {
      return Ok(key);
    }
  }

  if let Ok(path) = std::env::var("STEVEDORE_ADMIN_KEY_FILE") {
    return std::fs::read_to_string(&path)
      .map(|s| s.trim().to_string())
      .with_context(|| format!("failed to read admin key file {path}"));
  }

  if let Ok(existing) = std::fs::read_to_string(default_path) {
    return Ok(existing.trim().to_string());
  }

  let mut bytes = [0u8; 32];
  rand::rng().fill_bytes(&mut bytes);
  let key = hex::encode(bytes);

  if let Some(parent) = default_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  std::fs::write(default_path, &key)
    .with_context(|| format!("failed to write {}", default_path.display()))?;
  set_private_file_permissions(default_path)?;

  Ok(key)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generates_and_persists_a_key_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("admin.key");
    unsafe {
      std::env::remove_var("STEVEDORE_ADMIN_KEY");
      std::env::remove_var("STEVEDORE_ADMIN_KEY_FILE");
    }

    let first = resolve_or_generate(&key_path).unwrap();
    assert!(key_path.exists());
    let second = resolve_or_generate(&key_path).unwrap();
    assert_eq!(first, second);
  }
}
