use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use stevedore_types::{
  DesiredState, Parameter, QueryToken, Repository, SyncStatus,
  unix_timestamp,
};

mod migrations;

/// Resolves the SQLCipher key, in order: `STEVEDORE_DB_KEY` env var, the
/// file named by `STEVEDORE_DB_KEY_FILE`, or `default_path`. The first
/// source present wins; if none is present this is an error, never a
/// silently-generated key.
pub fn resolve_key(default_path: &Path) -> anyhow::Result<String> {
  if let Ok(key) = std::env::var("STEVEDORE_DB_KEY") {
    if !key.is_empty() {
      return Ok(key);
    }
  }

  if let Ok(path) = std::env::var("STEVEDORE_DB_KEY_FILE") {
    return std::fs::read_to_string(&path)
      .map(|s| s.trim().to_string())
      .with_context(|| format!("failed to read db key file {path}"));
  }

  std::fs::read_to_string(default_path)
    .map(|s| s.trim().to_string())
    .with_context(|| {
      format!(
        "no STEVEDORE_DB_KEY, no STEVEDORE_DB_KEY_FILE, and default key file {} does not exist",
        default_path.display()
      )
    })
}

/// Handle onto the encrypted store. Holds a single connection behind a
/// std mutex -- per §4.1 the write path is serialized, and rusqlite's
/// blocking calls are dispatched through `spawn_blocking` so the async
/// reconcile/API tasks never stall the runtime on disk I/O.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
}

impl Store {
  /// Opens (creating if absent) the database at `db_path`, keys it,
  /// applies connection pragmas, and runs pending migrations.
  pub fn open(db_path: &Path, key: &str) -> anyhow::Result<Self> {
    if let Some(parent) = db_path.parent() {
      std::fs::create_dir_all(parent).with_context(|| {
        format!("failed to create store directory {}", parent.display())
      })?;
    }

    let mut conn = Connection::open(db_path).with_context(|| {
      format!("failed to open store at {}", db_path.display())
    })?;

    conn.pragma_update(None, "key", key).context("failed to set store key")?;
    conn
      .pragma_update(None, "journal_mode", "WAL")
      .context("failed to enable WAL mode")?;
    conn
      .pragma_update(None, "busy_timeout", 5000)
      .context("failed to set busy_timeout")?;
    conn
      .pragma_update(None, "foreign_keys", "ON")
      .context("failed to enable foreign keys")?;

    // Touching the schema confirms the key is correct -- SQLCipher
    // returns "file is not a database" on the first real query if it
    // isn't, rather than failing at open time.
    conn
      .query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
      })
      .context("failed to read schema; wrong key or corrupt store")?;

    migrations::apply_pending(&mut conn)
      .context("failed to apply pending migrations")?;

    Ok(Self { conn: Arc::new(Mutex::new(conn)) })
  }

  /// Opens an in-memory, unencrypted store. Only used by tests of
  /// callers that take a `Store`; never reachable from the daemon.
  #[doc(hidden)]
  pub fn open_in_memory_for_tests() -> anyhow::Result<Self> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::apply_pending(&mut conn)?;
    Ok(Self { conn: Arc::new(Mutex::new(conn)) })
  }

  async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
  {
    let conn = self.conn.clone();
    tokio::task::spawn_blocking(move || {
      let conn = conn.lock().expect("store connection mutex poisoned");
      f(&conn)
    })
    .await
    .context("store task panicked")?
  }

  /// Upserts the deployment row. The canonical way to bring a
  /// deployment and its dependent rows into existence.
  pub async fn ensure_deployment(
    &self,
    name: &str,
  ) -> anyhow::Result<()> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO deployments (name, created_at) VALUES (?1, ?2)
           ON CONFLICT (name) DO NOTHING",
          params![name, unix_timestamp()],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn list_deployments(&self) -> anyhow::Result<Vec<String>> {
    self
      .with_conn(|conn| {
        let mut stmt =
          conn.prepare("SELECT name FROM deployments ORDER BY name")?;
        let names = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
      })
      .await
  }

  pub async fn remove_deployment(
    &self,
    name: &str,
  ) -> anyhow::Result<()> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn.execute("DELETE FROM deployments WHERE name = ?1", params![name])?;
        Ok(())
      })
      .await
  }

  pub async fn put_repository(
    &self,
    repo: Repository,
  ) -> anyhow::Result<()> {
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO repositories
             (deployment, url, branch, poll_interval_seconds, enabled, desired_state, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (deployment) DO UPDATE SET
             url = excluded.url,
             branch = excluded.branch,
             poll_interval_seconds = excluded.poll_interval_seconds,
             enabled = excluded.enabled,
             desired_state = excluded.desired_state,
             updated_at = excluded.updated_at",
          params![
            repo.deployment,
            repo.url,
            repo.branch,
            repo.poll_interval_seconds,
            repo.enabled,
            repo.desired_state.as_str(),
            repo.updated_at,
          ],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn get_repository(
    &self,
    deployment: &str,
  ) -> anyhow::Result<Option<Repository>> {
    let deployment = deployment.to_string();
    self
      .with_conn(move |conn| {
        conn
          .query_row(
            "SELECT deployment, url, branch, poll_interval_seconds, enabled, desired_state, updated_at
             FROM repositories WHERE deployment = ?1",
            params![deployment],
            row_to_repository,
          )
          .optional()
          .map_err(Into::into)
      })
      .await
  }

  /// All enabled repositories whose desired state is `up` -- the set
  /// the poll loop iterates every tick.
  pub async fn list_active_repositories(
    &self,
  ) -> anyhow::Result<Vec<Repository>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT deployment, url, branch, poll_interval_seconds, enabled, desired_state, updated_at
           FROM repositories WHERE enabled = 1 AND desired_state = 'up'",
        )?;
        let rows = stmt
          .query_map([], row_to_repository)?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await
  }

  pub async fn set_desired_state(
    &self,
    deployment: &str,
    state: DesiredState,
  ) -> anyhow::Result<()> {
    let deployment = deployment.to_string();
    self
      .with_conn(move |conn| {
        let updated = conn.execute(
          "UPDATE repositories SET desired_state = ?1, updated_at = ?2 WHERE deployment = ?3",
          params![state.as_str(), unix_timestamp(), deployment],
        )?;
        if updated == 0 {
          return Err(anyhow!("no repository configured for '{deployment}'"));
        }
        Ok(())
      })
      .await
  }

  pub async fn set_parameter(
    &self,
    deployment: &str,
    name: &str,
    value: Vec<u8>,
  ) -> anyhow::Result<()> {
    let deployment = deployment.to_string();
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO parameters (deployment, name, value, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (deployment, name) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
          params![deployment, name, value, unix_timestamp()],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn get_parameter(
    &self,
    deployment: &str,
    name: &str,
  ) -> anyhow::Result<Option<Parameter>> {
    let deployment = deployment.to_string();
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn
          .query_row(
            "SELECT deployment, name, value, updated_at FROM parameters
             WHERE deployment = ?1 AND name = ?2",
            params![deployment, name],
            row_to_parameter,
          )
          .optional()
          .map_err(Into::into)
      })
      .await
  }

  pub async fn list_parameters(
    &self,
    deployment: &str,
  ) -> anyhow::Result<Vec<Parameter>> {
    let deployment = deployment.to_string();
    self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT deployment, name, value, updated_at FROM parameters
           WHERE deployment = ?1 ORDER BY name",
        )?;
        let rows = stmt
          .query_map(params![deployment], row_to_parameter)?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await
  }

  /// Records a successful sync, clearing any previous error per §3's
  /// "successful sync clears `last_error*`" invariant.
  pub async fn record_sync_success(
    &self,
    deployment: &str,
    commit: &str,
  ) -> anyhow::Result<()> {
    let deployment = deployment.to_string();
    let commit = commit.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO sync_status (deployment, last_commit, last_sync_at, last_error, last_error_at)
           VALUES (?1, ?2, ?3, NULL, NULL)
           ON CONFLICT (deployment) DO UPDATE SET
             last_commit = excluded.last_commit,
             last_sync_at = excluded.last_sync_at,
             last_error = NULL,
             last_error_at = NULL",
          params![deployment, commit, unix_timestamp()],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn record_deploy(&self, deployment: &str) -> anyhow::Result<()> {
    let deployment = deployment.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO sync_status (deployment, last_deploy_at)
           VALUES (?1, ?2)
           ON CONFLICT (deployment) DO UPDATE SET last_deploy_at = excluded.last_deploy_at",
          params![deployment, unix_timestamp()],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn record_error(
    &self,
    deployment: &str,
    error: &str,
  ) -> anyhow::Result<()> {
    let deployment = deployment.to_string();
    let error = error.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO sync_status (deployment, last_error, last_error_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (deployment) DO UPDATE SET
             last_error = excluded.last_error,
             last_error_at = excluded.last_error_at",
          params![deployment, error, unix_timestamp()],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn get_sync_status(
    &self,
    deployment: &str,
  ) -> anyhow::Result<SyncStatus> {
    let deployment = deployment.to_string();
    self
      .with_conn(move |conn| {
        let found = conn
          .query_row(
            "SELECT deployment, last_commit, last_sync_at, last_deploy_at, last_error, last_error_at
             FROM sync_status WHERE deployment = ?1",
            params![deployment],
            row_to_sync_status,
          )
          .optional()?;
        Ok(found.unwrap_or(SyncStatus {
          deployment: deployment.clone(),
          ..Default::default()
        }))
      })
      .await
  }

  /// Generates and stores a fresh 32-random-byte hex token, replacing
  /// any existing one for the deployment.
  pub async fn regenerate_query_token(
    &self,
    deployment: &str,
  ) -> anyhow::Result<QueryToken> {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);

    let deployment = deployment.to_string();
    let created_at = unix_timestamp();
    let stored = token.clone();
    self
      .with_conn({
        let deployment = deployment.clone();
        move |conn| {
          conn.execute(
            "INSERT INTO query_tokens (deployment, token, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (deployment) DO UPDATE SET
               token = excluded.token,
               created_at = excluded.created_at",
            params![deployment, stored, created_at],
          )?;
          Ok(())
        }
      })
      .await?;

    Ok(QueryToken { deployment, token, created_at })
  }

  pub async fn list_query_tokens(&self) -> anyhow::Result<Vec<QueryToken>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT deployment, token, created_at FROM query_tokens ORDER BY deployment",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(QueryToken {
              deployment: row.get(0)?,
              token: row.get(1)?,
              created_at: row.get(2)?,
            })
          })?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await
  }

  /// Resolves which deployment a query token authenticates, if any.
  pub async fn deployment_for_token(
    &self,
    token: &str,
  ) -> anyhow::Result<Option<String>> {
    let token = token.to_string();
    self
      .with_conn(move |conn| {
        conn
          .query_row(
            "SELECT deployment FROM query_tokens WHERE token = ?1",
            params![token],
            |row| row.get(0),
          )
          .optional()
          .map_err(Into::into)
      })
      .await
  }
}

fn row_to_repository(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
  let desired_state: String = row.get(5)?;
  Ok(Repository {
    deployment: row.get(0)?,
    url: row.get(1)?,
    branch: row.get(2)?,
    poll_interval_seconds: row.get(3)?,
    enabled: row.get(4)?,
    desired_state: DesiredState::from_str_lenient(&desired_state),
    updated_at: row.get(6)?,
  })
}

fn row_to_parameter(row: &rusqlite::Row) -> rusqlite::Result<Parameter> {
  Ok(Parameter {
    deployment: row.get(0)?,
    name: row.get(1)?,
    value: row.get(2)?,
    updated_at: row.get(3)?,
  })
}

fn row_to_sync_status(row: &rusqlite::Row) -> rusqlite::Result<SyncStatus> {
  Ok(SyncStatus {
    deployment: row.get(0)?,
    last_commit: row.get(1)?,
    last_sync_at: row.get(2)?,
    last_deploy_at: row.get(3)?,
    last_error: row.get(4)?,
    last_error_at: row.get(5)?,
  })
}

pub fn default_key_path(root: &Path) -> PathBuf {
  root.join("system").join("db.key")
}

pub fn default_db_path(root: &Path) -> PathBuf {
  root.join("system").join("stevedore.db")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn ensure_deployment_is_idempotent() {
    let store = Store::open_in_memory_for_tests().unwrap();
    store.ensure_deployment("app1").await.unwrap();
    store.ensure_deployment("app1").await.unwrap();
    assert_eq!(store.list_deployments().await.unwrap(), vec!["app1"]);
  }

  #[tokio::test]
  async fn repository_upsert_round_trips() {
    let store = Store::open_in_memory_for_tests().unwrap();
    store.ensure_deployment("app1").await.unwrap();
    store
      .put_repository(Repository {
        deployment: "app1".into(),
        url: "git@example.com:app1.git".into(),
        branch: "main".into(),
        poll_interval_seconds: 300,
        enabled: true,
        desired_state: DesiredState::Up,
        updated_at: unix_timestamp(),
      })
      .await
      .unwrap();

    let fetched = store.get_repository("app1").await.unwrap().unwrap();
    assert_eq!(fetched.branch, "main");
    assert_eq!(fetched.desired_state, DesiredState::Up);
  }

  #[tokio::test]
  async fn sync_success_clears_prior_error() {
    let store = Store::open_in_memory_for_tests().unwrap();
    store.ensure_deployment("app1").await.unwrap();
    store.record_error("app1", "boom").await.unwrap();
    store.record_sync_success("app1", "deadbeef").await.unwrap();

    let status = store.get_sync_status("app1").await.unwrap();
    assert_eq!(status.last_commit.as_deref(), Some("deadbeef"));
    assert!(status.last_error.is_none());
  }

  #[tokio::test]
  async fn parameter_values_round_trip_as_opaque_bytes() {
    let store = Store::open_in_memory_for_tests().unwrap();
    store.ensure_deployment("app1").await.unwrap();
    store
      .set_parameter("app1", "DATABASE_URL", b"postgres://x".to_vec())
      .await
      .unwrap();

    let param = store.get_parameter("app1", "DATABASE_URL").await.unwrap().unwrap();
    assert_eq!(param.value, b"postgres://x");
  }

  #[tokio::test]
  async fn query_token_round_trips_to_deployment() {
    let store = Store::open_in_memory_for_tests().unwrap();
    store.ensure_deployment("app1").await.unwrap();
    let token = store.regenerate_query_token("app1").await.unwrap();
    assert_eq!(token.token.len(), 64);

    let resolved = store.deployment_for_token(&token.token).await.unwrap();
    assert_eq!(resolved.as_deref(), Some("app1"));
  }

  #[test]
  fn resolve_key_prefers_env_var_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let key_file = dir.path().join("db.key");
    std::fs::write(&key_file, "file-key\n").unwrap();

    unsafe {
      std::env::set_var("STEVEDORE_DB_KEY", "env-key");
    }
    let key = resolve_key(&key_file).unwrap();
    unsafe {
      std::env::remove_var("STEVEDORE_DB_KEY");
    }
    assert_eq!(key, "env-key");
  }

  #[test]
  fn resolve_key_falls_back_to_default_file() {
    let dir = tempfile::tempdir().unwrap();
    let key_file = dir.path().join("db.key");
    std::fs::write(&key_file, "default-key\n").unwrap();

    unsafe {
      std::env::remove_var("STEVEDORE_DB_KEY");
      std::env::remove_var("STEVEDORE_DB_KEY_FILE");
    }
    assert_eq!(resolve_key(&key_file).unwrap(), "default-key");
  }

  #[test]
  fn open_on_disk_store_applies_migrations_and_is_reopenable() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stevedore.db");

    {
      let _store = Store::open(&db_path, "test-key").unwrap();
    }
    // Reopening with the same key and an already-migrated schema is a no-op.
    let _store = Store::open(&db_path, "test-key").unwrap();
  }
}
