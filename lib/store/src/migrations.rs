use rusqlite::Connection;

/// A single forward-only migration. Migrations are never edited once
/// released -- a schema change ships as a new, higher-numbered entry.
pub struct Migration {
  pub version: i64,
  pub description: &'static str,
  pub sql: &'static str,
}

/// Ordered, append-only. `version` must equal the migration's position
/// in this list (1-indexed) -- `apply_pending` asserts that invariant.
pub fn all() -> &'static [Migration] {
  &[
    Migration {
      version: 1,
      description: "initial schema",
      sql: r#"
        CREATE TABLE deployments (
          name        TEXT PRIMARY KEY,
          created_at  INTEGER NOT NULL
        );

        CREATE TABLE repositories (
          deployment            TEXT PRIMARY KEY REFERENCES deployments(name) ON DELETE CASCADE,
          url                   TEXT NOT NULL,
          branch                TEXT NOT NULL,
          poll_interval_seconds INTEGER NOT NULL,
          enabled               INTEGER NOT NULL,
          desired_state         TEXT NOT NULL DEFAULT 'up',
          updated_at            INTEGER NOT NULL
        );

        CREATE TABLE parameters (
          deployment  TEXT NOT NULL REFERENCES deployments(name) ON DELETE CASCADE,
          name        TEXT NOT NULL,
          value       BLOB NOT NULL,
          updated_at  INTEGER NOT NULL,
          PRIMARY KEY (deployment, name)
        );

        CREATE TABLE sync_status (
          deployment      TEXT PRIMARY KEY REFERENCES deployments(name) ON DELETE CASCADE,
          last_commit     TEXT,
          last_sync_at    INTEGER,
          last_deploy_at  INTEGER,
          last_error      TEXT,
          last_error_at   INTEGER
        );

        CREATE TABLE query_tokens (
          deployment  TEXT PRIMARY KEY REFERENCES deployments(name) ON DELETE CASCADE,
          token       TEXT NOT NULL UNIQUE,
          created_at  INTEGER NOT NULL
        );
      "#,
    },
    Migration {
      version: 2,
      description: "desired_state index for reconcile scans",
      sql: r#"
        CREATE INDEX idx_repositories_desired_state
          ON repositories (desired_state, enabled);
      "#,
    },
  ]
}

/// Applies every migration newer than the database's current version,
/// each inside its own transaction, recording it in `schema_migrations`
/// as it commits. Safe to call on every startup: a fully migrated
/// database is a no-op.
pub fn apply_pending(conn: &mut Connection) -> anyhow::Result<()> {
  conn.execute_batch(
    r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
      version     INTEGER PRIMARY KEY,
      description TEXT NOT NULL,
      applied_at  INTEGER NOT NULL
    );
    "#,
  )?;

  let current: i64 = conn.query_row(
    "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
    [],
    |row| row.get(0),
  )?;

  for (i, migration) in all().iter().enumerate() {
    let expected = (i + 1) as i64;
    assert_eq!(
      migration.version, expected,
      "migration list is not densely ordered from 1"
    );
    if migration.version <= current {
      continue;
    }

    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
      "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, strftime('%s', 'now'))",
      rusqlite::params![migration.version, migration.description],
    )?;
    tx.commit()?;

    tracing::info!(
      version = migration.version,
      description = migration.description,
      "applied migration"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn applies_all_migrations_and_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    apply_pending(&mut conn).unwrap();
    apply_pending(&mut conn).unwrap();

    let version: i64 = conn
      .query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(version, all().last().unwrap().version);
  }
}
