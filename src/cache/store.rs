//! SQLite-backed store with corruption recovery.
//!
//! Each entity kind lives in its own database file so a damaged file only
//! costs that kind's cached rows. Opening a store that fails its schema setup
//! or integrity check deletes the file and starts over empty; if even that
//! fails the store is disabled and every operation becomes a no-op.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Schema for record stores (one per entity kind).
const RECORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id);
"#;

/// Schema for the scalar meta store.
const META_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, Copy)]
pub(crate) enum StoreSchema {
  Records,
  Meta,
}

impl StoreSchema {
  fn sql(self) -> &'static str {
    match self {
      Self::Records => RECORD_SCHEMA,
      Self::Meta => META_SCHEMA,
    }
  }
}

/// A single SQLite store. `conn` is `None` when the store is disabled.
pub(crate) struct Store {
  name: String,
  conn: Option<Mutex<Connection>>,
}

impl Store {
  /// Open the store at `path`, recreating it empty if it is unreadable.
  pub fn open(path: &Path, name: &str, schema: StoreSchema) -> Self {
    match Self::try_open(path, schema) {
      Ok(conn) => {
        debug!(store = name, path = %path.display(), "opened local store");
        return Self::with_connection(name, conn);
      }
      Err(e) => {
        warn!(
          store = name,
          path = %path.display(),
          error = %e,
          "local store unreadable, discarding cached data and recreating"
        );
      }
    }

    remove_store_files(path);

    match Self::try_open(path, schema) {
      Ok(conn) => Self::with_connection(name, conn),
      Err(e) => {
        warn!(
          store = name,
          error = %e,
          "failed to recreate local store, running without it"
        );
        Self::disabled(name)
      }
    }
  }

  /// Open a private in-memory store.
  pub fn in_memory(name: &str, schema: StoreSchema) -> Self {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store: {}", e))
      .and_then(|conn| {
        conn
          .execute_batch(schema.sql())
          .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;
        Ok(conn)
      });

    match conn {
      Ok(conn) => Self::with_connection(name, conn),
      Err(e) => {
        warn!(store = name, error = %e, "failed to open in-memory store");
        Self::disabled(name)
      }
    }
  }

  /// A store that ignores writes and answers every read with nothing.
  pub fn disabled(name: &str) -> Self {
    Self {
      name: name.to_string(),
      conn: None,
    }
  }

  fn with_connection(name: &str, conn: Connection) -> Self {
    Self {
      name: name.to_string(),
      conn: Some(Mutex::new(conn)),
    }
  }

  fn try_open(path: &Path, schema: StoreSchema) -> Result<Connection> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    conn
      .execute_batch(schema.sql())
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    let check: String = conn
      .query_row("PRAGMA quick_check", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to run integrity check: {}", e))?;
    if check != "ok" {
      return Err(eyre!("Integrity check failed: {}", check));
    }

    Ok(conn)
  }

  pub fn is_enabled(&self) -> bool {
    self.conn.is_some()
  }

  /// Run `f` against the connection, logging failures and returning
  /// `fallback` instead. Callers never see store errors.
  fn run<R>(&self, op: &str, fallback: R, f: impl FnOnce(&Connection) -> Result<R>) -> R {
    let Some(conn) = &self.conn else {
      return fallback;
    };

    let conn = match conn.lock() {
      Ok(conn) => conn,
      Err(e) => {
        warn!(store = %self.name, op, error = %e, "store lock poisoned");
        return fallback;
      }
    };

    match f(&conn) {
      Ok(value) => value,
      Err(e) => {
        warn!(store = %self.name, op, error = %e, "local store operation failed");
        fallback
      }
    }
  }

  // ==========================================================================
  // Record operations
  // ==========================================================================

  pub fn put(&self, id: &str, owner_id: &str, data: &[u8]) {
    self.run("put", (), |conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO records (id, owner_id, data, cached_at)
           VALUES (?, ?, ?, datetime('now'))",
          params![id, owner_id, data],
        )
        .map_err(|e| eyre!("Failed to store record: {}", e))?;
      Ok(())
    })
  }

  pub fn put_all(&self, rows: &[(String, String, Vec<u8>)]) {
    if rows.is_empty() {
      return;
    }

    self.run("put_all", (), |conn| {
      let tx = conn
        .unchecked_transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      for (id, owner_id, data) in rows {
        tx.execute(
          "INSERT OR REPLACE INTO records (id, owner_id, data, cached_at)
           VALUES (?, ?, ?, datetime('now'))",
          params![id, owner_id, data],
        )
        .map_err(|e| eyre!("Failed to store record: {}", e))?;
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(())
    })
  }

  pub fn get(&self, id: &str) -> Option<Vec<u8>> {
    self.run("get", None, |conn| {
      conn
        .query_row(
          "SELECT data FROM records WHERE id = ?",
          params![id],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read record: {}", e))
    })
  }

  pub fn all(&self) -> Vec<Vec<u8>> {
    self.run("all", Vec::new(), |conn| {
      let mut stmt = conn
        .prepare("SELECT data FROM records ORDER BY rowid")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to query records: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      Ok(rows)
    })
  }

  pub fn by_owner(&self, owner_id: &str) -> Vec<Vec<u8>> {
    self.run("by_owner", Vec::new(), |conn| {
      let mut stmt = conn
        .prepare("SELECT data FROM records WHERE owner_id = ? ORDER BY rowid")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map(params![owner_id], |row| row.get(0))
        .map_err(|e| eyre!("Failed to query records: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      Ok(rows)
    })
  }

  pub fn remove(&self, id: &str) {
    self.run("remove", (), |conn| {
      conn
        .execute("DELETE FROM records WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete record: {}", e))?;
      Ok(())
    })
  }

  pub fn clear(&self) {
    self.run("clear", (), |conn| {
      conn
        .execute("DELETE FROM records", [])
        .map_err(|e| eyre!("Failed to clear records: {}", e))?;
      Ok(())
    })
  }

  // ==========================================================================
  // Meta operations
  // ==========================================================================

  pub fn meta_get(&self, key: &str) -> Option<String> {
    self.run("meta_get", None, |conn| {
      conn
        .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
          row.get(0)
        })
        .optional()
        .map_err(|e| eyre!("Failed to read meta value: {}", e))
    })
  }

  pub fn meta_set(&self, key: &str, value: &str) {
    self.run("meta_set", (), |conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
          params![key, value],
        )
        .map_err(|e| eyre!("Failed to write meta value: {}", e))?;
      Ok(())
    })
  }
}

/// Delete a database file and its journal siblings.
fn remove_store_files(path: &Path) {
  let mut paths = vec![path.to_path_buf()];
  for suffix in ["-wal", "-shm", "-journal"] {
    let mut sibling = path.as_os_str().to_owned();
    sibling.push(suffix);
    paths.push(PathBuf::from(sibling));
  }

  for p in paths {
    if p.exists() {
      if let Err(e) = std::fs::remove_file(&p) {
        warn!(path = %p.display(), error = %e, "failed to remove store file");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_get_remove() {
    let store = Store::in_memory("expense", StoreSchema::Records);
    store.put("a", "u1", b"{\"n\":1}");
    store.put("b", "u2", b"{\"n\":2}");

    assert_eq!(store.get("a").as_deref(), Some(&b"{\"n\":1}"[..]));
    assert_eq!(store.by_owner("u1").len(), 1);
    assert_eq!(store.all().len(), 2);

    store.remove("a");
    assert!(store.get("a").is_none());

    store.clear();
    assert!(store.all().is_empty());
  }

  #[test]
  fn test_garbage_file_is_recreated_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("expense.db");
    std::fs::write(&path, vec![0xAB; 8192]).unwrap();

    let store = Store::open(&path, "expense", StoreSchema::Records);
    assert!(store.is_enabled());
    assert!(store.all().is_empty());

    store.put("a", "u1", b"{}");
    assert_eq!(store.all().len(), 1);
  }

  #[test]
  fn test_disabled_store_is_noop() {
    let store = Store::disabled("expense");
    store.put("a", "u1", b"{}");
    assert!(store.get("a").is_none());
    assert!(store.all().is_empty());
    assert!(store.meta_get("k").is_none());
  }

  #[test]
  fn test_unusable_path_disables_store() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be cannot be opened or removed as a file
    let path = dir.path().join("expense.db");
    std::fs::create_dir_all(path.join("nested")).unwrap();

    let store = Store::open(&path, "expense", StoreSchema::Records);
    assert!(!store.is_enabled());
    assert!(store.all().is_empty());
  }
}
