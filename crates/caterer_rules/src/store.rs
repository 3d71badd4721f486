//! SQLite-backed and in-memory rule storage.

use crate::{RuleDefinition, RuleLookup};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Error type for rule store operations.
#[derive(Debug)]
pub enum RuleStoreError {
    /// Database error.
    Database(rusqlite::Error),
    /// I/O error while preparing the database location.
    Io(std::io::Error),
}

impl std::fmt::Display for RuleStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStoreError::Database(e) => write!(f, "Database error: {}", e),
            RuleStoreError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RuleStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleStoreError::Database(e) => Some(e),
            RuleStoreError::Io(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for RuleStoreError {
    fn from(e: rusqlite::Error) -> Self {
        RuleStoreError::Database(e)
    }
}

impl From<std::io::Error> for RuleStoreError {
    fn from(e: std::io::Error) -> Self {
        RuleStoreError::Io(e)
    }
}

/// SQLite-backed rule storage.
///
/// Thread-safe via internal Mutex. One row per rule name; uploading a rule
/// with an existing name replaces it.
#[derive(Clone)]
pub struct SqliteRuleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRuleStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, RuleStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        info!("Rule store opened at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, RuleStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RuleStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                name TEXT PRIMARY KEY,
                file BLOB NOT NULL,
                n_states INTEGER NOT NULL,
                colors TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Insert a rule, replacing any rule with the same name.
    pub fn upsert(&self, rule: &RuleDefinition) -> Result<(), RuleStoreError> {
        let conn = self.conn.lock().unwrap();
        let now: DateTime<Utc> = Utc::now();
        conn.execute(
            r#"
            INSERT INTO rules (name, file, n_states, colors, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                file = excluded.file,
                n_states = excluded.n_states,
                colors = excluded.colors,
                updated_at = excluded.updated_at
            "#,
            params![
                rule.name,
                rule.file,
                rule.n_states,
                rule.colors,
                now.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Delete a rule. Returns true if it existed.
    pub fn delete(&self, name: &str) -> Result<bool, RuleStoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM rules WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    /// Names of all stored rules, alphabetically.
    pub fn names(&self) -> Result<Vec<String>, RuleStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM rules ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

impl RuleLookup for SqliteRuleStore {
    fn lookup(&self, name: &str) -> Result<Option<RuleDefinition>, RuleStoreError> {
        let conn = self.conn.lock().unwrap();
        let rule = conn
            .query_row(
                "SELECT name, file, n_states, colors FROM rules WHERE name = ?1",
                params![name],
                |row| {
                    Ok(RuleDefinition {
                        name: row.get(0)?,
                        file: row.get(1)?,
                        n_states: row.get(2)?,
                        colors: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(rule)
    }
}

/// Map-backed rule storage.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: Mutex<HashMap<String, RuleDefinition>>,
}

impl InMemoryRuleStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, replacing any rule with the same name.
    pub fn upsert(&self, rule: RuleDefinition) {
        self.rules.lock().unwrap().insert(rule.name.clone(), rule);
    }
}

impl RuleLookup for InMemoryRuleStore {
    fn lookup(&self, name: &str) -> Result<Option<RuleDefinition>, RuleStoreError> {
        Ok(self.rules.lock().unwrap().get(name).cloned())
    }
}
