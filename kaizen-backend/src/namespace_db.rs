//! SQLite side-table for namespace records
//!
//! The vector index has no natural home for namespace metadata, so namespace
//! id + creation time live in a small SQLite table. Timestamps are stored as
//! Unix epoch seconds.

use chrono::{DateTime, Utc};
use kaizen_core::{KaizenError, KaizenResult, Namespace};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// A database for resources that can't be generalized across backends.
pub struct NamespaceDb {
    connection: Mutex<Connection>,
}

impl NamespaceDb {
    pub fn open(path: impl AsRef<Path>) -> KaizenResult<Self> {
        let connection = Connection::open(path.as_ref())
            .map_err(|e| KaizenError::store(format!("Failed to open namespace db: {e}")))?;
        Self::with_connection(connection)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> KaizenResult<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|e| KaizenError::store(format!("Failed to open namespace db: {e}")))?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> KaizenResult<Self> {
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS namespaces (
                    id           TEXT PRIMARY KEY,
                    created_at   TIMESTAMP NOT NULL
                )",
                [],
            )
            .map_err(|e| KaizenError::store(format!("Failed to create namespaces table: {e}")))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn create_namespace(&self, namespace_id: &str) -> KaizenResult<Namespace> {
        let created_at = Utc::now();
        let connection = self.connection.lock().unwrap();
        connection
            .execute(
                "INSERT INTO namespaces (id, created_at) VALUES (?1, ?2)",
                params![namespace_id, created_at.timestamp()],
            )
            .map_err(|e| match &e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    KaizenError::NamespaceAlreadyExists(namespace_id.to_string())
                }
                _ => KaizenError::store(format!("Failed to create namespace: {e}")),
            })?;
        Ok(Namespace {
            id: namespace_id.to_string(),
            created_at,
            num_entities: None,
        })
    }

    pub fn get_namespace(&self, namespace_id: &str) -> KaizenResult<Option<Namespace>> {
        let connection = self.connection.lock().unwrap();
        connection
            .query_row(
                "SELECT id, created_at FROM namespaces WHERE id = ?1",
                params![namespace_id],
                |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                },
            )
            .optional()
            .map_err(|e| KaizenError::store(format!("Failed to read namespace: {e}")))
            .map(|row| row.map(|(id, epoch)| namespace_from_row(id, epoch)))
    }

    pub fn search_namespaces(&self, limit: usize) -> KaizenResult<Vec<Namespace>> {
        let connection = self.connection.lock().unwrap();
        let mut statement = connection
            .prepare("SELECT id, created_at FROM namespaces LIMIT ?1")
            .map_err(|e| KaizenError::store(format!("Failed to list namespaces: {e}")))?;
        let rows = statement
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| KaizenError::store(format!("Failed to list namespaces: {e}")))?;

        let mut namespaces = Vec::new();
        for row in rows {
            let (id, epoch) =
                row.map_err(|e| KaizenError::store(format!("Failed to read namespace row: {e}")))?;
            namespaces.push(namespace_from_row(id, epoch));
        }
        Ok(namespaces)
    }

    pub fn delete_namespace(&self, namespace_id: &str) -> KaizenResult<()> {
        let connection = self.connection.lock().unwrap();
        connection
            .execute("DELETE FROM namespaces WHERE id = ?1", params![namespace_id])
            .map_err(|e| KaizenError::store(format!("Failed to delete namespace: {e}")))?;
        Ok(())
    }
}

fn namespace_from_row(id: String, epoch: i64) -> Namespace {
    Namespace {
        id,
        created_at: DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or_else(Utc::now),
        num_entities: None,
    }
}

impl std::fmt::Debug for NamespaceDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceDb").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get_round_trip() {
        let db = NamespaceDb::open_in_memory().unwrap();
        let created = db.create_namespace("demo").unwrap();
        let fetched = db.get_namespace("demo").unwrap().unwrap();
        assert_eq!(fetched.id, "demo");
        assert_eq!(fetched.created_at.timestamp(), created.created_at.timestamp());
    }

    #[test]
    fn duplicate_create_is_already_exists() {
        let db = NamespaceDb::open_in_memory().unwrap();
        db.create_namespace("demo").unwrap();
        let error = db.create_namespace("demo").unwrap_err();
        assert!(matches!(error, KaizenError::NamespaceAlreadyExists(_)));
    }

    #[test]
    fn missing_namespace_reads_as_none() {
        let db = NamespaceDb::open_in_memory().unwrap();
        assert!(db.get_namespace("ghost").unwrap().is_none());
    }

    #[test]
    fn listing_respects_limit() {
        let db = NamespaceDb::open_in_memory().unwrap();
        for i in 0..5 {
            db.create_namespace(&format!("ns{i}")).unwrap();
        }
        assert_eq!(db.search_namespaces(3).unwrap().len(), 3);
        assert_eq!(db.search_namespaces(10).unwrap().len(), 5);
    }

    #[test]
    fn delete_is_idempotent() {
        let db = NamespaceDb::open_in_memory().unwrap();
        db.create_namespace("demo").unwrap();
        db.delete_namespace("demo").unwrap();
        db.delete_namespace("demo").unwrap();
        assert!(db.get_namespace("demo").unwrap().is_none());
    }
}
