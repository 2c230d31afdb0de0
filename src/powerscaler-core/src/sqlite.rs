//! SQLite backend for battle records.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::store::{
    BattleRecord, BattleStore, Cursor, FighterArguments, NewBattleRecord, RecordOutcome,
    StorageError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS battles (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT    NOT NULL UNIQUE,
    character1  TEXT    NOT NULL,
    character2  TEXT    NOT NULL,
    status      TEXT    NOT NULL,
    outcome     TEXT    NOT NULL,
    arguments   TEXT,
    created_at  TEXT    NOT NULL
)
"#;

/// SQLite storage backend
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite:battles.db?mode=rwc` or `sqlite::memory:`)
    /// and make sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .pragma("busy_timeout", "30000");
        if !in_memory {
            options = options.pragma("journal_mode", "WAL");
        }

        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Query(format!("Schema setup failed: {}", e)))?;

        info!(url = %url, "Connected to SQLite battle store");
        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_row(row: &SqliteRow) -> Result<BattleRecord, StorageError> {
    let query_err = |e: sqlx::Error| StorageError::Query(e.to_string());

    let seq: i64 = row.try_get("seq").map_err(query_err)?;
    let id: String = row.try_get("id").map_err(query_err)?;
    let outcome: String = row.try_get("outcome").map_err(query_err)?;
    let arguments: Option<String> = row.try_get("arguments").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    let corrupt = |reason: String| StorageError::Corrupt {
        id: id.clone(),
        reason,
    };

    let outcome: RecordOutcome =
        serde_json::from_str(&outcome).map_err(|e| corrupt(format!("outcome: {e}")))?;
    let arguments: Option<FighterArguments> = arguments
        .map(|a| serde_json::from_str(&a))
        .transpose()
        .map_err(|e| corrupt(format!("arguments: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| corrupt(format!("created_at: {e}")))?
        .with_timezone(&Utc);
    let parsed_id = Uuid::parse_str(&id).map_err(|e| corrupt(format!("id: {e}")))?;

    Ok(BattleRecord {
        id: parsed_id,
        cursor: Cursor::from_seq(seq),
        character1: row.try_get("character1").map_err(query_err)?,
        character2: row.try_get("character2").map_err(query_err)?,
        outcome,
        arguments,
        created_at,
    })
}

#[async_trait]
impl BattleStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn save(&self, record: NewBattleRecord) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let status = record.outcome.status();
        let outcome = serde_json::to_string(&record.outcome)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let arguments = record
            .arguments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO battles (id, character1, character2, status, outcome, arguments, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(record.character1)
        .bind(record.character2)
        .bind(status)
        .bind(outcome)
        .bind(arguments)
        .bind(record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(id)
    }

    async fn list_recent(
        &self,
        limit: u32,
        before: Option<Cursor>,
    ) -> Result<Vec<BattleRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT seq, id, character1, character2, outcome, arguments, created_at \
             FROM battles WHERE seq < ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(before.map(|c| c.seq()).unwrap_or(i64::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{completed, exercise_store};

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_timestamp_survives_storage() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let record = completed("Goku", "Superman", "Superman");
        let created_at = record.created_at;
        store.save(record).await.unwrap();

        let saved = store.list_recent(1, None).await.unwrap();
        let drift = (saved[0].created_at - created_at).num_microseconds().unwrap_or(i64::MAX);
        assert!(drift.abs() <= 1);
    }

    #[tokio::test]
    async fn test_corrupt_outcome_is_reported() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO battles (id, character1, character2, status, outcome, created_at) \
             VALUES ('00000000-0000-0000-0000-000000000001', 'A', 'B', 'completed', 'not json', '2024-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.list_recent(1, None).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
