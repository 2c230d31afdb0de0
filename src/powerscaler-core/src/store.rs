//! Battle record storage.
//!
//! Records are append-only: `save` never updates or deduplicates, and every
//! record gets a fresh id and the next position in creation order.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::AgentFailureKind;
use crate::role::AgentRole;
use crate::sqlite::SqliteStore;
use crate::verdict::{Verdict, Winner};

/// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Position of a record in creation order, handed out as an opaque token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(i64);

impl Cursor {
    pub(crate) fn from_seq(seq: i64) -> Self {
        Self(seq)
    }

    pub(crate) fn seq(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("invalid history cursor '{0}'")]
pub struct InvalidCursor(pub String);

impl FromStr for Cursor {
    type Err = InvalidCursor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match i64::from_str_radix(s.trim(), 16) {
            Ok(seq) if seq > 0 => Ok(Self(seq)),
            _ => Err(InvalidCursor(s.to_string())),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How a battle attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed {
        winner: Winner,
        reasoning: String,
    },
    Failed {
        role: AgentRole,
        kind: AgentFailureKind,
        message: String,
    },
}

impl RecordOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RecordOutcome::Completed { .. } => "completed",
            RecordOutcome::Failed { .. } => "failed",
        }
    }
}

impl From<Verdict> for RecordOutcome {
    fn from(verdict: Verdict) -> Self {
        RecordOutcome::Completed {
            winner: verdict.winner,
            reasoning: verdict.reasoning,
        }
    }
}

/// The fighters' raw arguments, kept only when configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterArguments {
    pub argument1: String,
    pub argument2: String,
}

/// A record as handed to the store, before it has an id.
#[derive(Debug, Clone)]
pub struct NewBattleRecord {
    pub character1: String,
    pub character2: String,
    pub outcome: RecordOutcome,
    pub arguments: Option<FighterArguments>,
    pub created_at: DateTime<Utc>,
}

/// A persisted battle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleRecord {
    pub id: Uuid,
    pub cursor: Cursor,
    pub character1: String,
    pub character2: String,
    pub outcome: RecordOutcome,
    pub arguments: Option<FighterArguments>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BattleStore: Send + Sync + fmt::Debug {
    /// Backend name, for logs and health output.
    fn name(&self) -> &str;

    async fn is_healthy(&self) -> bool;

    /// Append a record and return its new id.
    async fn save(&self, record: NewBattleRecord) -> Result<Uuid, StorageError>;

    /// Up to `limit` records, newest first, strictly older than `before`.
    async fn list_recent(
        &self,
        limit: u32,
        before: Option<Cursor>,
    ) -> Result<Vec<BattleRecord>, StorageError>;
}

/// Open the store named by `config.url`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn BattleStore>, StorageError> {
    if config.url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::connect(&config.url).await?))
}

/// In-memory store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<BattleRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl BattleStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn save(&self, record: NewBattleRecord) -> Result<Uuid, StorageError> {
        let mut records = self.records.write().await;
        let id = Uuid::new_v4();
        let seq = records.len() as i64 + 1;
        records.push(BattleRecord {
            id,
            cursor: Cursor::from_seq(seq),
            character1: record.character1,
            character2: record.character2,
            outcome: record.outcome,
            arguments: record.arguments,
            created_at: record.created_at,
        });
        Ok(id)
    }

    async fn list_recent(
        &self,
        limit: u32,
        before: Option<Cursor>,
    ) -> Result<Vec<BattleRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| before.is_none_or(|b| r.cursor < b))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
