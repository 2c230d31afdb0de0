//! Request/response contract for battles and battle history.
//!
//! Validates what callers send, runs the battle, persists the outcome on a
//! best-effort basis, and shapes what goes back. HTTP status mapping for
//! every failure lives in [`ApiError`].

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{LimitsConfig, StorageConfig};
use crate::error::{AgentFailureKind, BattleError};
use crate::orchestrator::{BattleOrchestrator, BattleOutcome};
use crate::store::{
    BattleRecord, BattleStore, Cursor, FighterArguments, NewBattleRecord, RecordOutcome,
};

/// Body of `POST /battle`. Missing names deserialize as empty and are
/// rejected by validation, not by the JSON layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BattleRequest {
    #[serde(default)]
    pub character1: String,
    #[serde(default)]
    pub character2: String,
}

impl BattleRequest {
    pub fn new(character1: impl Into<String>, character2: impl Into<String>) -> Self {
        Self {
            character1: character1.into(),
            character2: character2.into(),
        }
    }
}

/// Two names that passed validation, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleNames {
    pub character1: String,
    pub character2: String,
}

/// Check both names: present, non-blank once trimmed, and within bounds.
pub fn validate(request: &BattleRequest, limits: &LimitsConfig) -> Result<BattleNames, BattleError> {
    let check = |field: &str, value: &str| -> Result<String, BattleError> {
        let name = value.trim();
        if name.is_empty() {
            return Err(BattleError::Validation(format!("{field} must not be empty")));
        }
        let len = name.chars().count();
        if len > limits.max_name_length {
            return Err(BattleError::Validation(format!(
                "{field} is {len} characters long; the limit is {}",
                limits.max_name_length
            )));
        }
        Ok(name.to_string())
    };

    Ok(BattleNames {
        character1: check("character1", &request.character1)?,
        character2: check("character2", &request.character2)?,
    })
}

/// Body returned for a completed battle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BattleResponse {
    /// Record id; absent when the battle could not be persisted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Uuid>,
    pub winner: String,
    /// False when the judge called a draw and `winner` is `"undetermined"`.
    pub decided: bool,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// Query string of `GET /battle/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// Cursor of the oldest entry already seen.
    pub before: Option<String>,
}

/// One line of battle history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    /// Pass as `before` to fetch the entries after this one.
    pub cursor: Cursor,
    pub character1: String,
    pub character2: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Set for completed battles; false for a draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AgentFailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<BattleRecord> for HistoryEntry {
    fn from(record: BattleRecord) -> Self {
        let status = record.outcome.status();
        let (winner, decided, reasoning, failure, error) = match record.outcome {
            RecordOutcome::Completed { winner, reasoning } => (
                Some(winner.label().to_string()),
                Some(winner.is_decided()),
                Some(reasoning),
                None,
                None,
            ),
            RecordOutcome::Failed {
                role,
                kind,
                message,
            } => (None, None, None, Some(kind), Some(format!("{role}: {message}"))),
        };
        Self {
            id: record.id,
            cursor: record.cursor,
            character1: record.character1,
            character2: record.character2,
            status,
            winner,
            decided,
            reasoning,
            failure,
            error,
            timestamp: record.created_at,
        }
    }
}

/// Runs battles and serves history for any front end.
pub struct BattleService {
    orchestrator: Arc<BattleOrchestrator>,
    store: Arc<dyn BattleStore>,
    storage: StorageConfig,
    limits: LimitsConfig,
}

impl BattleService {
    pub fn new(
        orchestrator: Arc<BattleOrchestrator>,
        store: Arc<dyn BattleStore>,
        storage: StorageConfig,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            storage,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn BattleStore> {
        &self.store
    }

    /// Validate, fight, and record one battle.
    ///
    /// A storage failure after a successful battle is logged and the verdict
    /// is still returned, without an id.
    pub async fn battle(&self, request: BattleRequest) -> Result<BattleResponse, BattleError> {
        let names = validate(&request, &self.limits)?;

        let outcome = match self
            .orchestrator
            .run_battle(&names.character1, &names.character2)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if self.storage.record_failures {
                    self.record_failure(&names, &err).await;
                }
                return Err(err);
            }
        };

        let timestamp = Utc::now();
        let BattleOutcome {
            verdict,
            argument1,
            argument2,
        } = outcome;
        let response = BattleResponse {
            id: None,
            winner: verdict.winner.label().to_string(),
            decided: verdict.winner.is_decided(),
            reasoning: verdict.reasoning.clone(),
            timestamp,
        };

        let record = NewBattleRecord {
            character1: names.character1,
            character2: names.character2,
            outcome: verdict.into(),
            arguments: self.storage.record_arguments.then_some(FighterArguments {
                argument1,
                argument2,
            }),
            created_at: timestamp,
        };

        match self.store.save(record).await {
            Ok(id) => {
                info!(%id, store = self.store.name(), "Battle record saved");
                Ok(BattleResponse {
                    id: Some(id),
                    ..response
                })
            }
            Err(e) => {
                error!(error = %e, store = self.store.name(), "Failed to save battle record");
                Ok(response)
            }
        }
    }

    async fn record_failure(&self, names: &BattleNames, err: &BattleError) {
        let BattleError::Agent {
            role,
            kind,
            message,
        } = err
        else {
            return;
        };
        let record = NewBattleRecord {
            character1: names.character1.clone(),
            character2: names.character2.clone(),
            outcome: RecordOutcome::Failed {
                role: *role,
                kind: *kind,
                message: message.clone(),
            },
            arguments: None,
            created_at: Utc::now(),
        };
        match self.store.save(record).await {
            Ok(id) => info!(%id, "Failed battle recorded"),
            Err(e) => error!(error = %e, "Failed to record failed battle"),
        }
    }

    /// Most recent battles first, bounded by the configured limits.
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, BattleError> {
        let limit = query
            .limit
            .unwrap_or(self.storage.default_history_limit)
            .clamp(1, self.storage.max_history_limit.max(1));
        let before = query
            .before
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Cursor>)
            .transpose()
            .map_err(|e| BattleError::Validation(e.to_string()))?;

        let records = self.store.list_recent(limit, before).await?;
        Ok(records.into_iter().map(HistoryEntry::from).collect())
    }
}

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BattleError> for ApiError {
    fn from(err: BattleError) -> Self {
        match &err {
            BattleError::Validation(msg) => ApiError::Validation(msg.clone()),
            BattleError::Agent { kind, .. } => match kind {
                AgentFailureKind::Timeout => ApiError::GatewayTimeout(err.to_string()),
                AgentFailureKind::ProviderError | AgentFailureKind::VerdictParseFailure => {
                    ApiError::BadGateway(err.to_string())
                }
            },
            BattleError::Storage(e) => {
                ApiError::ServiceUnavailable(format!("Battle history is unavailable: {e}"))
            }
            BattleError::ConfigError(msg) => ApiError::Internal(msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Internal(msg) => {
                // Don't expose internal errors to clients
                error!(error = %msg, "Internal error");
                "An internal error occurred".to_string()
            }
            other => {
                warn!(status = status.as_u16(), error = %other, "Request failed");
                other.to_string()
            }
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::mock::MockModel;
    use crate::role::AgentRole;
    use crate::store::MemoryStore;

    fn service(model: Arc<MockModel>, store: Arc<MemoryStore>, storage: StorageConfig) -> BattleService {
        let config = default_config();
        BattleService::new(
            Arc::new(BattleOrchestrator::from_config(model, &config)),
            store,
            storage,
            config.limits,
        )
    }

    #[test]
    fn test_validate_trims_names() {
        let names = validate(
            &BattleRequest::new("  Goku ", "\tSuperman\n"),
            &LimitsConfig::default(),
        )
        .unwrap();
        assert_eq!(names.character1, "Goku");
        assert_eq!(names.character2, "Superman");
    }

    #[test]
    fn test_validate_rejects_blank_and_long() {
        let limits = LimitsConfig { max_name_length: 5 };
        assert!(matches!(
            validate(&BattleRequest::new("Goku", "   "), &limits),
            Err(BattleError::Validation(msg)) if msg.contains("character2")
        ));
        assert!(matches!(
            validate(&BattleRequest::new("Superman", "Goku"), &limits),
            Err(BattleError::Validation(msg)) if msg.contains("character1")
        ));
    }

    #[tokio::test]
    async fn test_empty_name_never_reaches_model() {
        let model = Arc::new(MockModel::battle("argument", "Winner: Goku"));
        let store = Arc::new(MemoryStore::new());
        let svc = service(model.clone(), store.clone(), StorageConfig::default());

        let err = svc.battle(BattleRequest::new("Goku", "")).await.unwrap_err();
        assert!(matches!(err, BattleError::Validation(_)));
        assert_eq!(model.call_count(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_battles_get_distinct_ids() {
        let model = Arc::new(MockModel::battle("argument", "Winner: Goku\nReasoning: speed"));
        let store = Arc::new(MemoryStore::new());
        let svc = service(model, store.clone(), StorageConfig::default());

        let first = svc.battle(BattleRequest::new("Goku", "Superman")).await.unwrap();
        let second = svc.battle(BattleRequest::new("Goku", "Superman")).await.unwrap();
        assert!(first.id.is_some());
        assert_ne!(first.id, second.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failures_recorded_only_when_enabled() {
        let model = Arc::new(MockModel::battle("argument", "no verdict here"));
        let store = Arc::new(MemoryStore::new());
        let svc = service(model.clone(), store.clone(), StorageConfig::default());
        assert!(svc.battle(BattleRequest::new("Goku", "Superman")).await.is_err());
        assert!(store.is_empty().await);

        let storage = StorageConfig {
            record_failures: true,
            ..Default::default()
        };
        let svc = service(model, store.clone(), storage);
        assert!(svc.battle(BattleRequest::new("Goku", "Superman")).await.is_err());

        let records = store.list_recent(10, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            records[0].outcome,
            RecordOutcome::Failed {
                role: AgentRole::Judge,
                kind: AgentFailureKind::VerdictParseFailure,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_arguments_recorded_when_enabled() {
        let model = Arc::new(MockModel::battle("a fine argument", "Winner: Goku"));
        let store = Arc::new(MemoryStore::new());
        let storage = StorageConfig {
            record_arguments: true,
            ..Default::default()
        };
        service(model, store.clone(), storage)
            .battle(BattleRequest::new("Goku", "Superman"))
            .await
            .unwrap();

        let records = store.list_recent(1, None).await.unwrap();
        let arguments = records[0].arguments.clone().unwrap();
        assert_eq!(arguments.argument1, "a fine argument");
    }

    #[tokio::test]
    async fn test_history_limit_is_clamped() {
        let model = Arc::new(MockModel::battle("argument", "Winner: Goku"));
        let store = Arc::new(MemoryStore::new());
        let storage = StorageConfig {
            default_history_limit: 2,
            max_history_limit: 3,
            ..Default::default()
        };
        let svc = service(model, store, storage);
        for _ in 0..4 {
            svc.battle(BattleRequest::new("Goku", "Superman")).await.unwrap();
        }

        assert_eq!(svc.history(&HistoryQuery::default()).await.unwrap().len(), 2);
        let query = HistoryQuery {
            limit: Some(50),
            before: None,
        };
        assert_eq!(svc.history(&query).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_pages_with_cursor() {
        let model = Arc::new(MockModel::battle("argument", "Winner: Goku"));
        let svc = service(model, Arc::new(MemoryStore::new()), StorageConfig::default());
        for _ in 0..3 {
            svc.battle(BattleRequest::new("Goku", "Superman")).await.unwrap();
        }

        let first = svc
            .history(&HistoryQuery {
                limit: Some(2),
                before: None,
            })
            .await
            .unwrap();
        let rest = svc
            .history(&HistoryQuery {
                limit: Some(2),
                before: Some(first[1].cursor.to_string()),
            })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].timestamp <= first[1].timestamp);

        let bad = HistoryQuery {
            limit: None,
            before: Some("zzz".to_string()),
        };
        assert!(matches!(
            svc.history(&bad).await,
            Err(BattleError::Validation(_))
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        let timeout = BattleError::Agent {
            role: AgentRole::FighterA,
            kind: AgentFailureKind::Timeout,
            message: "slow".to_string(),
        };
        assert_eq!(ApiError::from(timeout).status(), StatusCode::GATEWAY_TIMEOUT);

        let parse = BattleError::Agent {
            role: AgentRole::Judge,
            kind: AgentFailureKind::VerdictParseFailure,
            message: "no winner".to_string(),
        };
        assert_eq!(ApiError::from(parse).status(), StatusCode::BAD_GATEWAY);

        let invalid = BattleError::Validation("empty".to_string());
        assert_eq!(
            ApiError::from(invalid).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
