//! PowerScaler Core Library
//!
//! Turns two character names into an AI-adjudicated battle verdict:
//! fighter and judge prompts, the orchestration between them, verdict
//! parsing, battle record storage, and the HTTP contract.

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod mock;
pub mod orchestrator;
pub mod role;
pub mod server;
pub mod sqlite;
pub mod store;
pub mod verdict;

pub use api::{BattleRequest, BattleResponse, BattleService, HistoryEntry, HistoryQuery};
pub use config::{AppConfig, Config};
pub use error::{AgentFailureKind, BattleError};
pub use llm::{CompletionOptions, LanguageModel, LlmError, OpenAiCompatibleClient};
pub use mock::MockModel;
pub use orchestrator::{BattleEvent, BattleOrchestrator, BattleOutcome};
pub use role::{AgentRole, RolePrompts};
pub use server::AppState;
pub use store::{BattleRecord, BattleStore, MemoryStore, open_store};
pub use verdict::{Verdict, Winner, parse_verdict};
