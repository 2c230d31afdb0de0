//! Error types for the battle pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{LlmError, LlmErrorKind};
use crate::role::AgentRole;
use crate::store::StorageError;
use crate::verdict::VerdictParseError;

/// Why an agent call did not produce a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailureKind {
    /// The model call exceeded its wait bound.
    Timeout,
    /// Transport, quota, auth or malformed-request failure at the provider.
    ProviderError,
    /// The judge answered but no verdict could be read from it.
    VerdictParseFailure,
}

impl AgentFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentFailureKind::Timeout => "timeout",
            AgentFailureKind::ProviderError => "provider_error",
            AgentFailureKind::VerdictParseFailure => "verdict_parse_failure",
        }
    }
}

#[derive(Error, Debug)]
pub enum BattleError {
    #[error("Invalid battle request: {0}")]
    Validation(String),

    #[error("{role} agent failed ({}): {message}", .kind.as_str())]
    Agent {
        role: AgentRole,
        kind: AgentFailureKind,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BattleError {
    /// Attach the failing role to a client error, keeping its kind.
    pub fn agent(role: AgentRole, err: LlmError) -> Self {
        let kind = match err.kind {
            LlmErrorKind::Timeout => AgentFailureKind::Timeout,
            LlmErrorKind::Provider => AgentFailureKind::ProviderError,
        };
        BattleError::Agent {
            role,
            kind,
            message: err.message,
        }
    }

    pub fn unparseable_verdict(err: VerdictParseError) -> Self {
        BattleError::Agent {
            role: AgentRole::Judge,
            kind: AgentFailureKind::VerdictParseFailure,
            message: err.to_string(),
        }
    }

    /// Kind and role of an agent failure, if this is one.
    pub fn agent_failure(&self) -> Option<(AgentRole, AgentFailureKind)> {
        match self {
            BattleError::Agent { role, kind, .. } => Some((*role, *kind)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_keeps_kind_and_role() {
        let err = BattleError::agent(AgentRole::FighterB, LlmError::timeout(std::time::Duration::from_secs(30)));
        assert_eq!(
            err.agent_failure(),
            Some((AgentRole::FighterB, AgentFailureKind::Timeout))
        );
        assert!(err.to_string().contains("Fighter B"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_provider_message_is_preserved() {
        let err = BattleError::agent(
            AgentRole::FighterA,
            LlmError::provider("quota exceeded for project"),
        );
        match err {
            BattleError::Agent { kind, message, .. } => {
                assert_eq!(kind, AgentFailureKind::ProviderError);
                assert_eq!(message, "quota exceeded for project");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
