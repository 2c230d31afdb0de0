//! Agent roles and their prompt rendering.
//!
//! Rendering is pure: the same inputs always give the same prompt.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::PromptsConfig;

/// Role of an agent in a battle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Argues for the first character.
    FighterA,
    /// Argues for the second character.
    FighterB,
    /// Weighs both arguments and names a winner.
    Judge,
}

impl AgentRole {
    pub fn display_name(&self) -> &str {
        match self {
            AgentRole::FighterA => "Fighter A",
            AgentRole::FighterB => "Fighter B",
            AgentRole::Judge => "Judge",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One role together with what it needs to know to write its prompt.
#[derive(Debug, Clone, Copy)]
pub enum RoleContext<'a> {
    /// Argues for `character1`.
    FighterA {
        character1: &'a str,
        character2: &'a str,
    },
    /// Argues for `character2`.
    FighterB {
        character1: &'a str,
        character2: &'a str,
    },
    Judge {
        character1: &'a str,
        character2: &'a str,
        argument1: &'a str,
        argument2: &'a str,
    },
}

impl RoleContext<'_> {
    pub fn role(&self) -> AgentRole {
        match self {
            RoleContext::FighterA { .. } => AgentRole::FighterA,
            RoleContext::FighterB { .. } => AgentRole::FighterB,
            RoleContext::Judge { .. } => AgentRole::Judge,
        }
    }
}

/// The prompt templates for all three roles.
#[derive(Debug, Clone)]
pub struct RolePrompts {
    fighter: String,
    judge: String,
}

impl RolePrompts {
    pub fn new(fighter: impl Into<String>, judge: impl Into<String>) -> Self {
        Self {
            fighter: fighter.into(),
            judge: judge.into(),
        }
    }

    pub fn from_config(prompts: &PromptsConfig) -> Self {
        Self::new(prompts.fighter.clone(), prompts.judge.clone())
    }

    /// Render the prompt for the role in `context`.
    pub fn render(&self, context: RoleContext<'_>) -> String {
        match context {
            RoleContext::FighterA {
                character1,
                character2,
            } => fill(
                &self.fighter,
                &[("character", character1), ("opponent", character2)],
            ),
            RoleContext::FighterB {
                character1,
                character2,
            } => fill(
                &self.fighter,
                &[("character", character2), ("opponent", character1)],
            ),
            RoleContext::Judge {
                character1,
                character2,
                argument1,
                argument2,
            } => fill(
                &self.judge,
                &[
                    ("character1", character1),
                    ("character2", character2),
                    ("argument1", argument1),
                    ("argument2", argument2),
                ],
            ),
        }
    }

    pub fn fighter_a(&self, character1: &str, character2: &str) -> String {
        self.render(RoleContext::FighterA {
            character1,
            character2,
        })
    }

    pub fn fighter_b(&self, character1: &str, character2: &str) -> String {
        self.render(RoleContext::FighterB {
            character1,
            character2,
        })
    }

    pub fn judge(
        &self,
        character1: &str,
        character2: &str,
        argument1: &str,
        argument2: &str,
    ) -> String {
        self.render(RoleContext::Judge {
            character1,
            character2,
            argument1,
            argument2,
        })
    }
}

impl Default for RolePrompts {
    fn default() -> Self {
        Self::from_config(&PromptsConfig::default())
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z0-9_]+)\}").expect("placeholder pattern is valid")
});

/// Substitute `{key}` placeholders in one pass. Substituted text is never
/// scanned again, so names and arguments cannot inject placeholders.
/// Unknown keys are left as written.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
