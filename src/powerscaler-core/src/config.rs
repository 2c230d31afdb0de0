//! Configuration module for loading TOML config files.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Secrets never live in the file; they come from the environment.

use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::BattleError;
use crate::llm::CompletionOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub prompts: PromptsConfig,
}

/// Language-model endpoint and call bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    pub name: String,
    pub fighter_max_tokens: u32,
    pub judge_max_tokens: u32,
    /// Per-call wait bound.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_prompt_chars: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            name: "gemini-2.0-flash-lite".to_string(),
            fighter_max_tokens: 1024,
            judge_max_tokens: 1536,
            timeout_secs: 90,
            connect_timeout_secs: 30,
            max_prompt_chars: 32_000,
        }
    }
}

impl ModelConfig {
    pub fn fighter_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.name.clone(),
            max_tokens: self.fighter_max_tokens,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn judge_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.name.clone(),
            max_tokens: self.judge_max_tokens,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Origins allowed by CORS (the Svelte dev server by default).
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

/// Battle record persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite:` connection string, or `memory` for a throwaway store.
    pub url: String,
    /// Also persist battles that ended in an agent failure.
    pub record_failures: bool,
    /// Embed the fighters' arguments in each record.
    pub record_arguments: bool,
    pub default_history_limit: u32,
    pub max_history_limit: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:powerscaler.db?mode=rwc".to_string(),
            record_failures: false,
            record_arguments: false,
            default_history_limit: 50,
            max_history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted character name, in chars.
    pub max_name_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_name_length: 100,
        }
    }
}

/// Role prompt templates.
///
/// Fighter placeholders: `{character}`, `{opponent}`.
/// Judge placeholders: `{character1}`, `{character2}`, `{argument1}`, `{argument2}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub fighter: String,
    pub judge: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            fighter: DEFAULT_FIGHTER_PROMPT.to_string(),
            judge: DEFAULT_JUDGE_PROMPT.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        default_config()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BattleError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| BattleError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Load configuration from string content.
    pub fn from_toml(content: &str) -> Result<Self, BattleError> {
        toml::from_str(content)
            .map_err(|e| BattleError::ConfigError(format!("Failed to parse config: {}", e)))
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        model: ModelConfig::default(),
        server: ServerConfig::default(),
        storage: StorageConfig::default(),
        limits: LimitsConfig::default(),
        prompts: PromptsConfig::default(),
    }
}

/// Process-wide settings: the file configuration plus environment secrets.
/// Built once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct AppConfig {
    pub config: Config,
    pub api_key: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Load the file configuration and apply environment overrides.
///
/// `config_path` wins over `POWERSCALER_CONFIG`; without either the
/// built-in defaults are used. `DATABASE_URL` and `POWERSCALER_BIND`
/// override the file.
pub fn resolve_config(config_path: Option<&Path>) -> Result<Config, BattleError> {
    let mut config = match config_path {
        Some(path) => Config::load(path)?,
        None => match env::var("POWERSCALER_CONFIG") {
            Ok(path) => Config::load(path)?,
            Err(_) => default_config(),
        },
    };

    if let Ok(url) = env::var("DATABASE_URL") {
        config.storage.url = url;
    }
    if let Ok(bind) = env::var("POWERSCALER_BIND") {
        config.server.bind = bind.parse().map_err(|e| {
            BattleError::ConfigError(format!("Invalid POWERSCALER_BIND '{}': {}", bind, e))
        })?;
    }

    Ok(config)
}

impl AppConfig {
    /// Resolve settings from the environment.
    ///
    /// The API key is read from `GEMINI_API_KEY`, then `OPENAI_API_KEY`.
    /// See [`resolve_config`] for the rest.
    pub fn from_env(config_path: Option<&Path>) -> Result<Self, BattleError> {
        let config = resolve_config(config_path)?;

        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                BattleError::ConfigError(
                    "GEMINI_API_KEY (or OPENAI_API_KEY) environment variable is required"
                        .to_string(),
                )
            })?;
        if api_key.trim().is_empty() {
            return Err(BattleError::ConfigError("API key is empty".to_string()));
        }

        Ok(Self { config, api_key })
    }
}

const DEFAULT_FIGHTER_PROMPT: &str = r#"{character} is up against {opponent}. You are on team {character}.

Consider the following, among other things: hax, power vs. fragility, hit-capability, attrition, special abilities, tactics, narrative.
Write a narrative of what you believe will happen in the battle based on that analysis.
Explicitly anticipate {opponent}'s best argument and battle narrative and explain why it fails or is inconsistent.
Anchor necessary claims with at least one concrete, canon feat (e.g. "demolished a mountain in 0.2 s").

The most important thing is to identify the most narratively consistent and likely situation to play out.
- Do not bring disparate fighters closer in power. If one character is too durable to be hurt by the other, say so.
- If one character is too fast to be hit by the other, say so.
- If one character has a special power that has no answer, say so.
- Consider the scale of attacks that hurt each character and whether the other's attacks meet that scale (e.g. blowing up planets).
- Back these ideas with feats or canon narrative events where necessary.
- Feel free to chain-scale off feats of other characters in their verse.

Keep points short. Use bullet points and no fluff.
"#;

const DEFAULT_JUDGE_PROMPT: &str = r#"You are the judge of a power-scaling theoretical battle between {character1} and {character2}.
Take the two arguments below and determine who wins and why.

The most important thing is to identify the most narratively consistent and likely situation to play out.
- Do not bring disparate fighters closer in power.
- Account for durability, speed, unanswerable abilities and attack scale.
- At each step, call out any unsupported or contradictory claims.
- Stop as soon as one fighter clearly outranks the other.
- If neither gains a clear win, declare a draw.

- Argument for {character1} -
{argument1}

- Argument for {character2} -
{argument2}

Answer in exactly this shape, with nothing before the first line:
Winner: <{character1}, {character2}, or Draw>
Reasoning: <short bullet points, flagging inconsistencies or missing feat evidence>
"#;
