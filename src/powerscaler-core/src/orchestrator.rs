//! Battle orchestration logic.
//!
//! Runs both fighters concurrently, hands their arguments to the judge, and
//! reads a verdict out of the judge's answer.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::BattleError;
use crate::llm::{CompletionOptions, LanguageModel};
use crate::role::{AgentRole, RolePrompts};
use crate::verdict::{Verdict, parse_verdict};

/// Everything a finished battle produced.
#[derive(Debug, Clone)]
pub struct BattleOutcome {
    pub verdict: Verdict,
    /// Fighter A's argument, for `character1`.
    pub argument1: String,
    /// Fighter B's argument, for `character2`.
    pub argument2: String,
}

/// Callback for battle events.
pub type BattleCallback = Box<dyn Fn(BattleEvent) + Send + Sync>;

/// Events emitted during a battle.
#[derive(Debug, Clone)]
pub enum BattleEvent {
    /// Both fighters have been dispatched.
    FightersDispatched { character1: String, character2: String },
    /// A fighter finished its argument.
    Argument { role: AgentRole, character: String, content: String },
    /// The judge has been dispatched.
    JudgeDeliberating,
    /// The judge's answer was read into a verdict.
    VerdictReached(Verdict),
}

/// Orchestrates one battle between two characters.
pub struct BattleOrchestrator {
    model: Arc<dyn LanguageModel>,
    prompts: RolePrompts,
    fighter_options: CompletionOptions,
    judge_options: CompletionOptions,
    /// Event callback.
    callback: Option<BattleCallback>,
}

impl BattleOrchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: RolePrompts,
        fighter_options: CompletionOptions,
        judge_options: CompletionOptions,
    ) -> Self {
        Self {
            model,
            prompts,
            fighter_options,
            judge_options,
            callback: None,
        }
    }

    /// Build from the loaded configuration.
    pub fn from_config(model: Arc<dyn LanguageModel>, config: &Config) -> Self {
        Self::new(
            model,
            RolePrompts::from_config(&config.prompts),
            config.model.fighter_options(),
            config.model.judge_options(),
        )
    }

    /// Set a callback for battle events.
    pub fn with_callback(mut self, callback: BattleCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Run one battle end to end. There are no retries: any agent failure
    /// ends the battle.
    pub async fn run_battle(
        &self,
        character1: &str,
        character2: &str,
    ) -> Result<BattleOutcome, BattleError> {
        info!(%character1, %character2, model = self.model.name(), "Battle started");

        let prompt_a = self.prompts.fighter_a(character1, character2);
        let prompt_b = self.prompts.fighter_b(character1, character2);

        self.emit_event(BattleEvent::FightersDispatched {
            character1: character1.to_string(),
            character2: character2.to_string(),
        });

        // The judge must see both arguments, so either failure stops here.
        let (argument1, argument2) = tokio::try_join!(
            self.dispatch(AgentRole::FighterA, &prompt_a, &self.fighter_options),
            self.dispatch(AgentRole::FighterB, &prompt_b, &self.fighter_options),
        )
        .inspect_err(|e| warn!(error = %e, "Battle aborted before judging"))?;

        let argument1 = sanitize_response(&argument1);
        let argument2 = sanitize_response(&argument2);
        self.emit_event(BattleEvent::Argument {
            role: AgentRole::FighterA,
            character: character1.to_string(),
            content: argument1.clone(),
        });
        self.emit_event(BattleEvent::Argument {
            role: AgentRole::FighterB,
            character: character2.to_string(),
            content: argument2.clone(),
        });

        self.emit_event(BattleEvent::JudgeDeliberating);
        let judge_prompt = self
            .prompts
            .judge(character1, character2, &argument1, &argument2);
        let judgment = self
            .dispatch(AgentRole::Judge, &judge_prompt, &self.judge_options)
            .await?;

        let verdict = parse_verdict(&sanitize_response(&judgment), character1, character2)
            .map_err(|e| {
                warn!(error = %e, "Judge output could not be parsed");
                BattleError::unparseable_verdict(e)
            })?;

        info!(winner = %verdict.winner, "Verdict reached");
        self.emit_event(BattleEvent::VerdictReached(verdict.clone()));

        Ok(BattleOutcome {
            verdict,
            argument1,
            argument2,
        })
    }

    /// Send one role's prompt and tag any failure with the role.
    async fn dispatch(
        &self,
        role: AgentRole,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, BattleError> {
        let start = Instant::now();
        let result = self.model.complete(prompt, options).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(text) => {
                info!(%role, latency_ms, chars = text.len(), "Agent answered");
                Ok(text)
            }
            Err(e) => {
                warn!(%role, latency_ms, kind = ?e.kind, error = %e, "Agent call failed");
                Err(BattleError::agent(role, e))
            }
        }
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: BattleEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

static REASONING_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    // No backreferences in `regex`, so each tag gets its own alternative.
    let alternatives: Vec<String> = [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratch",
        "scratchpad",
        "deliberation",
    ]
    .iter()
    .map(|tag| format!(r"<{tag}(?:\s[^>]*)?>.*?</{tag}\s*>"))
    .collect();
    Regex::new(&format!("(?is){}", alternatives.join("|"))).expect("tag pattern is valid")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank-line pattern is valid"));

/// Strip model reasoning blocks such as `<think>...</think>`.
///
/// Line structure is kept, since both the judge's labels and the fighters'
/// bullet points depend on it; runs of blank lines left behind collapse to one.
fn sanitize_response(response: &str) -> String {
    let stripped = REASONING_TAGS.replace_all(response, "");
    BLANK_RUNS.replace_all(&stripped, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentFailureKind;
    use crate::llm::LlmError;
    use crate::mock::{MockModel, is_judge_prompt};
    use crate::verdict::Winner;
    use std::sync::Mutex;
    use std::time::Duration;

    fn orchestrator(model: Arc<MockModel>) -> BattleOrchestrator {
        let mut config = crate::config::default_config();
        config.model.timeout_secs = 2;
        BattleOrchestrator::from_config(model, &config)
    }

    /// Fighters repeat their own character's name; the judge answers `judgment`.
    fn scripted(judgment: &'static str) -> Arc<MockModel> {
        Arc::new(MockModel::new(move |prompt| {
            if is_judge_prompt(prompt) {
                Ok(judgment.to_string())
            } else if prompt.starts_with("Goku") {
                Ok("Goku shatters planets with a Kamehameha.".to_string())
            } else {
                Ok("Superman moves faster than light.".to_string())
            }
        }))
    }

    #[tokio::test]
    async fn test_goku_vs_superman() {
        let model = scripted("Winner: Superman\nReasoning: feats outclass.");
        let outcome = orchestrator(model.clone())
            .run_battle("Goku", "Superman")
            .await
            .unwrap();

        assert_eq!(outcome.verdict.winner, Winner::Character("Superman".to_string()));
        assert_eq!(outcome.verdict.reasoning, "feats outclass.");
        assert!(outcome.argument1.contains("Goku"));
        assert!(outcome.argument2.contains("Superman"));
        assert_eq!(model.call_count(), 3);

        // The judge saw both fighters' arguments.
        let judge_prompt = model
            .prompts()
            .into_iter()
            .find(|p| is_judge_prompt(p))
            .unwrap();
        assert!(judge_prompt.contains("Kamehameha"));
        assert!(judge_prompt.contains("faster than light"));
    }

    #[tokio::test]
    async fn test_fighter_a_failure_skips_judge() {
        let model = Arc::new(MockModel::new(|prompt| {
            if prompt.starts_with("Goku") {
                Err(LlmError::provider("API key not valid"))
            } else {
                Ok("Winner: Superman".to_string())
            }
        }));
        let err = orchestrator(model.clone())
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();

        assert_eq!(
            err.agent_failure(),
            Some((AgentRole::FighterA, AgentFailureKind::ProviderError))
        );
        assert!(err.to_string().contains("API key not valid"));
        assert_eq!(model.judge_calls(), 0);
    }

    #[tokio::test]
    async fn test_fighter_b_failure_skips_judge() {
        let model = Arc::new(MockModel::new(|prompt| {
            if prompt.starts_with("Superman") {
                Err(LlmError::provider("quota exceeded"))
            } else {
                Ok("Goku shatters planets.".to_string())
            }
        }));
        let err = orchestrator(model.clone())
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();

        assert_eq!(
            err.agent_failure(),
            Some((AgentRole::FighterB, AgentFailureKind::ProviderError))
        );
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(model.judge_calls(), 0);
    }

    #[tokio::test]
    async fn test_judge_provider_error() {
        let model = Arc::new(MockModel::new(|prompt| {
            if is_judge_prompt(prompt) {
                Err(LlmError::provider("model overloaded"))
            } else {
                Ok("argument".to_string())
            }
        }));
        let err = orchestrator(model.clone())
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();

        assert_eq!(
            err.agent_failure(),
            Some((AgentRole::Judge, AgentFailureKind::ProviderError))
        );
        assert_eq!(model.judge_calls(), 1);
    }

    #[tokio::test]
    async fn test_fighter_timeout_is_agent_failure() {
        let model = Arc::new(MockModel::constant("slow").with_latency(Duration::from_secs(5)));
        let mut config = crate::config::default_config();
        config.model.timeout_secs = 0;
        let err = BattleOrchestrator::from_config(model.clone(), &config)
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();

        let (_, kind) = err.agent_failure().unwrap();
        assert_eq!(kind, AgentFailureKind::Timeout);
        assert_eq!(model.judge_calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_judgment() {
        let model = scripted("Both fighters are impressive.");
        let err = orchestrator(model)
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();
        assert_eq!(
            err.agent_failure(),
            Some((AgentRole::Judge, AgentFailureKind::VerdictParseFailure))
        );
    }

    #[tokio::test]
    async fn test_judge_naming_a_stranger_fails_closed() {
        let model = scripted("Winner: Batman\nReasoning: prep time.");
        let err = orchestrator(model)
            .run_battle("Goku", "Superman")
            .await
            .unwrap_err();
        assert!(matches!(
            err.agent_failure(),
            Some((AgentRole::Judge, AgentFailureKind::VerdictParseFailure))
        ));
    }

    #[tokio::test]
    async fn test_draw_is_preserved() {
        let model = scripted("<think>hmm</think>\nWinner: Draw\nReasoning: evenly matched.");
        let outcome = orchestrator(model)
            .run_battle("Goku", "Superman")
            .await
            .unwrap();
        assert_eq!(outcome.verdict.winner, Winner::Undetermined);
    }

    #[tokio::test]
    async fn test_identical_names_are_allowed() {
        let model = scripted("Winner: Goku\nReasoning: mirror match.");
        let outcome = orchestrator(model)
            .run_battle("Goku", "Goku")
            .await
            .unwrap();
        assert_eq!(outcome.verdict.winner.label(), "Goku");
    }

    #[tokio::test]
    async fn test_fighters_run_concurrently() {
        let model = Arc::new(
            MockModel::battle("argument", "Winner: Goku").with_latency(Duration::from_millis(300)),
        );
        let start = Instant::now();
        orchestrator(model).run_battle("Goku", "Superman").await.unwrap();
        // Two sequential fighter calls plus the judge would take at least 900ms.
        assert!(start.elapsed() < Duration::from_millis(850));
    }

    #[tokio::test]
    async fn test_events_follow_the_pipeline() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let model = scripted("Winner: Goku\nReasoning: speed.");
        orchestrator(model)
            .with_callback(Box::new(move |event| {
                let tag = match event {
                    BattleEvent::FightersDispatched { .. } => "dispatched",
                    BattleEvent::Argument { .. } => "argument",
                    BattleEvent::JudgeDeliberating => "judge",
                    BattleEvent::VerdictReached(_) => "verdict",
                };
                sink.lock().unwrap().push(tag);
            }))
            .run_battle("Goku", "Superman")
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["dispatched", "argument", "argument", "judge", "verdict"]
        );
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<thinking>Let me think about this...</thinking>The answer is 42.";
        assert_eq!(sanitize_response(input), "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_multiline_tags() {
        let input = "<think>\nMultiple\nlines\nof\nthought\n</think>\nWinner: Goku";
        assert_eq!(sanitize_response(input), "Winner: Goku");
    }

    #[test]
    fn test_sanitize_response_keeps_lines() {
        let input = "- point one\n- point two\n\n\n\n- point three";
        assert_eq!(sanitize_response(input), "- point one\n- point two\n\n- point three");
    }

    #[test]
    fn test_sanitize_response_multiple_tag_types() {
        let input = "<scratchpad>First plan</scratchpad>Then <reasoning>reason</reasoning>finally the answer.";
        assert_eq!(sanitize_response(input), "Then finally the answer.");
    }

    #[test]
    fn test_sanitize_response_no_tags() {
        let input = "No tags here, just text.";
        assert_eq!(sanitize_response(input), "No tags here, just text.");
    }
}
