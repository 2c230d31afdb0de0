//! PowerScaler CLI - AI Battle Arena
//!
//! Serves the battle API, or runs battles and reads history from the terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use powerscaler_core::config::{Config, resolve_config};
use powerscaler_core::{
    AgentRole, AppConfig, AppState, BattleEvent, BattleOrchestrator, BattleRequest, BattleService,
    HistoryEntry, OpenAiCompatibleClient, open_store, server,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "powerscaler",
    version,
    about = "PowerScaler Battle Arena - AI-judged character matchups",
    long_about = "Two AI fighters argue for their characters and an AI judge declares the winner. \
                  Runs as an HTTP API or straight from the terminal."
)]
struct Cli {
    /// Path to a TOML configuration file (overrides POWERSCALER_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (overrides the config file and POWERSCALER_BIND)
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<std::net::SocketAddr>,
    },
    /// Run one battle and record the verdict
    Battle {
        #[arg(value_name = "CHARACTER1")]
        character1: String,
        #[arg(value_name = "CHARACTER2")]
        character2: String,
    },
    /// Show recent battles, newest first
    History {
        /// Number of battles to show
        #[arg(short, long, value_name = "N")]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Serve { bind } => {
            init_tracing("info,powerscaler_core=debug,tower_http=info");
            serve(config_path, bind).await
        }
        Command::Battle {
            character1,
            character2,
        } => {
            init_tracing("warn");
            battle(config_path, character1, character2).await
        }
        Command::History { limit } => {
            init_tracing("warn");
            history(config_path, limit).await
        }
    }
}

/// Initialize tracing; `RUST_LOG` wins over `default_filter`.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn build_service(
    app: &AppConfig,
    orchestrator: BattleOrchestrator,
) -> Result<BattleService, Box<dyn std::error::Error>> {
    let store = open_store(&app.config.storage).await?;
    Ok(BattleService::new(
        Arc::new(orchestrator),
        store,
        app.config.storage.clone(),
        app.config.limits.clone(),
    ))
}

fn model_client(app: &AppConfig) -> Result<Arc<OpenAiCompatibleClient>, Box<dyn std::error::Error>> {
    Ok(Arc::new(OpenAiCompatibleClient::new(
        &app.config.model,
        &app.api_key,
    )?))
}

async fn serve(
    config_path: Option<&Path>,
    bind: Option<std::net::SocketAddr>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = AppConfig::from_env(config_path)?;
    if let Some(bind) = bind {
        app.config.server.bind = bind;
    }

    tracing::info!(
        model = %app.config.model.name,
        api_base = %app.config.model.api_base,
        storage = %app.config.storage.url,
        "Starting PowerScaler API"
    );

    let orchestrator = BattleOrchestrator::from_config(model_client(&app)?, &app.config);
    let service = build_service(&app, orchestrator).await?;
    let state = AppState::new(Arc::new(service));
    let router = server::router(state, &app.config.server.allowed_origins);

    server::serve(router, app.config.server.bind).await?;
    Ok(())
}

async fn battle(
    config_path: Option<&Path>,
    character1: String,
    character2: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = AppConfig::from_env(config_path)?;

    print_banner(&format!("{} vs {}", character1, character2));
    println!("{} {}", "Model:".bold(), app.config.model.name.dimmed());
    println!("{}", "─".repeat(70).dimmed());

    let orchestrator = BattleOrchestrator::from_config(model_client(&app)?, &app.config)
        .with_callback(create_console_callback());
    let service = build_service(&app, orchestrator).await?;

    let response = match service
        .battle(BattleRequest::new(character1, character2))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    println!("{}", "═".repeat(70).bright_blue());
    let headline = if response.decided {
        format!("  Winner: {}", response.winner)
    } else {
        "  Draw: no clear winner".to_string()
    };
    println!("{}", headline.bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    for line in textwrap(&response.reasoning, 66).lines() {
        println!("  {}", line);
    }
    println!();
    match response.id {
        Some(id) => println!("{} {}", "Recorded as".dimmed(), id.to_string().dimmed()),
        None => println!("{}", "Warning: the verdict could not be recorded.".yellow()),
    }
    println!();

    Ok(())
}

async fn history(
    config_path: Option<&Path>,
    limit: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = resolve_config(config_path)?;
    let store = open_store(&config.storage).await?;
    let limit = limit
        .unwrap_or(config.storage.default_history_limit)
        .clamp(1, config.storage.max_history_limit.max(1));
    let records = store.list_recent(limit, None).await?;

    print_banner("Battle History");
    if records.is_empty() {
        println!("  {}", "No battles yet.".dimmed());
        println!();
        return Ok(());
    }

    for record in records {
        let entry = HistoryEntry::from(record);
        println!(
            "{} {} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            entry.character1.bright_cyan().bold(),
            "vs".dimmed(),
            entry.character2.bright_cyan().bold()
        );
        match (entry.winner, entry.error) {
            (Some(_), _) if entry.decided == Some(false) => {
                println!("  {}", "Draw".bright_yellow().bold())
            }
            (Some(winner), _) => println!("  {} {}", "Winner:".bold(), winner.bright_green()),
            (None, Some(error)) => println!("  {} {}", "Failed:".red().bold(), error),
            (None, None) => println!("  {}", entry.status.yellow()),
        }
        if let Some(reasoning) = entry.reasoning {
            for line in textwrap(&reasoning, 64).lines().take(3) {
                println!("    {}", line.dimmed());
            }
        }
        println!();
    }

    Ok(())
}

fn print_banner(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "PowerScaler".bold(), title)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
}

/// Create a callback that prints battle events to the console.
fn create_console_callback() -> Box<dyn Fn(BattleEvent) + Send + Sync> {
    Box::new(move |event| match event {
        BattleEvent::FightersDispatched {
            character1,
            character2,
        } => {
            println!(
                "{} Fighters are preparing the cases for {} and {}...",
                "▶".bright_cyan(),
                character1.bright_cyan().bold(),
                character2.bright_cyan().bold()
            );
            println!();
        }
        BattleEvent::Argument {
            role,
            character,
            content,
        } => {
            let label = match role {
                AgentRole::FighterA => role.display_name().bright_cyan(),
                _ => role.display_name().bright_magenta(),
            };
            println!(
                "{} {} {}",
                "▶".bright_cyan(),
                label.bold(),
                format!("(team {})", character).yellow()
            );
            // Word wrap and indent the content
            for line in textwrap(&content, 66).lines() {
                println!("  {}", line);
            }
            println!();
        }
        BattleEvent::JudgeDeliberating => {
            println!("{} {}", "⚖".bright_yellow(), "The judge is deliberating...".bold());
            println!();
        }
        BattleEvent::VerdictReached(_) => {
            // Handled in battle
        }
    })
}

/// Simple text wrapping function. Paragraph breaks are kept.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();

    for (i, paragraph) in text.split("\n\n").enumerate() {
        if i > 0 {
            result.push_str("\n\n");
        }
        let mut current_line_len = 0;
        for word in paragraph.split_whitespace() {
            if current_line_len + word.len() + 1 > width && current_line_len > 0 {
                result.push('\n');
                current_line_len = 0;
            }
            if current_line_len > 0 {
                result.push(' ');
                current_line_len += 1;
            }
            result.push_str(word);
            current_line_len += word.len();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_respects_width() {
        let wrapped = textwrap("Goku dodges the heat vision and counters with a Kamehameha", 20);
        assert!(wrapped.lines().all(|line| line.len() <= 20));
        assert_eq!(wrapped.lines().next(), Some("Goku dodges the heat"));
    }

    #[test]
    fn test_textwrap_keeps_paragraphs() {
        let wrapped = textwrap("First point.\n\nSecond point.", 66);
        assert_eq!(wrapped, "First point.\n\nSecond point.");
    }

    #[test]
    fn test_cli_parses_battle() {
        let cli = Cli::try_parse_from(["powerscaler", "battle", "Goku", "Superman"]).unwrap();
        match cli.command {
            Command::Battle {
                character1,
                character2,
            } => {
                assert_eq!(character1, "Goku");
                assert_eq!(character2, "Superman");
            }
            _ => panic!("expected battle"),
        }
    }

    #[test]
    fn test_cli_parses_history_limit() {
        let cli = Cli::try_parse_from(["powerscaler", "history", "--limit", "5"]).unwrap();
        assert!(matches!(cli.command, Command::History { limit: Some(5) }));
    }
}
