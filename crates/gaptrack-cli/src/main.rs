//! # gaptrack
//!
//! Command-line driver for the gap tracker. Every command prints JSON on
//! stdout; logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use gaptrack_core::{AuditResult, EvaluationContext, TurnAnnotations};
use gaptrack_runtime::{
    AuditRequest, GapTracker, PipelineRequest, RewriteRequest, RuntimeConfig, StoreBackend,
    TrackRequest,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Context gap tracking for conversational AI pipelines.
#[derive(Parser, Debug)]
#[command(name = "gaptrack", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config and environment)
    #[arg(long, global = true, conflicts_with = "memory")]
    db: Option<PathBuf>,

    /// Use a throwaway in-memory store
    #[arg(long, global = true)]
    memory: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the rule registry
    #[command(subcommand)]
    Rules(RulesCommand),

    /// Track a conversation turn
    Track {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: u32,
        #[arg(long)]
        input: String,
        /// YAML or JSON file with entities, topics, timeline, assertions, ambiguities
        #[arg(long)]
        annotations: Option<PathBuf>,
    },

    /// Show one tracked turn, or the whole session
    Context {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: Option<u32>,
    },

    /// Show a session's memory graph
    Graph {
        #[arg(long)]
        session: String,
    },

    /// Evaluate active rules against an input
    Evaluate {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: u32,
        #[arg(long)]
        input: String,
    },

    /// Audit a generated response
    Audit {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: u32,
        #[arg(long)]
        response: String,
    },

    /// List a session's persisted audits
    AuditHistory {
        #[arg(long)]
        session: String,
    },

    /// Rewrite a prompt with tracked context and clarity annotations
    Rewrite {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: u32,
        #[arg(long)]
        input: String,
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Reduced rewrite, prompt text only
        #[arg(long)]
        simple: bool,
    },

    /// Track, evaluate and rewrite in one go
    Pipeline {
        #[arg(long)]
        session: String,
        #[arg(long)]
        turn: u32,
        #[arg(long)]
        input: String,
        #[arg(long, default_value = "")]
        system_prompt: String,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List rules in evaluation order
    List {
        /// Only rules that participate in evaluation
        #[arg(long)]
        active: bool,
    },

    /// Register the default rule set
    Init,

    /// Import rules from a YAML or JSON rule file
    Import { file: PathBuf },

    /// Enable or disable a rule
    SetActive {
        id: i64,
        #[arg(action = ArgAction::Set)]
        active: bool,
    },

    /// Delete a rule
    Delete { id: i64 },
}

#[derive(Serialize)]
struct AuditOutput<'a> {
    #[serde(flatten)]
    audit: &'a AuditResult,
    should_retry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let tracker = GapTracker::open(config)
        .await
        .context("Failed to open gap tracker")?;

    run(&tracker, cli.command).await
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// File, then environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid GAPTRACK_* environment override")?;

    if cli.memory {
        config.store.backend = StoreBackend::Memory;
    } else if let Some(db) = &cli.db {
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = db.clone();
    }
    tracing::debug!(
        backend = ?config.store.backend,
        path = %config.store.path.display(),
        cache = config.cache.enabled,
        "Loaded configuration"
    );
    Ok(config)
}

fn load_annotations(path: &Path) -> Result<TurnAnnotations> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read annotations: {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both
    serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse annotations: {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(tracker: &GapTracker, command: Command) -> Result<()> {
    match command {
        Command::Rules(rules) => run_rules(tracker, rules).await,

        Command::Track {
            session,
            turn,
            input,
            annotations,
        } => {
            let mut request = TrackRequest::new(session, turn, input);
            if let Some(path) = annotations {
                request = request.with_annotations(load_annotations(&path)?);
            }
            print_json(&tracker.track_turn(request).await?)
        }

        Command::Context { session, turn } => match turn {
            Some(turn) => print_json(&tracker.get_context(&session, turn).await?),
            None => print_json(&tracker.get_session_context(&session).await?),
        },

        Command::Graph { session } => print_json(&tracker.get_memory_graph(&session).await?),

        Command::Evaluate {
            session,
            turn,
            input,
        } => {
            // Reuse annotations of an already tracked turn when there is one
            let mut ctx = match tracker.get_context(&session, turn).await? {
                Some(tracked) => EvaluationContext::from_turn(&tracked, Vec::new()),
                None => EvaluationContext::new(&session, turn, ""),
            };
            ctx.user_input = input;
            print_json(&tracker.evaluate_rules(&ctx).await?)
        }

        Command::Audit {
            session,
            turn,
            response,
        } => {
            let audit = tracker
                .audit_response(AuditRequest::new(session, turn, response))
                .await?;
            print_json(&AuditOutput {
                should_retry: tracker.should_retry(&audit),
                audit: &audit,
            })
        }

        Command::AuditHistory { session } => print_json(&tracker.audit_history(&session).await?),

        Command::Rewrite {
            session,
            turn,
            input,
            system_prompt,
            simple,
        } => {
            if simple {
                let prompt = tracker.simple_rewrite(&session, turn, &input).await?;
                print_json(&serde_json::json!({ "rewritten_prompt": prompt }))
            } else {
                let request =
                    RewriteRequest::new(session, turn, input).with_system_prompt(system_prompt);
                print_json(&tracker.rewrite_prompt(request).await?)
            }
        }

        Command::Pipeline {
            session,
            turn,
            input,
            system_prompt,
        } => {
            let request = PipelineRequest::new(session, turn, input).with_system_prompt(system_prompt);
            print_json(&tracker.process_pipeline(request).await?)
        }
    }
}

async fn run_rules(tracker: &GapTracker, command: RulesCommand) -> Result<()> {
    match command {
        RulesCommand::List { active } => {
            let rules = if active {
                tracker.list_active_rules().await?
            } else {
                tracker.list_rules().await?
            };
            print_json(&rules)
        }

        RulesCommand::Init => print_json(&tracker.initialize_default_rules().await),

        RulesCommand::Import { file } => {
            let imported = tracker
                .import_rules_file(&file)
                .await
                .with_context(|| format!("Failed to import rules: {}", file.display()))?;
            print_json(&imported)
        }

        RulesCommand::SetActive { id, active } => {
            print_json(&tracker.set_rule_active(id, active).await?)
        }

        RulesCommand::Delete { id } => {
            let deleted = tracker.delete_rule(id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))
        }
    }
}
