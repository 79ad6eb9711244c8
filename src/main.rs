//! # Main - CLI Entry Point
//!
//! Routes CLI subcommands to the HTTP server and the summary maintenance
//! commands. Handles shared concerns: `.env` loading, logging setup, and the
//! scheduler and generator configuration.
//!
//! ## Subcommands
//!
//! - `serve`: the HTTP API with the debounced summary scheduler.
//! - `summary generate`: run one manual generation for a project.
//! - `summary show`: print a project's stored summary document.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: Supabase PostgreSQL connection.
//! - `--summary-debounce-secs` / `SUMMARY_DEBOUNCE_SECS`: debounce window (default 45).
//! - `--summary-min-entries` / `SUMMARY_MIN_ENTRIES`: eligible-entry threshold (default 2).
//! - `--summary-timeout-secs` / `SUMMARY_TIMEOUT_SECS`: generator call bound (default 120).
//! - `--summary-stale-secs` / `SUMMARY_STALE_SECS`: abandoned-generation window (default 300).
//! - `--llm-api-url`, `--llm-api-key`, `--llm-model`: hosted model endpoint.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sitelog::summary::{
    SchedulerConfig, DEFAULT_DEBOUNCE_SECS, DEFAULT_GENERATION_TIMEOUT_SECS, DEFAULT_LLM_API_URL,
    DEFAULT_LLM_MODEL, DEFAULT_STALE_SECS, DUE_TOLERANCE, MAX_DEBOUNCE_SECS, MIN_ELIGIBLE_ENTRIES,
};
use std::time::Duration;
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "sitelog", about = "Construction logbook service with debounced AI summaries")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds to wait after the first entry change before regenerating
    #[arg(
        long,
        env = "SUMMARY_DEBOUNCE_SECS",
        default_value_t = DEFAULT_DEBOUNCE_SECS,
        value_parser = clap::value_parser!(u64).range(0..=MAX_DEBOUNCE_SECS)
    )]
    summary_debounce_secs: u64,

    /// Minimum number of text/audio entries required to generate a summary
    #[arg(long, env = "SUMMARY_MIN_ENTRIES", default_value_t = MIN_ELIGIBLE_ENTRIES)]
    summary_min_entries: usize,

    /// Upper bound in seconds on a single generator call
    #[arg(long, env = "SUMMARY_TIMEOUT_SECS", default_value_t = DEFAULT_GENERATION_TIMEOUT_SECS)]
    summary_timeout_secs: u64,

    /// Age in seconds after which a `generating` summary is considered abandoned
    #[arg(long, env = "SUMMARY_STALE_SECS", default_value_t = DEFAULT_STALE_SECS)]
    summary_stale_secs: u64,

    /// Chat-completions endpoint used for summary generation
    #[arg(long, env = "LLM_API_URL", default_value = DEFAULT_LLM_API_URL)]
    llm_api_url: String,

    /// Bearer token for the chat-completions endpoint
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Model name sent with each generation request
    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_secs(self.summary_debounce_secs),
            min_eligible_entries: self.summary_min_entries,
            due_tolerance: DUE_TOLERANCE,
            generation_timeout: Duration::from_secs(self.summary_timeout_secs),
            stale_after: Duration::from_secs(self.summary_stale_secs),
        }
    }

    fn database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = 7001)]
        port: u16,
        /// Supabase JWT secret for bearer token verification
        #[arg(long, env = "SUPABASE_JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
    },
    /// Inspect or regenerate project summaries
    Summary {
        #[command(subcommand)]
        action: SummaryAction,
    },
}

#[derive(Subcommand)]
enum SummaryAction {
    /// Generate a project's summary now (manual trigger)
    Generate {
        /// Company (tenant) ID
        #[arg(long)]
        company: Uuid,
        /// Project ID
        #[arg(long)]
        project: Uuid,
    },
    /// Print a project's stored summary document
    Show {
        /// Company (tenant) ID
        #[arg(long)]
        company: Uuid,
        /// Project ID
        #[arg(long)]
        project: Uuid,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port, jwt_secret } => cli::run_serve(&cli, *port, jwt_secret.clone()),
        Commands::Summary { action } => cli::run_summary(&cli, action),
    }
}
