//! # CLI Execution Functions
//!
//! Execution logic for each subcommand, kept out of `main.rs` so the entry
//! point stays a thin argument parser.

use anyhow::Result;
use sitelog::db;
use sitelog::summary::{
    GenerationMode, LlmConfig, LlmGenerator, ProjectKey, SummaryGenerator, SummaryScheduler,
};
use std::sync::Arc;
use tracing::info;

use super::{Cli, SummaryAction};

fn build_generator(cli: &Cli) -> Result<Arc<dyn SummaryGenerator>> {
    let config = LlmConfig {
        api_url: cli.llm_api_url.clone(),
        api_key: cli.llm_api_key.clone(),
        model: cli.llm_model.clone(),
        ..LlmConfig::default()
    };
    Ok(Arc::new(LlmGenerator::new(config)?))
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub fn run_serve(cli: &Cli, port: u16, jwt_secret: Option<String>) -> Result<()> {
    let database_url = cli.database_url()?;
    let generator = build_generator(cli)?;
    let config = cli.scheduler_config();
    info!(
        debounce_secs = config.debounce.as_secs(),
        min_entries = config.min_eligible_entries,
        model = %cli.llm_model,
        "sitelog starting"
    );
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(sitelog::server::run(
        port,
        database_url,
        generator,
        config,
        jwt_secret,
    ))
}

pub fn run_summary(cli: &Cli, action: &SummaryAction) -> Result<()> {
    let database_url = cli.database_url()?;
    let rt = tokio::runtime::Runtime::new()?;
    let database = rt.block_on(db::Database::connect(database_url))?;

    match action {
        SummaryAction::Generate { company, project } => {
            let key = ProjectKey::new(*company, *project);
            let scheduler = SummaryScheduler::new(
                Arc::new(database),
                build_generator(cli)?,
                cli.scheduler_config(),
            );
            let outcome = rt.block_on(scheduler.trigger_generation(key, GenerationMode::Manual));
            // A one-shot process cannot honour a follow-up timer; the next
            // entry change or server restart picks it up from storage.
            scheduler.shutdown();
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        SummaryAction::Show { company, project } => {
            let key = ProjectKey::new(*company, *project);
            match rt.block_on(database.get_summary_metadata(key))? {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => eprintln!("No summary stored for project {}", key),
            }
        }
    }
    Ok(())
}
