//! Array Balancer CLI
//!
//! Queue, run and undo checksum-verified file migrations between array disks.

use array_balancer::cli::{
    args::{Cli, Commands, UndoAction},
    commands::{queue, run, status, submit, undo},
};
use array_balancer::core::engine::Engine;
use array_balancer::models::config::load_config;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    // Initialize logging
    init_logging(cli.verbose, &config.log_level);

    // Permission checks need no database
    if let Commands::Permissions = cli.command {
        status::permissions(&config)?;
        return Ok(());
    }

    let engine = Engine::open(config)?;

    match cli.command {
        Commands::Submit { kind } => submit::submit(&engine, kind)?,
        Commands::Queue { json } => queue::show_queue(&engine, json)?,
        Commands::Task { id } => queue::show_task(&engine, id)?,
        Commands::Group { name } => queue::show_group(&engine, &name)?,
        Commands::Cancel { id } => queue::cancel(&engine, id)?,
        Commands::Pause { reason } => queue::pause(&engine, reason.as_deref())?,
        Commands::Resume => queue::resume(&engine)?,
        Commands::PauseTask { id } => queue::pause_task(&engine, id)?,
        Commands::ResumeTask { id } => queue::resume_task(&engine, id)?,
        Commands::Reorder { ids } => queue::reorder(&engine, &ids)?,
        Commands::Delete { id } => queue::delete(&engine, id)?,
        Commands::Run { once } => run::run(&engine, once).await?,
        Commands::Undo { action } => match action {
            UndoAction::List { all } => undo::list(&engine, all)?,
            UndoAction::Reverse { id } => undo::reverse(&engine, id).await?,
            UndoAction::Reap => undo::reap(&engine)?,
        },
        Commands::History { limit } => status::history(&engine, limit)?,
        Commands::Recover => status::recover(&engine)?,
        Commands::Permissions => {}
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool, log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = match log_level.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    let filter = if verbose {
        EnvFilter::new("array_balancer=debug")
    } else {
        EnvFilter::try_new(format!("array_balancer={}", level))
            .unwrap_or_else(|_| EnvFilter::new("array_balancer=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
