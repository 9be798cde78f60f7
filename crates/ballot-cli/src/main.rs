//! Ballot CLI - administer school elections from the command line
//!
//! Every command works against the local database; `sync` and `watch`
//! exchange changes with the remote backend when one is configured.

mod cli;
mod commands;
mod error;


use ballot_core::{BallotStore, ClientConfig};
use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::common::{open_store, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::records::{run_add, run_delete, run_get, run_list, run_update};
use crate::commands::sync::{run_conflicts, run_status, run_sync};
use crate::commands::tallies::run_tallies;
use crate::commands::watch::run_watch;
use crate::error::CliError;

const DEFAULT_LOG_DIRECTIVES: [&str; 2] = ["ballot=info", "ballot_core=info"];

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in DEFAULT_LOG_DIRECTIVES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    if let Commands::Completions { shell, output } = &command {
        return run_completions(*shell, output.as_deref());
    }

    let config = ClientConfig::from_env()?;
    let db_path = resolve_db_path(cli.db_path, &config);
    let store = open_store(&db_path).await?;
    let facade = BallotStore::local_only(store.clone());

    match command {
        Commands::List { entity, json } => run_list(entity, json, &facade).await?,
        Commands::Get { entity, id, json } => run_get(entity, &id, json, &facade).await?,
        Commands::Add { entity, json } => run_add(entity, &json, &facade).await?,
        Commands::Update { entity, id, json } => run_update(entity, &id, &json, &facade).await?,
        Commands::Delete { entity, id } => run_delete(entity, &id, &facade).await?,
        Commands::Tallies { elections, json } => run_tallies(&elections, json, &facade).await?,
        Commands::Sync { json } => run_sync(&config, store, json).await?,
        Commands::Status { json } => run_status(&config, &facade, json).await?,
        Commands::Conflicts { limit, json } => run_conflicts(limit, json, &facade).await?,
        Commands::Watch => run_watch(&config, store).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
