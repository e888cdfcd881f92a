use anyhow::Result;
use clap::Parser;

mod cli;
mod envelope;
mod handlers;
mod router;
mod schema;
mod serve;
mod wake;

use cli::{Cli, Commands};
use coord_store::StateStore;
use coord_store::gc::GcPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the stdio tool channel stays clean.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let store = StateStore::from_env()?;

    match cli.command {
        Commands::Serve => {
            // Reconcile first so stale `running` workers do not survive a
            // coordinator restart, then sweep garbage once.
            let reconciled = coord_worker::supervise::reconcile_workers(&store)?;
            if !reconciled.is_empty() {
                tracing::info!(count = reconciled.len(), "reconciled dead workers at startup");
            }
            store.run_gc(&GcPolicy::default(), &coord_process::is_process_alive);

            serve::serve_stdio(router::Router::new(store)).await
        }
        Commands::Gc => {
            let report = store.run_gc(&GcPolicy::default(), &coord_process::is_process_alive);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Status => {
            let reconciled = coord_worker::supervise::reconcile_workers(&store)?;
            if !reconciled.is_empty() {
                eprintln!("reconciled {} dead worker(s)", reconciled.len());
            }
            print!("{}", handlers::admin::status_text(&store)?);
            Ok(())
        }
    }
}
