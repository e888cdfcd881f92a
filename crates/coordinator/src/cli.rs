use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coord", version)]
#[command(about = "Multi-agent terminal coordinator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve tool calls over stdio (JSON line framing)
    Serve,
    /// Run garbage collection once and print the report
    Gc,
    /// Print a summary of sessions, workers, and teams
    Status,
}
