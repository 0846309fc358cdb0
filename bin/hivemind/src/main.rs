mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "hivemind")]
#[command(about = "Multi-agent coordination and collective learning core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration with one agent per role
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show configuration and saved learning state
    Status,

    /// Run the coordinator with its background cycles until Ctrl-C
    Run,

    /// Show which role a task type would be routed to
    Route {
        /// Task type, e.g. "deployment" or "image-analysis"
        task_type: String,

        /// low, medium, high or urgent
        #[arg(short, long, default_value = "medium")]
        priority: String,
    },

    /// Print the saved aggregate learning metrics
    Metrics {
        /// Emit raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Run => {
            commands::run_cmd::run().await?;
        }
        Commands::Route { task_type, priority } => {
            commands::route::run(&task_type, &priority)?;
        }
        Commands::Metrics { json } => {
            commands::metrics::run(json).await?;
        }
    }

    Ok(())
}
