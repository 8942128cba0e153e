mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::SourceArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "provision",
    about = "Declarative provisioning: load a task list, check its policy gates, run its actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Engine settings file (default: settings.yaml in the state directory)
    #[arg(long, global = true, env = "PROVISION_SETTINGS")]
    settings: Option<PathBuf>,

    /// Directory holding the stage file and settings
    #[arg(long, global = true, env = "PROVISION_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log at debug level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a configuration and execute its tasks
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// URL that must answer before anything runs (repeatable or comma-separated)
        #[arg(long = "verify-url", value_name = "URL", value_delimiter = ',')]
        verify_urls: Vec<String>,
    },

    /// Load a configuration and check every task without running anything
    Validate {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show the recorded provisioning stage
    Stage,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Run { .. } | Commands::Validate { .. } => tracing::Level::INFO,
            Commands::Stage => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let global = cmd::GlobalArgs {
        settings: cli.settings,
        state_dir: cli.state_dir,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run {
            source,
            verify_urls,
        } => cmd::run::run(&global, &source, &verify_urls),
        Commands::Validate { source } => cmd::validate::run(&global, &source),
        Commands::Stage => cmd::stage::run(&global),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
