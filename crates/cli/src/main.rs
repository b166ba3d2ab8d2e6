use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{init_structured_logging, ConfigLoader, LoggingConfig};
use std::path::PathBuf;
use tracing::Level;

use cli::commands::{
    ClassifyCommand, ErrorsCommand, OrgCommand, PushCommand, TransformCommand, ValidateCommand,
};
use cli::context::AppContext;

#[derive(Parser)]
#[command(name = "crmigrate")]
#[command(about = "Move CRM exports into Salesforce with retries and an error ledger")]
#[command(version)]
struct Cli {
    /// Config file; searched for in the usual places when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log JSON lines to stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map source records onto Salesforce fields and print them
    Transform(TransformCommand),
    /// Check mapped records for missing or malformed fields
    Validate(ValidateCommand),
    /// Load records into Salesforce
    Push(PushCommand),
    /// Classify an error message the way the retry executor would
    Classify(ClassifyCommand),
    /// Query and inspect the connected org
    Org(OrgCommand),
    /// Review and resolve recorded migration errors
    Errors(ErrorsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = ConfigLoader::new().logging_settings(|key| std::env::var(key).ok());
    let mut logging = LoggingConfig::from_settings(&settings);
    if cli.verbose {
        logging = logging.with_level(Level::DEBUG);
    }
    if cli.json_logs {
        logging = logging.with_json_output(true);
    }
    init_structured_logging(logging)?;

    // Offline commands never read the configuration.
    match cli.command {
        Commands::Transform(cmd) => cmd.execute().await,
        Commands::Validate(cmd) => cmd.execute().await,
        Commands::Classify(cmd) => cmd.execute().await,
        Commands::Push(cmd) => cmd.execute(&AppContext::load(cli.config).await?).await,
        Commands::Org(cmd) => cmd.execute(&AppContext::load(cli.config).await?).await,
        Commands::Errors(cmd) => cmd.execute(&AppContext::load(cli.config).await?).await,
    }
}
