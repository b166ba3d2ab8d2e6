use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;
use resilience::{summarize, MigrationError};
use uuid::Uuid;

use crate::context::AppContext;

#[derive(Debug, Args)]
pub struct ErrorsCommand {
    #[command(subcommand)]
    command: ErrorsSubcommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ErrorsSubcommand {
    /// List recorded migration errors, unresolved only by default
    #[command(name = "list")]
    List {
        #[arg(long)]
        project: String,
        /// Include resolved errors
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Mark an error resolved
    #[command(name = "resolve")]
    Resolve {
        id: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Count errors per kind
    #[command(name = "summary")]
    Summary {
        #[arg(long)]
        project: String,
    },
}

impl ErrorsCommand {
    pub async fn execute(self, app: &AppContext) -> Result<()> {
        let store = app.persistent_error_store()?;

        match self.command {
            ErrorsSubcommand::List { project, all, json } => {
                let errors = if all {
                    store.errors_for_project(&project).await?
                } else {
                    store.unresolved_errors(&project).await?
                };

                if json {
                    println!("{}", serde_json::to_string_pretty(&errors)?);
                    return Ok(());
                }
                println!(
                    "{} {}",
                    style("●").cyan(),
                    style(format!("{} error(s) for {}", errors.len(), project)).bold()
                );
                for error in &errors {
                    print_error(error);
                }
            }
            ErrorsSubcommand::Resolve { id, notes } => {
                let resolved = store.resolve_error(id, notes).await?;
                println!("{} resolved {}", style("✓").green(), resolved.id);
            }
            ErrorsSubcommand::Summary { project } => {
                let errors = store.errors_for_project(&project).await?;
                let summary = summarize(&errors);
                println!(
                    "{} {} total, {} unresolved",
                    style("●").cyan(),
                    summary.total,
                    style(summary.unresolved).red()
                );
                for (kind, count) in &summary.by_kind {
                    println!("  {:<12} {:>6}  {}", kind.as_str(), count, kind.severity());
                }
            }
        }
        Ok(())
    }
}

fn print_error(error: &MigrationError) {
    let status = if error.resolved {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "  {} {} [{}] {} {}",
        status,
        error.id,
        error.error_type,
        error.record_id.as_deref().unwrap_or("-"),
        error.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("      {}", error.error_message);
    if let Some(notes) = &error.resolution_notes {
        println!("      {} {}", style("notes:").dim(), notes);
    }
}
