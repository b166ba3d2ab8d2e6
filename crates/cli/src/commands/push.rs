use anyhow::{bail, Result};
use clap::Args;
use console::style;
use resilience::OperationContext;
use salesforce::{LoadMode, RecordLoader, COLLECTION_BATCH_SIZE};

use super::transform::SourceArgs;
use crate::context::AppContext;
use crate::progress::ProgressType;

#[derive(Debug, Args)]
pub struct PushCommand {
    #[command(flatten)]
    source: SourceArgs,

    /// Migration project the errors are filed under
    #[arg(long)]
    project: String,

    /// Object mapping id for the error ledger; defaults to the object name
    #[arg(long)]
    object_type_id: Option<String>,

    /// Upsert on this external id field instead of inserting
    #[arg(long, value_name = "FIELD")]
    upsert: Option<String>,

    /// Records per collection request (max 200)
    #[arg(long, default_value_t = COLLECTION_BATCH_SIZE)]
    batch_size: usize,
}

impl PushCommand {
    pub async fn execute(self, app: &AppContext) -> Result<()> {
        let object = self.source.object;
        let sources = self.source.read().await?;
        if sources.is_empty() {
            println!("{} nothing to push", style("!").yellow());
            return Ok(());
        }

        let client = app.salesforce().await?;
        let executor = app.executor()?;
        let object_type_id = self
            .object_type_id
            .clone()
            .unwrap_or_else(|| object.api_name().to_lowercase());
        let ctx = OperationContext::new(&self.project, object_type_id, "load");

        let mode = match &self.upsert {
            Some(field) => LoadMode::Upsert {
                external_id_field: field.clone(),
            },
            None => LoadMode::Create,
        };

        let bar = ProgressType::Records
            .create_bar(sources.len() as u64, &format!("Pushing {} records", object));
        let tick = bar.clone();

        let summary = RecordLoader::new(&client, &executor)
            .with_transformer(self.source.transformer())
            .with_mode(mode)
            .with_batch_size(self.batch_size)
            .with_progress(move |handled| tick.inc(handled as u64))
            .load(object, &ctx, &sources)
            .await;
        bar.finish_and_clear();

        println!(
            "{} {}: {} created, {} updated, {} failed, {} invalid of {}",
            style("●").cyan(),
            style(object).bold(),
            style(summary.created).green(),
            style(summary.updated).green(),
            style(summary.failed).red(),
            style(summary.invalid).yellow(),
            summary.attempted
        );
        for id in &summary.error_ids {
            println!("  {} {}", style("✗").red(), id);
        }

        if !summary.is_clean() {
            bail!(
                "{} record(s) were not loaded; see `crmigrate errors list --project {}`",
                summary.failed + summary.invalid,
                self.project
            );
        }
        Ok(())
    }
}
