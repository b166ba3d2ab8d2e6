use anyhow::{Context, Result};
use clap::Args;
use console::style;
use salesforce::{validate_batch, SObjectType, SalesforceDataTransformer};
use serde_json::Value;
use std::path::PathBuf;

use crate::input::{read_records, InputFormat};

/// Options shared by every command that reads a source file
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Destination object: contact, account or opportunity
    #[arg(short, long)]
    pub object: SObjectType,

    /// JSON or CSV export from the source CRM
    #[arg(short, long)]
    pub input: PathBuf,

    /// Override format detection from the file extension
    #[arg(long)]
    pub format: Option<InputFormat>,

    /// Drop `customFields` instead of mapping them to `__c` fields
    #[arg(long)]
    pub no_custom_fields: bool,
}

impl SourceArgs {
    pub fn transformer(&self) -> SalesforceDataTransformer {
        SalesforceDataTransformer::new().with_custom_fields(!self.no_custom_fields)
    }

    pub async fn read(&self) -> Result<Vec<Value>> {
        read_records(&self.input, self.format).await
    }
}

#[derive(Debug, Args)]
pub struct TransformCommand {
    #[command(flatten)]
    source: SourceArgs,

    /// Write the records here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only emit records that pass validation
    #[arg(long)]
    valid_only: bool,
}

impl TransformCommand {
    pub async fn execute(self) -> Result<()> {
        let sources = self.source.read().await?;
        let records = self
            .source
            .transformer()
            .transform_batch(self.source.object, &sources);

        let records = if self.valid_only {
            let report = validate_batch(self.source.object, records);
            if !report.invalid.is_empty() {
                eprintln!(
                    "{} skipped {} invalid record(s)",
                    style("!").yellow(),
                    report.invalid.len()
                );
            }
            report.valid_records()
        } else {
            records
        };

        let rendered = serde_json::to_string_pretty(&records)?;
        match &self.output {
            Some(path) => {
                tokio::fs::write(path, format!("{}\n", rendered))
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!(
                    "{} wrote {} {} record(s) to {}",
                    style("✓").green(),
                    records.len(),
                    self.source.object,
                    path.display()
                );
            }
            None => println!("{}", rendered),
        }
        Ok(())
    }
}
