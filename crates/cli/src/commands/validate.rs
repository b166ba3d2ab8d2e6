use anyhow::{bail, Result};
use clap::Args;
use console::style;
use salesforce::validate_batch;
use serde_json::Value;

use super::transform::SourceArgs;

#[derive(Debug, Args)]
pub struct ValidateCommand {
    #[command(flatten)]
    source: SourceArgs,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Exit with an error when any record is invalid
    #[arg(long)]
    strict: bool,
}

impl ValidateCommand {
    pub async fn execute(self) -> Result<()> {
        let object = self.source.object;
        let sources = self.source.read().await?;
        let records = self.source.transformer().transform_batch(object, &sources);
        let report = validate_batch(object, records);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "{} {} {} record(s): {} valid, {} invalid",
                style("●").cyan(),
                style(object).bold(),
                report.total(),
                style(report.valid.len()).green(),
                style(report.invalid.len()).red()
            );
            for invalid in &report.invalid {
                let id = match sources.get(invalid.index).and_then(|s| s.get("id")) {
                    Some(Value::String(id)) => id.clone(),
                    Some(Value::Number(id)) => id.to_string(),
                    _ => format!("#{}", invalid.index),
                };
                println!("  {} {}: {}", style("✗").red(), id, invalid.message());
            }
        }

        if self.strict && !report.is_clean() {
            bail!("{} invalid record(s)", report.invalid.len());
        }
        Ok(())
    }
}
