use anyhow::{bail, Result};
use clap::Args;
use console::style;
use resilience::{Classification, RetryError};
use serde_json::json;

#[derive(Debug, Args)]
pub struct ClassifyCommand {
    /// Error message to classify
    #[arg(required = true)]
    message: Vec<String>,

    /// HTTP status that came with the message; checked before the text
    #[arg(long)]
    status: Option<u16>,

    #[arg(long)]
    json: bool,
}

impl ClassifyCommand {
    pub async fn execute(self) -> Result<()> {
        let message = self.message.join(" ");
        if message.trim().is_empty() {
            bail!("Nothing to classify");
        }

        let error = match self.status {
            Some(status) => RetryError::from_status_code(status, message),
            None => RetryError::from_message(message),
        };
        let classification = Classification::of(error.kind);

        if self.json {
            let out = json!({
                "kind": classification.kind,
                "severity": classification.severity,
                "retryable": classification.retryable,
                "user_message": classification.kind.user_message(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        let retry = if classification.retryable {
            style("retryable").green()
        } else {
            style("not retryable").red()
        };
        println!(
            "{} {} ({} severity, {})",
            style("●").cyan(),
            style(classification.kind).bold(),
            classification.severity,
            retry
        );
        println!("  {}", classification.kind.user_message());
        Ok(())
    }
}
