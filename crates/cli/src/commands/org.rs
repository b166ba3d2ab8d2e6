use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use crate::context::AppContext;
use crate::progress::ProgressType;

#[derive(Debug, Args)]
pub struct OrgCommand {
    #[command(subcommand)]
    command: OrgSubcommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum OrgSubcommand {
    /// Run a SOQL query and print every page of results as JSON
    #[command(name = "query")]
    Query { soql: String },
    /// Show the fields of an object
    #[command(name = "describe")]
    Describe {
        /// API name, e.g. Contact or Legacy_Account__c
        object: String,
        /// Only fields that must be set on insert
        #[arg(long)]
        required: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show remaining API limits
    #[command(name = "limits")]
    Limits,
}

impl OrgCommand {
    pub async fn execute(self, app: &AppContext) -> Result<()> {
        let client = app.salesforce().await?;

        match self.command {
            OrgSubcommand::Query { soql } => {
                let spinner = ProgressType::Request.create_spinner("Querying...");
                let records = client.query(&soql).await;
                spinner.finish_and_clear();
                let records = records?;
                println!("{}", serde_json::to_string_pretty(&records)?);
                eprintln!("{} {} record(s)", style("✓").green(), records.len());
            }
            OrgSubcommand::Describe {
                object,
                required,
                json,
            } => {
                let spinner = ProgressType::Request.create_spinner("Describing...");
                let describe = client.describe(&object).await;
                spinner.finish_and_clear();
                let describe = describe?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&describe)?);
                    return Ok(());
                }

                println!(
                    "{} {} ({})",
                    style("●").cyan(),
                    style(&describe.name).bold(),
                    describe.label
                );
                let fields: Vec<_> = if required {
                    describe.required_on_create().collect()
                } else {
                    describe.fields.iter().collect()
                };
                for field in fields {
                    let marker = if field.createable && !field.nillable {
                        style("*").red()
                    } else {
                        style(" ")
                    };
                    println!(
                        "  {} {:<40} {:<12} {}",
                        marker, field.name, field.field_type, field.label
                    );
                }
            }
            OrgSubcommand::Limits => {
                let limits = client.limits().await?;
                for (name, limit) in &limits {
                    println!(
                        "  {:<40} {:>10} / {}",
                        name,
                        style(limit.remaining).bold(),
                        limit.max
                    );
                }
            }
        }
        Ok(())
    }
}
