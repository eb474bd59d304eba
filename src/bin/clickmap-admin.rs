use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use clickmap::analytics::{Aggregator, LocationNames};
use clickmap::config::Config;
use clickmap::models::VisitEvent;
use clickmap::storage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clickmap-admin")]
#[command(about = "Clickmap admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Promote a user to admin
    Promote {
        /// User ID (sub claim of the session token)
        user_id: String,
    },
    /// Demote a user from admin
    Demote {
        /// User ID (sub claim of the session token)
        user_id: String,
    },
    /// List all promoted admins
    ListAdmins,
    /// Print the analytics report for a short code
    Report {
        short_code: String,
        /// Print the flat dashboard template context instead
        #[arg(long)]
        template: bool,
    },
    /// Append visits from a JSON array file to an existing short code
    Import {
        short_code: String,
        /// Path to a JSON file holding an array of visit records
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = storage::connect(&config.database).await?;

    match cli.command {
        Commands::Promote { user_id } => {
            storage.promote_to_admin(&user_id).await?;
            println!("✓ Promoted user '{}' to admin", user_id);
        }
        Commands::Demote { user_id } => {
            if storage.demote_from_admin(&user_id).await? {
                println!("✓ Demoted user '{}' from admin", user_id);
            } else {
                println!("⚠ User '{}' was not an admin", user_id);
            }
        }
        Commands::ListAdmins => {
            let admins = storage.list_admins().await?;
            if admins.is_empty() {
                println!("No promoted admins found.");
            } else {
                println!("Promoted admins:");
                println!("{}", "-".repeat(40));
                for user_id in admins {
                    println!("{}", user_id);
                }
            }
        }
        Commands::Report {
            short_code,
            template,
        } => {
            storage
                .get(&short_code)
                .await?
                .with_context(|| format!("short code '{short_code}' not found"))?;

            let history = storage.visits(&short_code).await?;
            let aggregator =
                Aggregator::new(LocationNames::new(), config.analytics.viewer_timezone());
            let report = aggregator.aggregate(&history, Utc::now().timestamp_millis());

            let output = if template {
                serde_json::to_string_pretty(&report.template_context()?)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{}", output);
        }
        Commands::Import { short_code, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let visits: Vec<VisitEvent> =
                serde_json::from_str(&raw).context("file must hold a JSON array of visits")?;

            for visit in &visits {
                storage
                    .append_visit(&short_code, visit)
                    .await
                    .with_context(|| format!("failed to import visits into '{short_code}'"))?;
            }
            println!("✓ Imported {} visits into '{}'", visits.len(), short_code);
        }
    }

    Ok(())
}
