mod company;
mod config;
mod db;
mod discovery;
mod email;
mod error;
mod fetcher;
mod limiter;
mod listings;
mod models;
mod pipeline;
mod retry;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use db::{Database, UpsertOutcome};
use pipeline::Pipeline;
use server::{RunCoordinator, Trigger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reachout")]
#[command(about = "Find hiring companies' websites and contact emails from job listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run the pipeline once over the configured listing pages
    Run {
        /// First listing page (overrides START_PAGE)
        #[arg(long)]
        start_page: Option<u32>,

        /// Last listing page, inclusive (overrides END_PAGE)
        #[arg(long)]
        end_page: Option<u32>,
    },

    /// Serve trigger/health endpoints and re-run on a schedule
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List stored records
    List {
        /// Filter by company name
        #[arg(short, long)]
        company: Option<String>,
    },

    /// Show one stored record
    Show {
        /// Record ID
        id: i64,
    },

    /// Write all stored records to a JSON file
    Export {
        /// Output path (defaults to a timestamped file in the current directory)
        path: Option<PathBuf>,
    },

    /// Load records from a JSON file written by `export`
    Import {
        /// Input path
        #[arg(default_value = "job_data.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reachout=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    let db = Database::open(config.database_url.as_deref(), config.merge_policy)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
            println!("{} record(s) stored", db.count_records()?);
        }

        Commands::Run { start_page, end_page } => {
            db.ensure_initialized()?;
            if let Some(page) = start_page {
                config.start_page = page;
            }
            if let Some(page) = end_page {
                config.end_page = page;
            }
            info!(
                start_page = config.start_page,
                end_page = config.end_page,
                policy = %db.policy(),
                "Running pipeline from the command line"
            );

            let pipeline = Pipeline::from_config(&config, Arc::new(db))?;
            let coordinator = RunCoordinator::new(Arc::new(pipeline));
            if let Some(summary) = coordinator.run_now(Trigger::Cli).await {
                println!("{}", summary);
            }
        }

        Commands::Serve { port } => {
            // The server owns its schema; don't make deployments run init first
            db.init()?;
            if let Some(port) = port {
                config.port = port;
            }

            let pipeline = Pipeline::from_config(&config, Arc::new(db))?;
            let coordinator = RunCoordinator::new(Arc::new(pipeline));
            server::serve(coordinator, &config).await?;
        }

        Commands::List { company } => {
            db.ensure_initialized()?;
            let records = db.list_records(company.as_deref())?;
            if records.is_empty() {
                println!("No records found.");
            } else {
                println!("{:<6} {:<28} {:<20} {:<7} {:<30}", "ID", "COMPANY", "LOCATION", "EMAILS", "FIRST EMAIL");
                println!("{}", "-".repeat(95));
                for record in records {
                    println!(
                        "{:<6} {:<28} {:<20} {:<7} {:<30}",
                        record.id,
                        truncate(&record.company_name, 26),
                        truncate(&record.location, 18),
                        record.emails.len(),
                        truncate(record.emails.first().map(String::as_str).unwrap_or("-"), 30)
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_record(id)? {
                Some(record) => {
                    println!("Record #{}", record.id);
                    println!("Company: {}", record.company_name);
                    if let Some(info) = &record.company_info {
                        println!("Site title: {}", info);
                    }
                    println!("Location: {}", record.location);
                    println!("Listed: {}", record.listing_date);
                    if let Some(careers) = &record.careers_page {
                        println!("Careers page: {}", careers);
                    }
                    if record.emails.is_empty() {
                        println!("Emails: -");
                    } else {
                        println!("Emails: {}", record.emails.join(", "));
                    }
                    if !record.scanned_pages.is_empty() {
                        println!("\nScanned pages:");
                        for page in &record.scanned_pages {
                            println!("  {}", page);
                        }
                    }
                    println!("Updated: {}", record.updated_at);
                    println!("\n--- Description ---\n{}", textwrap::fill(&record.job_description, 80));
                }
                None => {
                    println!("Record #{} not found.", id);
                }
            }
        }

        Commands::Export { path } => {
            db.ensure_initialized()?;
            let path = path.unwrap_or_else(|| {
                PathBuf::from(format!("job_data_{}.json", chrono::Local::now().format("%Y%m%d_%H%M%S")))
            });
            let count = db.export_json(&path)?;
            println!("Exported {} record(s) to {}", count, path.display());
        }

        Commands::Import { path } => {
            db.ensure_initialized()?;
            let outcomes = db.import_json(&path)?;
            let (mut inserted, mut updated, mut skipped, mut failed) = (0, 0, 0, 0);
            for outcome in &outcomes {
                match outcome {
                    Ok(UpsertOutcome::Inserted(_)) => inserted += 1,
                    Ok(UpsertOutcome::Updated(_)) => updated += 1,
                    Ok(UpsertOutcome::Skipped(_)) => skipped += 1,
                    Err(_) => failed += 1,
                }
            }
            println!(
                "Imported {} record(s) from {} ({} inserted, {} updated, {} skipped, {} failed; policy: {})",
                outcomes.len(),
                path.display(),
                inserted,
                updated,
                skipped,
                failed,
                db.policy()
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
