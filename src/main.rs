use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use contact_etl::config::Config;
use contact_etl::constants::STATUS_USED;
use contact_etl::logging;
use contact_etl::pipeline::{LoadOrchestrator, RunMode};
use contact_etl::reporting;
use contact_etl::storage::SqliteStore;

#[derive(Parser)]
#[command(name = "contact_etl")]
#[command(about = "Load contact exports into a deduplicated contact store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ETL pipeline over every file in the source directory
    Run {
        /// Run every stage without writing to the database or moving files
        #[arg(long)]
        dry_run: bool,
        /// Only print warnings and errors to the console
        #[arg(long)]
        quiet: bool,
    },
    /// Create the database tables if they do not exist
    SetupDatabase,
    /// Show the most recent contacts
    ViewContacts {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show the total number of contacts
    CountContacts,
    /// Export all contacts to a CSV file
    ExportContacts {
        #[arg(long, default_value = "contact_export.csv")]
        filename: PathBuf,
    },
    /// Show every discovered input profile
    ViewProfiles,
    /// Show the full audit report for one contact
    AuditContact {
        #[arg(long, required_unless_present = "phone", conflicts_with = "phone")]
        id: Option<i64>,
        /// Look the contact up by phone number instead of ID
        #[arg(long)]
        phone: Option<String>,
    },
    /// List files waiting for manual duplicate review
    CheckReviewFolder,
    /// List files of duplicates dropped during cleaning
    CheckDroppedDuplicates,
    /// Mark contacts as used from a file of phone numbers, one per line
    UpdateStatus {
        input_file: PathBuf,
    },
    /// Mark contacts as used from the phone columns of a folder of CSV exports
    BatchUpdate {
        input_dir: PathBuf,
        /// Only report how many phone numbers are already in the database
        #[arg(long)]
        report_only: bool,
        /// Tag applied to the updated contacts
        #[arg(long, default_value = STATUS_USED)]
        tag: String,
    },
    /// Delete all contacts and profiles
    ResetDatabase {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn open_store() -> anyhow::Result<SqliteStore> {
    let url = Config::database_url().context("Database not configured")?;
    let store = SqliteStore::open_url(&url)
        .with_context(|| format!("Failed to open contact store at {url}"))?;
    Ok(store)
}

fn open_store_read_only() -> anyhow::Result<Option<SqliteStore>> {
    let url = Config::database_url().context("Database not configured")?;
    let store = SqliteStore::open_url_read_only(&url)
        .with_context(|| format!("Failed to open contact store at {url}"))?;
    Ok(store)
}

fn run_pipeline(config: &Config, dry_run: bool, quiet: bool) -> anyhow::Result<()> {
    let mode = if dry_run { RunMode::DryRun } else { RunMode::Live };
    let orchestrator = LoadOrchestrator::from_config(config, mode, quiet);

    let mut store = if dry_run {
        // a dry run only reads the store to seed dedup
        match open_store_read_only() {
            Ok(Some(store)) => Some(store),
            Ok(None) => {
                warn!("Dry run continues without existing contacts: no database file yet");
                None
            }
            Err(e) => {
                warn!("Dry run continues without existing contacts: {:#}", e);
                None
            }
        }
    } else {
        Some(open_store().context("Halting execution")?)
    };

    let summary = orchestrator.run(store.as_mut())?;

    if !quiet {
        println!("\n📊 Run summary:");
        for file in &summary.files {
            println!(
                "   {}: {} rows, {} invalid, {} dropped, {} known phones, {} for review, {} accepted, {} loaded{}",
                file.file_name,
                file.rows_extracted,
                file.invalid,
                file.dropped_duplicates,
                file.exact_duplicates,
                file.held_for_review,
                file.accepted,
                file.persisted,
                file.error
                    .as_deref()
                    .map(|e| format!(" (error: {e})"))
                    .unwrap_or_default()
            );
        }
    }

    if let Some(run) = &summary.run {
        if run.has_failed() {
            bail!("ETL run {:?} finished with failures", run.id);
        }
    }
    Ok(())
}

fn check_folder(dir: &str, title: &str, empty_message: &str) {
    reporting::check_folder(Path::new(dir), title, empty_message);
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let quiet = matches!(cli.command, Commands::Run { quiet: true, .. });
    let _guard = logging::init_logging(Path::new(&config.log_file), quiet);
    info!("contact_etl starting");

    let result = match cli.command {
        Commands::Run { dry_run, quiet } => run_pipeline(&config, dry_run, quiet),
        Commands::SetupDatabase => {
            info!("Starting database setup...");
            open_store()?;
            info!("Database setup completed successfully.");
            println!("✅ Database schema is ready");
            Ok(())
        }
        Commands::ViewContacts { limit } => {
            reporting::view_contacts(&open_store()?, limit)?;
            Ok(())
        }
        Commands::CountContacts => {
            reporting::count_contacts(&open_store()?)?;
            Ok(())
        }
        Commands::ExportContacts { filename } => {
            reporting::export_contacts(&open_store()?, &filename)?;
            Ok(())
        }
        Commands::ViewProfiles => Ok(reporting::view_profiles(&open_store()?)?),
        Commands::AuditContact { id, phone } => {
            let store = open_store()?;
            match (id, phone) {
                (Some(id), _) => {
                    if !reporting::audit_contact(&store, id)? {
                        bail!("No contact found with ID {id}");
                    }
                }
                (None, Some(phone)) => {
                    if !reporting::audit_contact_by_phone(&store, &phone)? {
                        bail!("No contact found with phone number {phone}");
                    }
                }
                (None, None) => bail!("Pass --id or --phone"),
            }
            Ok(())
        }
        Commands::CheckReviewFolder => {
            check_folder(
                &config.review_directory,
                "Files for Manual Review",
                "Review folder is empty. No files need manual review.",
            );
            Ok(())
        }
        Commands::CheckDroppedDuplicates => {
            check_folder(
                &config.dropped_duplicates_directory,
                "Dropped Duplicate Files",
                "Dropped duplicates folder is empty.",
            );
            Ok(())
        }
        Commands::UpdateStatus { input_file } => {
            info!("--- Starting Contact Status Update from file: {} ---", input_file.display());
            let phones = reporting::read_phone_list(&input_file)
                .with_context(|| format!("Failed to read {}", input_file.display()))?;
            reporting::update_status(&mut open_store()?, &phones, STATUS_USED)?;
            Ok(())
        }
        Commands::BatchUpdate {
            input_dir,
            report_only,
            tag,
        } => {
            reporting::batch_update(&mut open_store()?, &input_dir, report_only, &tag)?;
            Ok(())
        }
        Commands::ResetDatabase { yes } => {
            if !yes {
                println!("⚠️  This deletes ALL contacts and profiles. Re-run with --yes to confirm.");
                bail!("reset-database requires --yes");
            }
            reporting::reset_database(&mut open_store()?)?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
