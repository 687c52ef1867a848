// contactbook: desktop CLI
//
// Cross-platform (macOS, Linux, Windows) command-line front end for the
// contact book. The terminal plays the picker, the renderer and the toast.

mod config;
mod vcard;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use contactbook_core::{
    ContactBookError, ContactFields, ContactStore, ContactSyncController, ImportOutcome,
    KvContactStore, UserNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "contactbook")]
#[command(about = "Contact Book: local contacts with vCard import", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored contacts
    List,
    /// Add a contact
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        phone: String,
        #[arg(short, long)]
        email: String,
    },
    /// Replace fields of an existing contact
    Update {
        id: u64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        phone: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Remove a contact by id
    Remove { id: u64 },
    /// Import a contact from a vCard file
    Import {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

/// Prints controller errors the way a toast would show them.
struct TerminalNotifier;

impl UserNotifier for TerminalNotifier {
    fn notify_error(&self, error: &ContactBookError) {
        eprintln!("{} {}", "✗".red(), error.to_string().red());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _log_guard = init_logging(&config)?;

    match cli.command {
        Commands::List => cmd_list(&config).await,
        Commands::Add { name, phone, email } => cmd_add(&config, name, phone, email).await,
        Commands::Update { id, name, phone, email } => cmd_update(&config, id, name, phone, email).await,
        Commands::Remove { id } => cmd_remove(&config, id).await,
        Commands::Import { file } => cmd_import(&config, file).await,
        Commands::Config { action } => cmd_config(config, action).await,
    }
}

fn init_logging(config: &config::Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if config.log_to_file {
        let log_dir = config::Config::data_dir()?.join("logs");
        let appender = tracing_appender::rolling::daily(log_dir, "contactbook.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        Ok(None)
    }
}

fn open_store(config: &config::Config) -> Result<Arc<KvContactStore>> {
    let storage_dir = config.storage_dir()?;
    tracing::debug!("Using contact storage at {}", storage_dir.display());
    let store = KvContactStore::open(&storage_dir, &config.database_name)
        .with_context(|| format!("Failed to open contacts in {}", storage_dir.display()))?;
    Ok(Arc::new(store))
}

fn build_controller(store: Arc<KvContactStore>, file: Option<PathBuf>) -> Result<ContactSyncController> {
    let controller = ContactSyncController::builder(
        store,
        Arc::new(vcard::VcardPicker::new(file)),
        Arc::new(vcard::VcardExtractor),
    )
    .notifier(Arc::new(TerminalNotifier))
    .build()?;
    Ok(controller)
}

fn print_rows(controller: &ContactSyncController) -> Result<()> {
    let count = controller.row_count();
    if count == 0 {
        println!("{}", "No contacts yet.".dimmed());
        return Ok(());
    }

    println!("{} ({} total)", "Contacts".bold(), count);
    println!();
    for index in 0..count {
        let contact = controller.row_at(index as i64)?;
        println!(
            "  {} {} {}",
            format!("#{}", contact.id).dimmed(),
            "•".bright_green(),
            contact.name.bright_cyan()
        );
        println!("      Phone: {}", contact.phone_number);
        println!("      Email: {}", contact.email);
    }
    Ok(())
}

async fn cmd_list(config: &config::Config) -> Result<()> {
    let controller = build_controller(open_store(config)?, None)?;
    controller.refresh().await??;
    print_rows(&controller)
}

async fn cmd_add(config: &config::Config, name: String, phone: String, email: String) -> Result<()> {
    let store = open_store(config)?;
    let controller = build_controller(store.clone(), None)?;

    let contact = controller
        .add_contact(ContactFields {
            name,
            phone_number: phone,
            email,
        })
        .await??;
    store.flush()?;

    println!("{} Contact added:", "✓".green());
    println!("  Id:   {}", contact.id);
    println!("  Name: {}", contact.name.bright_cyan());
    Ok(())
}

async fn cmd_update(
    config: &config::Config,
    id: u64,
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let store = open_store(config)?;
    let Some(mut contact) = store.get(id)? else {
        anyhow::bail!("No contact with id {}", id);
    };

    if let Some(name) = name {
        contact.name = name;
    }
    if let Some(phone) = phone {
        contact.phone_number = phone;
    }
    if let Some(email) = email {
        contact.email = email;
    }

    let controller = build_controller(store.clone(), None)?;
    if !controller.update_contact(contact.clone()).await?? {
        anyhow::bail!("Contact {} disappeared before it could be updated", id);
    }
    store.flush()?;

    println!("{} Updated contact: {}", "✓".green(), contact.name.bright_cyan());
    Ok(())
}

async fn cmd_remove(config: &config::Config, id: u64) -> Result<()> {
    let store = open_store(config)?;
    let Some(contact) = store.get(id)? else {
        anyhow::bail!("No contact with id {}", id);
    };

    let controller = build_controller(store.clone(), None)?;
    controller.delete_contact(contact.clone()).await??;
    store.flush()?;

    println!("{} Removed contact: {}", "✓".green(), contact.name.bright_cyan());
    Ok(())
}

async fn cmd_import(config: &config::Config, file: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    let controller = build_controller(store.clone(), file)?;

    let outcome = controller
        .import_contact()
        .await?
        .context("Import did not complete")?;
    store.flush()?;

    match outcome {
        ImportOutcome::Imported(contact) => {
            println!("{} Imported {} (#{})", "✓".green(), contact.name.bright_cyan(), contact.id);
            println!();
            print_rows(&controller)?;
        }
        ImportOutcome::Cancelled => println!("{}", "Import cancelled.".dimmed()),
        ImportOutcome::PickFailed(reason) => println!("{} {}", "Import failed:".yellow(), reason),
        ImportOutcome::Busy => println!("{}", "An import is already running.".dimmed()),
    }
    Ok(())
}

async fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> config::Config {
        config::Config {
            storage_path: Some(dir.to_string_lossy().into_owned()),
            ..config::Config::default()
        }
    }

    #[tokio::test]
    async fn test_failed_import_returns_error_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        cmd_add(&config, "Alice".to_string(), "555".to_string(), "alice@example.com".to_string())
            .await
            .unwrap();

        let card = dir.path().join("no-email.vcf");
        std::fs::write(&card, "BEGIN:VCARD\nFN:No Email\nTEL:1\nEND:VCARD\n").unwrap();

        let err = cmd_import(&config, Some(card)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("vCard has no email"));

        let store = open_store(&config).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_from_file_adds_contact() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let card = dir.path().join("jane.vcf");
        std::fs::write(&card, "BEGIN:VCARD\nFN:Jane Roe\nTEL:555-0100\nEMAIL:jane@example.com\nEND:VCARD\n")
            .unwrap();
        cmd_import(&config, Some(card)).await.unwrap();

        let store = open_store(&config).unwrap();
        let rows = store.get_all_contacts().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Jane Roe");
    }
}
