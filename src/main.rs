use anyhow::{Context, Result};
use bear::config::Config;
use bear::extension::{ExtensionRegistry, Pipeline, BUILTINS};
use bear::feed::{MailSettings, PollOutcome};
use bear::notify::SmtpNotifier;
use bear::storage::{Database, DatabaseError, Feed};
use bear::App;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bear", version, about = "Polls RSS/Atom feeds and emails new entries")]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "PATH", default_value = "bear.toml")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file and create the database
    Init,
    /// Subscribe to a feed
    Add { url: String },
    /// Unsubscribe from a feed
    Delete { id: i64 },
    /// Forget when a feed was last updated so its entries are sent again
    Reset { id: i64 },
    /// List subscribed feeds
    List,
    /// Poll one feed, or every feed when no id is given
    Fetch { id: Option<i64> },
    /// Describe the available extensions
    Extensions,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bear=debug" } else { "bear=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn open_database(path: &str) -> Result<Database> {
    match Database::open(path).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database at {path} is locked by another bear process.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database {}: {}", path, e)),
    }
}

fn print_feed(feed: &Feed) {
    let updated = feed
        .updated
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("{:>4}  {:<16}  {}", feed.id, updated, feed.url);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Init => {
            if Config::write_default(&args.config).context("Failed to write config file")? {
                println!("Wrote {}", args.config.display());
            } else {
                println!("{} already exists, leaving it alone", args.config.display());
            }
            let config = Config::load(&args.config).context("Failed to load config")?;
            let db = open_database(&config.settings.db_path).await?;
            db.close().await;
            println!("Database ready at {}", config.settings.db_path);
            return Ok(());
        }
        Command::Extensions => {
            for builtin in BUILTINS {
                println!("{}\n", builtin.help.trim_end());
            }
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let registry = ExtensionRegistry::load(&config.settings.extensions, &config.extension)
        .context("Failed to load extensions")?;
    tracing::debug!(extensions = ?registry.names().collect::<Vec<_>>(), "Extensions loaded");

    let db = open_database(&config.settings.db_path).await?;
    let notifier = SmtpNotifier::new(&config.email).context("Invalid email settings")?;
    let mail = MailSettings {
        sender: config.email.from.clone(),
        recipients: config.email.to.clone(),
    };
    let app = App::new(db.clone(), Pipeline::new(registry), Arc::new(notifier), mail)
        .context("Failed to create application")?;

    let result = run(&app, args.command).await;
    db.close().await;
    result
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Add { url } => {
            let added = app.add_feed(&url).await.context("Failed to add feed")?;
            match (added.created, added.feed) {
                (true, Some(feed)) => println!("Added feed {} ({})", feed.id, feed.url),
                (false, Some(feed)) => println!("Already subscribed: {} ({})", feed.id, feed.url),
                (_, None) => println!("No feed added"),
            }
        }
        Command::Delete { id } => match app.delete_feed(id).await.context("Failed to delete feed")? {
            Some(feed) => println!("Deleted feed {} ({})", feed.id, feed.url),
            None => println!("No feed with id {id}"),
        },
        Command::Reset { id } => match app.reset_feed(id).await.context("Failed to reset feed")? {
            Some(feed) => println!("Reset feed {} ({})", feed.id, feed.url),
            None => println!("No feed with id {id}"),
        },
        Command::List => {
            let feeds = app.list_feeds().await.context("Failed to list feeds")?;
            if feeds.is_empty() {
                println!("No feeds. Add one with `bear add <url>`.");
            }
            for feed in &feeds {
                print_feed(feed);
            }
        }
        Command::Fetch { id: Some(id) } => {
            match app
                .fetch_feed(id)
                .await
                .with_context(|| format!("Failed to fetch feed {id}"))?
            {
                PollOutcome::UnknownFeed => println!("No feed with id {id}"),
                PollOutcome::UpToDate => println!("Feed {id} is up to date"),
                PollOutcome::Delivered { sent } => println!("Feed {id}: sent {sent} email(s)"),
            }
        }
        Command::Fetch { id: None } => {
            let reports = app.fetch_all().await.context("Failed to fetch feeds")?;
            let failed = reports.iter().filter(|r| r.result.is_err()).count();
            let sent: usize = reports
                .iter()
                .filter_map(|r| match r.result {
                    Ok(PollOutcome::Delivered { sent }) => Some(sent),
                    _ => None,
                })
                .sum();
            println!("Polled {} feed(s), sent {} email(s)", reports.len(), sent);
            if failed > 0 {
                anyhow::bail!("{failed} feed(s) failed to poll");
            }
        }
        Command::Init | Command::Extensions => {}
    }
    Ok(())
}
