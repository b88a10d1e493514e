use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folder_index::platform::InMemoryCatalog;
use folder_index::state::{StaticPreferences, UserPreferences};
use folder_index::{FolderIndex, IndexConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "folder-index", about = "Index and cache the media folders of a storage tree")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSON file with the permanently-sorted and processed path sets
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,
    /// Storage root, overriding the configuration
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Folder cache database, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List media folders with counts and sizes
    Folders {
        /// Drop the cache and rescan the whole tree
        #[arg(long)]
        refresh: bool,
    },
    /// List folders without media
    Empty,
    /// Stream the media of the given folders, newest first
    Fetch {
        #[arg(required = true)]
        folders: Vec<PathBuf>,
    },
    /// Stream every media file under the root in traversal order
    Walk {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Reconcile the cache with the filesystem, as on app resume
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => IndexConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => IndexConfig::default(),
    };
    if let Some(root) = cli.root {
        config.storage_root = root;
    }
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let prefs: Arc<dyn UserPreferences> = match &cli.prefs {
        Some(path) => Arc::new(
            StaticPreferences::load(path)
                .with_context(|| format!("loading preferences from {}", path.display()))?,
        ),
        None => Arc::new(StaticPreferences::new()),
    };

    // Desktop hosts have no platform media index
    let catalog = Arc::new(InMemoryCatalog::new());
    let index = FolderIndex::open(config, catalog, prefs).context("opening folder index")?;

    match cli.command {
        Command::Folders { refresh } => {
            let folders = index.get_folders_with_details(refresh).await?;
            for folder in &folders {
                let tag = match (folder.is_primary_system, folder.is_system) {
                    (true, _) => "primary",
                    (false, true) => "system",
                    _ => "",
                };
                println!(
                    "{:>6} {:>12} {:<8} {}",
                    folder.item_count,
                    folder.total_size,
                    tag,
                    folder.path.display()
                );
            }
            println!("{} folders", folders.len());
        }
        Command::Empty => {
            for folder in index.empty_folders().await? {
                println!("{}", folder.path.display());
            }
        }
        Command::Fetch { folders } => {
            let mut batches = index.fetch_folders(folders);
            let mut total = 0;
            while let Some(batch) = batches.next().await {
                total += batch.len();
                for item in batch {
                    println!(
                        "{}  {}x{}  {}  {}",
                        item.date_modified.format("%Y-%m-%d %H:%M:%S"),
                        item.width,
                        item.height,
                        item.mime_type,
                        item.path.display()
                    );
                }
            }
            println!("{} items", total);
        }
        Command::Walk { limit } => {
            let items = index.fetch_all();
            let mut items = match limit {
                Some(limit) => items.take(limit).boxed(),
                None => items.boxed(),
            };
            while let Some(item) = items.next().await {
                println!("{}", item.path.display());
            }
        }
        Command::Check => {
            let changed = index.handle_resume().await?;
            println!("{}", if changed { "changed" } else { "unchanged" });
        }
    }

    Ok(())
}
