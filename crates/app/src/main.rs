use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comanda::Reconciler;
use comanda_core::ReconcileConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "comanda")]
#[command(about = "Reconcile point-of-sale exports against the menu catalog")]
#[command(version)]
struct Cli {
    /// SQLite database holding the catalog and staged imports
    #[arg(long, global = true, env = "COMANDA_DB", default_value = "comanda.db")]
    db: PathBuf,

    /// TOML file overriding matching and approval policy
    #[arg(long, global = true, env = "COMANDA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stage a parsed sales export (JSON) for review
    Stage {
        file: PathBuf,
    },
    /// List staged and past imports
    Imports,
    /// Show the review payload of an import
    Lines {
        import: i64,
    },
    /// Rank catalog candidates for a line
    Suggest {
        import: i64,
        line: i64,
        /// Free-text query used instead of the line's description
        query: Option<String>,
    },
    /// Link a line to a catalog item
    SetMatch {
        import: i64,
        line: i64,
        item: i64,
    },
    /// Unlink a line so it is skipped on approval
    ClearMatch {
        import: i64,
        line: i64,
    },
    /// Re-run automatic matching for lines nobody overrode
    Rematch {
        import: i64,
    },
    /// Commit matched lines as sale records
    Approve {
        import: i64,
        /// Catalog items whose price is updated to the file price
        #[arg(long = "sync", value_name = "ITEM")]
        sync: Vec<i64>,
    },
    /// Discard an import's staged lines
    Reject {
        import: i64,
    },
    /// Line counts and declared-total reconciliation
    Summary {
        import: i64,
    },
    /// Load catalog items from a JSON array
    CatalogImport {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReconcileConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ReconcileConfig::default(),
    };

    let db = comanda_storage::create_db(&cli.db)
        .await
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    tracing::debug!("Using database {}", cli.db.display());

    let reconciler = Reconciler::new(db, config);

    match cli.command {
        Command::Stage { file } => commands::stage(&reconciler, &file).await,
        Command::Imports => commands::imports(&reconciler).await,
        Command::Lines { import } => commands::lines(&reconciler, import).await,
        Command::Suggest { import, line, query } => {
            commands::suggest(&reconciler, import, line, query.as_deref()).await
        }
        Command::SetMatch { import, line, item } => commands::set_match(&reconciler, import, line, item).await,
        Command::ClearMatch { import, line } => commands::clear_match(&reconciler, import, line).await,
        Command::Rematch { import } => commands::rematch(&reconciler, import).await,
        Command::Approve { import, sync } => commands::approve(&reconciler, import, &sync).await,
        Command::Reject { import } => commands::reject(&reconciler, import).await,
        Command::Summary { import } => commands::summary(&reconciler, import).await,
        Command::CatalogImport { file } => commands::catalog_import(&reconciler, &file).await,
    }
}
