//! cmsbridge CLI - Command line interface for the content sync workflow.
//!
//! This tool drives the connect, select space, compile and import steps
//! against a local directory store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cmsbridge_common::{RecordId, SpaceId};
use cmsbridge_remote::ClientConfig;
use cmsbridge_storage::LocalStore;
use cmsbridge_sync::{Notices, PushOutcome, SyncEngine, SyncOptions};

#[derive(Parser)]
#[command(name = "cmsbridge")]
#[command(about = "cmsbridge - Keep remote entries and local records in sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory of the local store.
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Locale read from and written to the remote store.
    #[arg(long, default_value = "en-US")]
    locale: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the OAuth client id and open the authorization page.
    Authorize {
        /// Client id of the OAuth application.
        #[arg(short, long)]
        client_id: String,

        /// Redirect URL registered for the application.
        #[arg(short, long)]
        redirect_url: String,

        /// Print the URL without opening a browser.
        #[arg(long)]
        no_browser: bool,
    },

    /// Finish authorization from the callback URL or its fragment.
    Token {
        /// Callback URL, or just `#access_token=...`.
        callback: String,
    },

    /// Forget the stored access token.
    Disconnect,

    /// List the spaces the token can access.
    Spaces,

    /// Select the space to synchronize.
    SelectSpace {
        /// Space id.
        space: String,
    },

    /// List the content types of the selected space.
    ContentTypes,

    /// Compile content types into local record types.
    Compile {
        /// Content type ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Import entries (default: every compiled content type).
    Import {
        /// Content type ids.
        ids: Vec<String>,
    },

    /// Push a saved record upstream.
    Push {
        /// Record id.
        record: String,
    },

    /// Refresh a record from its remote entry.
    Resync {
        /// Record id.
        record: String,
    },

    /// Show the integration status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = match cli.store {
        Some(path) => path,
        None => default_store()?,
    };
    let store = Arc::new(LocalStore::new(&root).context("Failed to open local store")?);
    let options = SyncOptions {
        locale: cli.locale,
        ..SyncOptions::default()
    };
    let engine = SyncEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        ClientConfig::default(),
        options,
    );

    match cli.command {
        Commands::Authorize {
            client_id,
            redirect_url,
            no_browser,
        } => cmd_authorize(&engine, &client_id, &redirect_url, no_browser).await,

        Commands::Token { callback } => cmd_token(&engine, &callback).await,

        Commands::Disconnect => cmd_disconnect(&engine).await,

        Commands::Spaces => cmd_spaces(&engine).await,

        Commands::SelectSpace { space } => cmd_select_space(&engine, &space).await,

        Commands::ContentTypes => cmd_content_types(&engine).await,

        Commands::Compile { ids } => cmd_compile(&engine, &ids).await,

        Commands::Import { ids } => cmd_import(&engine, ids).await,

        Commands::Push { record } => cmd_push(&engine, &record).await,

        Commands::Resync { record } => cmd_resync(&engine, &record).await,

        Commands::Status => cmd_status(&engine, &store).await,
    }
}

fn default_store() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory on this platform; pass --store")?;
    Ok(base.join("cmsbridge"))
}

fn print_notices(notices: &Notices) {
    for notice in notices.iter() {
        println!("  {}", notice);
    }
}

/// Store the client id and send the operator to the authorization page.
async fn cmd_authorize(
    engine: &SyncEngine,
    client_id: &str,
    redirect_url: &str,
    no_browser: bool,
) -> Result<()> {
    engine
        .set_client_id(client_id)
        .await
        .context("Failed to store client id")?;
    let (url, _state) = engine
        .authorization_url(redirect_url)
        .await
        .context("Failed to build authorization URL")?;

    println!("Authorize cmsbridge at:");
    println!("  {}", url);
    println!("Then run `cmsbridge token <callback-url>`.");

    if !no_browser {
        if let Err(e) = open::that(&url) {
            warn!("Could not open a browser: {}", e);
        }
    }

    Ok(())
}

/// Store the access token from the callback.
async fn cmd_token(engine: &SyncEngine, callback: &str) -> Result<()> {
    engine
        .connect(callback)
        .await
        .context("Failed to read access token")?;

    println!("Connected.");

    Ok(())
}

async fn cmd_disconnect(engine: &SyncEngine) -> Result<()> {
    engine.disconnect().await?;
    println!("Disconnected.");
    Ok(())
}

/// List accessible spaces.
async fn cmd_spaces(engine: &SyncEngine) -> Result<()> {
    let spaces = engine.spaces().await.context("Failed to list spaces")?;
    let selected = engine.settings().await?.space;

    if spaces.is_empty() {
        println!("No spaces available.");
    } else {
        println!("Spaces:");
        for space in spaces {
            let marker = if selected.as_ref().map(SpaceId::as_str) == Some(space.id()) {
                "*"
            } else {
                " "
            };
            println!(" {} {} ({})", marker, space.id(), space.name);
        }
    }

    Ok(())
}

async fn cmd_select_space(engine: &SyncEngine, space: &str) -> Result<()> {
    let space = SpaceId::new(space).context("Invalid space id")?;
    engine
        .select_space(space.clone())
        .await
        .context("Failed to select space")?;

    println!("Selected space {}", space);

    Ok(())
}

/// List content types of the selected space.
async fn cmd_content_types(engine: &SyncEngine) -> Result<()> {
    let content_types = engine
        .content_types()
        .await
        .context("Failed to list content types")?;
    let catalog = engine.settings().await?.catalog;

    if content_types.is_empty() {
        println!("No content types in this space.");
    } else {
        println!("Content types:");
        for content_type in content_types {
            match catalog.record_type_for(content_type.id()) {
                Some(record_type) => println!(
                    "  {} ({}) -> {}",
                    content_type.id(),
                    content_type.name,
                    record_type
                ),
                None => println!("  {} ({})", content_type.id(), content_type.name),
            }
        }
    }

    Ok(())
}

/// Compile content types into record types.
async fn cmd_compile(engine: &SyncEngine, ids: &[String]) -> Result<()> {
    info!("Compiling {} content type(s)", ids.len());

    let report = engine
        .compile_content_types(ids)
        .await
        .context("Failed to compile content types")?;

    println!("Compiled {} content type(s):", report.outcomes.len());
    print_notices(&report.notices);

    Ok(())
}

/// Import entries of the given (or every compiled) content type.
async fn cmd_import(engine: &SyncEngine, ids: Vec<String>) -> Result<()> {
    let ids = if ids.is_empty() {
        engine
            .settings()
            .await?
            .catalog
            .content_types
            .into_keys()
            .collect()
    } else {
        ids
    };
    if ids.is_empty() {
        anyhow::bail!("Nothing to import. Compile a content type first");
    }

    info!("Importing entries of: {}", ids.join(", "));

    let report = engine
        .import_entries(&ids)
        .await
        .context("Failed to import entries")?;

    println!(
        "Imported {} entries ({} new, {} updated, {} skipped) from {} page(s)",
        report.imported(),
        report.inserted,
        report.updated,
        report.skipped,
        report.pages
    );
    print_notices(&report.notices);

    Ok(())
}

/// Push one record upstream.
async fn cmd_push(engine: &SyncEngine, record: &str) -> Result<()> {
    let id = RecordId::new(record);
    let report = engine
        .on_record_saved(&id)
        .await
        .context("Failed to push record")?;

    let saved = match &report.outcome {
        PushOutcome::Skipped(reason) => {
            println!("Record {} not pushed: {:?}", id, reason);
            false
        }
        PushOutcome::Created { remote_id, version } => {
            println!("Created entry {} (version {:?})", remote_id, version);
            true
        }
        PushOutcome::Updated { remote_id, version } => {
            println!("Updated entry {} (version {:?})", remote_id, version);
            true
        }
        PushOutcome::Conflict(_) | PushOutcome::Rejected(_) => {
            println!("Record {} was not saved remotely", id);
            false
        }
    };
    if saved && !report.published {
        println!("The entry was saved but is not published.");
    }
    print_notices(&report.notices);

    Ok(())
}

async fn cmd_resync(engine: &SyncEngine, record: &str) -> Result<()> {
    let id = RecordId::new(record);
    let refreshed = engine
        .resync(&id)
        .await
        .context("Failed to resync record")?;

    if refreshed {
        println!("Record {} refreshed from its remote entry.", id);
    } else {
        println!("Record {} left unchanged.", id);
    }

    Ok(())
}

/// Show the integration status.
async fn cmd_status(engine: &SyncEngine, store: &LocalStore) -> Result<()> {
    let settings = engine.settings().await?;
    let records = store.records().await?;

    println!("Integration status:");
    println!("  Store: {}", store.root().display());
    println!(
        "  Client id: {}",
        settings.client_id.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Connected: {}",
        if settings.access_token.is_some() { "yes" } else { "no" }
    );
    println!(
        "  Space: {}",
        settings
            .space
            .as_ref()
            .map(SpaceId::as_str)
            .unwrap_or("(not selected)")
    );
    println!("  Imported: {}", if settings.imported { "yes" } else { "no" });
    println!("  Record types:");
    for descriptor in settings.catalog.record_types.values() {
        let count = records
            .iter()
            .filter(|record| record.record_type == descriptor.id)
            .count();
        println!(
            "    {} <- {} \"{}\" ({} fields, {} records)",
            descriptor.id,
            descriptor.content_type_id,
            descriptor.label,
            descriptor.field_types.len(),
            count
        );
    }
    println!("  Records: {}", records.len());

    Ok(())
}
