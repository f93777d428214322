//! # Docket CLI (`dkt`)
//!
//! The `dkt` binary is the interface to a Docket archive. It provides
//! commands for preparing the archive tree, adding and listing
//! documents, moving files between the local tree and the remote
//! mirror, and managing the sender/executor registries.
//!
//! ## Usage
//!
//! ```bash
//! dkt --config ./config/docket.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dkt init` | Create the archive directories and an empty catalog |
//! | `dkt add <file>` | Archive a file locally and mirror it to the remote |
//! | `dkt list` | List cataloged documents |
//! | `dkt download <filename>` | Fetch a remote-only document to local disk |
//! | `dkt push <filename>` | Mirror a local-only document to the remote |
//! | `dkt open <filename>` | Open a document with the OS default handler |
//! | `dkt delete <filename>` | Remove a document (pass `--remote` to remove the mirror too) |
//! | `dkt sync` | Repair local drift and discover new remote files |
//! | `dkt status` | Catalog totals and remote reachability |
//! | `dkt sender <add/list/remove>` | Manage the sender registry |
//! | `dkt executor <add/list/remove>` | Manage the executor registry |
//!
//! ## Examples
//!
//! ```bash
//! # Prepare the archive tree
//! dkt init --config ./config/docket.toml
//!
//! # Archive an incoming letter
//! dkt add scan.pdf --doc-type in --number "42-КЛ" --sender "Почта России"
//!
//! # Archive an outgoing letter with the letter's own date
//! dkt add reply.pdf --doc-type out --number 7 --date 2024-03-05 --executor "Иванов"
//!
//! # Pull in documents uploaded from another machine
//! dkt sync
//! dkt list
//!
//! # Fetch one of them
//! dkt download "уведомление.pdf"
//!
//! # Remove a document everywhere
//! dkt delete "письмо.pdf" --remote
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docket::archive::{AddRequest, Archive, DocumentFilter};
use docket::catalog::{format_size, DocType, EntityKind};
use docket::config::{self, RemoteConfig};
use docket::layout::Layout;
use docket::reconcile::SyncReport;
use docket::remote::RemoteStore;
use docket::remote_telegram::TelegramStore;
use docket::remote_webdav::WebdavStore;
use tracing_subscriber::EnvFilter;

/// Docket CLI, a local-first correspondence archive with cloud and
/// chat-backed mirrors.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/docket.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "dkt",
    about = "Docket: a local-first correspondence archive with cloud and chat-backed mirrors",
    version,
    long_about = "Docket keeps incoming and outgoing letters in a local directory tree, \
    records them in a single JSON catalog, and mirrors the files to a WebDAV share or a \
    Telegram chat. A synchronize sweep repairs local drift and discovers files added to \
    the remote out-of-band."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docket.toml`. The storage root and the
    /// remote backend settings are read from this file.
    #[arg(long, global = true, default_value = "./config/docket.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Prepare the archive tree.
    ///
    /// Creates the incoming/outgoing directories under the configured
    /// storage root and writes an empty catalog if none exists. Safe
    /// to run repeatedly.
    Init,

    /// Archive a file.
    ///
    /// Copies the file into the local tree under its direction (and
    /// sender/executor subdirectory), mirrors it to the remote when a
    /// backend is configured, then records it in the catalog. The
    /// upload refuses to overwrite an existing remote object, and a
    /// failed upload rolls the local copy back.
    Add {
        /// The file to archive.
        file: PathBuf,

        /// Document direction: `incoming`/`in` or `outgoing`/`out`.
        #[arg(long)]
        doc_type: DocType,

        /// Registered letter number, e.g. `42-КЛ`. Required.
        #[arg(long)]
        number: String,

        /// Date written on the letter itself (free-form).
        #[arg(long)]
        date: Option<String>,

        /// Sender name. Required for incoming documents; unknown
        /// names are registered on the fly.
        #[arg(long)]
        sender: Option<String>,

        /// Executor name. Required for outgoing documents; unknown
        /// names are registered on the fly.
        #[arg(long)]
        executor: Option<String>,
    },

    /// List cataloged documents.
    ///
    /// Shows every document with its state: `local` (only on this
    /// machine), `remote` (only on the mirror), or `synced` (both).
    List {
        /// Only show one direction: `incoming`/`in` or `outgoing`/`out`.
        #[arg(long)]
        doc_type: Option<DocType>,

        /// Free-text filter matched against filename, sender,
        /// executor, number and letter date.
        #[arg(long)]
        query: Option<String>,
    },

    /// Fetch a remote-only document into the local tree.
    ///
    /// The destination mirrors the remote layout: direction directory
    /// plus the sender/executor subdirectory. The file is staged and
    /// renamed into place, so a failed download leaves nothing behind.
    Download {
        /// Catalog filename of the document.
        filename: String,

        /// Disambiguate when the same filename exists in both
        /// directions.
        #[arg(long)]
        doc_type: Option<DocType>,
    },

    /// Mirror a local-only document to the remote.
    ///
    /// Useful after enabling a remote backend on an archive that
    /// already has documents, or after an upload failed during `add`.
    Push {
        /// Catalog filename of the document.
        filename: String,

        /// Disambiguate when the same filename exists in both
        /// directions.
        #[arg(long)]
        doc_type: Option<DocType>,
    },

    /// Open a document with the OS default handler.
    Open {
        /// Catalog filename of the document.
        filename: String,

        /// Disambiguate when the same filename exists in both
        /// directions.
        #[arg(long)]
        doc_type: Option<DocType>,
    },

    /// Remove a document from the catalog and from local disk.
    ///
    /// Without `--remote` the mirror copy survives and the next
    /// `sync` rediscovers the document as remote-only.
    Delete {
        /// Catalog filename of the document.
        filename: String,

        /// Disambiguate when the same filename exists in both
        /// directions.
        #[arg(long)]
        doc_type: Option<DocType>,

        /// Also remove the remote copy. Best-effort: a failed remote
        /// deletion is reported but the catalog row is gone either
        /// way.
        #[arg(long)]
        remote: bool,
    },

    /// Repair local drift and discover new remote files.
    ///
    /// First verifies every locally-recorded file still exists
    /// (recovering or dropping the ones that do not), then walks the
    /// remote containers and catalogs files added out-of-band. Safe
    /// to run repeatedly.
    Sync,

    /// Catalog totals and remote reachability.
    Status,

    /// Manage the sender registry.
    Sender {
        #[command(subcommand)]
        action: EntityAction,
    },

    /// Manage the executor registry.
    Executor {
        #[command(subcommand)]
        action: EntityAction,
    },
}

/// Registry management subcommands, shared by senders and executors.
#[derive(Subcommand)]
enum EntityAction {
    /// Register a new name and prepare its local and remote folders.
    Add {
        name: String,

        /// Free-form note shown in listings.
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List registered entries.
    List,

    /// Remove an entry by name. Documents keep the name; it shows as
    /// unregistered from then on.
    Remove { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let remote = build_remote(&cfg.remote)?;
    let archive = Archive::new(Layout::new(&cfg.storage.root), remote);

    match cli.command {
        Commands::Init => run_init(&archive).await?,
        Commands::Add {
            file,
            doc_type,
            number,
            date,
            sender,
            executor,
        } => run_add(&archive, file, doc_type, number, date, sender, executor).await?,
        Commands::List { doc_type, query } => run_list(&archive, doc_type, query).await?,
        Commands::Download { filename, doc_type } => {
            run_download(&archive, &filename, doc_type).await?
        }
        Commands::Push { filename, doc_type } => run_push(&archive, &filename, doc_type).await?,
        Commands::Open { filename, doc_type } => run_open(&archive, &filename, doc_type).await?,
        Commands::Delete {
            filename,
            doc_type,
            remote,
        } => run_delete(&archive, &filename, doc_type, remote).await?,
        Commands::Sync => run_sync(&archive).await?,
        Commands::Status => run_status(&archive).await?,
        Commands::Sender { action } => run_entity(&archive, EntityKind::Sender, action).await?,
        Commands::Executor { action } => run_entity(&archive, EntityKind::Executor, action).await?,
    }

    Ok(())
}

/// Construct the configured remote backend, if any.
fn build_remote(cfg: &RemoteConfig) -> anyhow::Result<Option<Arc<dyn RemoteStore>>> {
    match cfg.backend.as_str() {
        "none" => Ok(None),
        "webdav" => Ok(Some(Arc::new(WebdavStore::new(&cfg.webdav)?))),
        "telegram" => Ok(Some(Arc::new(TelegramStore::new(&cfg.telegram)?))),
        other => anyhow::bail!("unknown remote backend '{}'", other),
    }
}

async fn run_init(archive: &Archive) -> anyhow::Result<()> {
    archive.init().await?;
    println!("init");
    println!("  root: {}", archive.layout().root().display());
    println!(
        "  catalog: {}",
        archive.layout().catalog_path().display()
    );
    println!(
        "  remote: {}",
        archive.remote_backend().unwrap_or("none")
    );
    println!("ok");
    Ok(())
}

async fn run_add(
    archive: &Archive,
    file: PathBuf,
    doc_type: DocType,
    number: String,
    date: Option<String>,
    sender: Option<String>,
    executor: Option<String>,
) -> anyhow::Result<()> {
    let entity = match doc_type {
        DocType::Incoming => {
            if executor.is_some() {
                anyhow::bail!("incoming documents take --sender, not --executor");
            }
            sender.ok_or_else(|| anyhow::anyhow!("incoming documents require --sender"))?
        }
        DocType::Outgoing => {
            if sender.is_some() {
                anyhow::bail!("outgoing documents take --executor, not --sender");
            }
            executor.ok_or_else(|| anyhow::anyhow!("outgoing documents require --executor"))?
        }
    };

    let outcome = archive
        .add_document(AddRequest {
            source: file,
            doc_type,
            doc_number: number,
            doc_date: date,
            entity,
        })
        .await?;
    let doc = &outcome.document;

    println!("add {}", doc.filename);
    println!("  type: {}", doc.doc_type);
    if let Some(number) = doc.doc_number.as_deref() {
        println!("  number: {}", number);
    }
    if let Some(entity) = doc.entity() {
        println!("  {}: {}", doc.doc_type.entity_kind(), entity);
    }
    println!("  size: {}", format_size(doc.size));
    match doc.remote_path.as_deref() {
        Some(remote) => println!("  remote: {}", remote),
        None => println!("  remote: not mirrored (no backend configured)"),
    }
    println!("ok");
    Ok(())
}

async fn run_list(
    archive: &Archive,
    doc_type: Option<DocType>,
    query: Option<String>,
) -> anyhow::Result<()> {
    let docs = archive
        .list_documents(&DocumentFilter { doc_type, query })
        .await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<8} {:<10} {:<14} {:<28} {:<20} {:>10}",
        "STATE", "TYPE", "NUMBER", "FILE", "WITH", "SIZE"
    );
    for doc in &docs {
        println!(
            "{:<8} {:<10} {:<14} {:<28} {:<20} {:>10}",
            doc.state().to_string(),
            doc.doc_type.to_string(),
            doc.doc_number.as_deref().unwrap_or("-"),
            doc.filename,
            doc.entity().unwrap_or("-"),
            format_size(doc.size),
        );
    }
    println!("{} document(s)", docs.len());
    Ok(())
}

async fn run_download(
    archive: &Archive,
    filename: &str,
    doc_type: Option<DocType>,
) -> anyhow::Result<()> {
    let doc = archive.download(filename, doc_type).await?;
    println!("download {}", doc.filename);
    println!("  saved to: {}", doc.path);
    println!("ok");
    Ok(())
}

async fn run_push(
    archive: &Archive,
    filename: &str,
    doc_type: Option<DocType>,
) -> anyhow::Result<()> {
    let doc = archive.push(filename, doc_type).await?;
    println!("push {}", doc.filename);
    if let Some(remote) = doc.remote_path.as_deref() {
        println!("  remote: {}", remote);
    }
    println!("ok");
    Ok(())
}

async fn run_open(
    archive: &Archive,
    filename: &str,
    doc_type: Option<DocType>,
) -> anyhow::Result<()> {
    let path = archive.open_document(filename, doc_type).await?;
    println!("opening {}", path.display());
    Ok(())
}

async fn run_delete(
    archive: &Archive,
    filename: &str,
    doc_type: Option<DocType>,
    also_remote: bool,
) -> anyhow::Result<()> {
    let outcome = archive.delete(filename, doc_type, also_remote).await?;
    println!("delete {}", outcome.document.filename);
    if outcome.local_removed {
        println!("  local copy removed");
    }
    if outcome.remote_removed {
        println!("  remote copy removed");
    } else if let Some(error) = &outcome.remote_error {
        println!("  remote deletion failed: {}", error);
    } else if outcome.document.remote_path.is_some() {
        println!("  remote copy left in place");
    }
    println!("ok");
    Ok(())
}

async fn run_sync(archive: &Archive) -> anyhow::Result<()> {
    let report: SyncReport = archive.synchronize().await?;
    println!("sync");
    for filename in &report.repaired.flipped_remote {
        println!("  kept as remote-only: {}", filename);
    }
    for filename in &report.repaired.removed_missing {
        println!("  dropped (no copy anywhere): {}", filename);
    }
    println!("  discovered on remote: {}", report.added);
    println!("ok");
    Ok(())
}

async fn run_status(archive: &Archive) -> anyhow::Result<()> {
    let status = archive.status().await?;
    println!("status");
    println!("  catalog: {}", status.catalog_path.display());
    println!(
        "  documents: {} ({} local, {} remote, {} synced)",
        status.total, status.local_only, status.remote_only, status.synced
    );
    println!("  senders: {}", status.senders);
    println!("  executors: {}", status.executors);
    println!("  total size: {}", status.total_size_display());
    match &status.remote {
        Some(remote) if remote.reachable => println!("  remote: {} (reachable)", remote.backend),
        Some(remote) => println!("  remote: {} (unreachable)", remote.backend),
        None => println!("  remote: none"),
    }
    Ok(())
}

async fn run_entity(
    archive: &Archive,
    kind: EntityKind,
    action: EntityAction,
) -> anyhow::Result<()> {
    match action {
        EntityAction::Add { name, description } => {
            let entity = archive.add_entity(kind, &name, &description).await?;
            println!("{} add {}", kind, entity.name);
            println!("  id: {}", entity.id);
            println!("ok");
        }
        EntityAction::List => {
            let entities = archive.entities(kind).await?;
            if entities.is_empty() {
                println!("No {}s registered.", kind);
                return Ok(());
            }
            println!("{:<6} {:<24} {:<20} DESCRIPTION", "ID", "NAME", "CREATED");
            for entity in &entities {
                println!(
                    "{:<6} {:<24} {:<20} {}",
                    entity.id, entity.name, entity.created_at, entity.description
                );
            }
        }
        EntityAction::Remove { name } => {
            let removed = archive.remove_entity(kind, &name).await?;
            println!("{} remove {}", kind, removed.name);
            println!("ok");
        }
    }
    Ok(())
}
