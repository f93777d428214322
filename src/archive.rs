//! The archive facade.
//!
//! One [`Archive`] per running application. It owns the catalog store,
//! the storage layout and the optional remote backend, and exposes the
//! command surface the CLI calls into: add, list, download, push,
//! delete, synchronize, entity management.
//!
//! Every catalog mutation is one load/modify/save pair under a single
//! write lock, so two background completions (or a completion and a
//! synchronize sweep) can never interleave their load/save pairs and
//! lose updates. Transfer outcomes are committed with check-before-
//! apply: the catalog is reloaded and the document looked up again by
//! its identity key, and a document deleted mid-transfer makes the
//! commit a no-op.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::catalog::{
    format_size, now_stamp, Catalog, CatalogStore, DocKey, DocState, DocType, Document, Entity,
    EntityKind,
};
use crate::error::{ArchiveError, ArchiveResult};
use crate::layout::{remote_dir_chain, Layout};
use crate::reconcile::{self, RepairReport, SyncReport};
use crate::remote::{RemoteRef, RemoteStore};
use crate::transfer::{TransferOutcome, Transfers};

/// Filter for [`Archive::list_documents`]. Empty filter matches all.
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub doc_type: Option<DocType>,
    /// Free-text needle matched case-insensitively against filename,
    /// sender, executor, document number and document date.
    pub query: Option<String>,
}

impl DocumentFilter {
    fn matches(&self, doc: &Document) -> bool {
        if let Some(doc_type) = self.doc_type {
            if doc.doc_type != doc_type {
                return false;
            }
        }
        let Some(query) = self.query.as_deref() else {
            return true;
        };
        let needle = query.to_lowercase();
        let mut haystacks = vec![doc.filename.clone()];
        haystacks.extend(doc.sender.clone());
        haystacks.extend(doc.executor.clone());
        haystacks.extend(doc.doc_number.clone());
        haystacks.extend(doc.doc_date.clone());
        haystacks
            .iter()
            .any(|h| h.to_lowercase().contains(&needle))
    }
}

/// Everything needed to archive one new file.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub source: PathBuf,
    pub doc_type: DocType,
    /// Registered letter number. Required.
    pub doc_number: String,
    pub doc_date: Option<String>,
    /// Sender name for incoming, executor name for outgoing. Unknown
    /// names are registered on the fly.
    pub entity: String,
}

#[derive(Debug)]
pub struct AddOutcome {
    pub document: Document,
    /// False when no remote backend is configured and the document
    /// stayed local-only.
    pub mirrored: bool,
}

#[derive(Debug)]
pub struct DeleteOutcome {
    pub document: Document,
    pub local_removed: bool,
    pub remote_removed: bool,
    /// Remote deletion failure, reported but not fatal: the catalog
    /// row is gone either way.
    pub remote_error: Option<String>,
}

#[derive(Debug)]
pub struct RemoteStatus {
    pub backend: &'static str,
    pub reachable: bool,
}

#[derive(Debug)]
pub struct StatusReport {
    pub catalog_path: PathBuf,
    pub total: usize,
    pub local_only: usize,
    pub remote_only: usize,
    pub synced: usize,
    pub senders: usize,
    pub executors: usize,
    pub total_size: u64,
    pub remote: Option<RemoteStatus>,
}

impl StatusReport {
    pub fn total_size_display(&self) -> String {
        format_size(self.total_size)
    }
}

pub struct Archive {
    layout: Layout,
    store: CatalogStore,
    remote: Option<Arc<dyn RemoteStore>>,
    transfers: Option<Transfers>,
    write_lock: Mutex<()>,
}

impl Archive {
    pub fn new(layout: Layout, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let store = CatalogStore::new(layout.catalog_path());
        let transfers = remote.clone().map(Transfers::new);
        Self {
            layout,
            store,
            remote,
            transfers,
            write_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn remote_backend(&self) -> Option<&'static str> {
        self.remote.as_deref().map(RemoteStore::backend)
    }

    /// Prepare the archive directory tree and write an empty catalog
    /// if none exists yet.
    pub async fn init(&self) -> ArchiveResult<()> {
        let _guard = self.write_lock.lock().await;
        self.layout.ensure_base_dirs()?;
        let catalog = self.store.load()?;
        if !self.store.path().exists() {
            self.store.save(&catalog)?;
        }
        info!(root = %self.layout.root().display(), "archive initialized");
        Ok(())
    }

    /// Load the catalog and absorb local drift first, persisting the
    /// repair when it changed anything.
    async fn load_repaired(&self) -> ArchiveResult<(Catalog, RepairReport)> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;
        let report = reconcile::validate_local(&mut catalog);
        if !report.is_clean() {
            self.store.save(&catalog)?;
        }
        Ok((catalog, report))
    }

    pub async fn list_documents(&self, filter: &DocumentFilter) -> ArchiveResult<Vec<Document>> {
        let (catalog, _) = self.load_repaired().await?;
        Ok(catalog
            .documents
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    /// Archive a new file: copy it into the local tree, mirror it to
    /// the remote when one is configured, then append the catalog
    /// row. A remote failure rolls the local copy back and leaves the
    /// catalog without the new row.
    pub async fn add_document(&self, req: AddRequest) -> ArchiveResult<AddOutcome> {
        let filename = req
            .source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ArchiveError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a usable file name: {}", req.source.display()),
                ))
            })?;
        if !req.source.is_file() {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", req.source.display()),
            )));
        }

        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;

        if catalog.has_document_named(&filename, req.doc_type) {
            return Err(ArchiveError::DuplicateDocument {
                filename,
                doc_type: req.doc_type.to_string(),
            });
        }

        // Resolve the counterpart entity, registering it on first
        // use. Registration is persisted on its own so it survives a
        // failed upload below.
        let kind = req.doc_type.entity_kind();
        let entity = match catalog.find_entity(kind, &req.entity) {
            Some(entity) => entity.clone(),
            None => {
                let entity = catalog.add_entity(kind, &req.entity, "")?;
                self.store.save(&catalog)?;
                info!(kind = %kind, name = %entity.name, "registered new entity");
                entity
            }
        };

        let destination = self
            .layout
            .local_destination(req.doc_type, Some(&entity.name), &filename);
        let copied = !same_file(&req.source, &destination);
        if copied {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&req.source, &destination)?;
        }
        let size = std::fs::metadata(&destination)?.len();

        let (sender, sender_id, executor, executor_id) = match req.doc_type {
            DocType::Incoming => (Some(entity.name.clone()), Some(entity.id), None, None),
            DocType::Outgoing => (None, None, Some(entity.name.clone()), Some(entity.id)),
        };
        let mut document = Document {
            filename,
            doc_type: req.doc_type,
            doc_number: Some(req.doc_number),
            doc_date: req.doc_date,
            sender,
            sender_id,
            executor,
            executor_id,
            path: destination.to_string_lossy().into_owned(),
            remote_path: None,
            remote_id: None,
            date: now_stamp(),
            size,
        };

        let mut mirrored = false;
        if let Some(transfers) = &self.transfers {
            let rx = transfers
                .start_upload(destination.clone(), document.clone())
                .await?;
            match wait_for(rx).await? {
                TransferOutcome::Uploaded {
                    remote_path,
                    remote_id,
                    ..
                } => {
                    document.remote_path = Some(remote_path);
                    document.remote_id = remote_id;
                    mirrored = true;
                }
                TransferOutcome::Failed { error, .. } => {
                    if copied {
                        if let Err(e) = std::fs::remove_file(&destination) {
                            warn!(path = %destination.display(), error = %e,
                                "could not roll back local copy");
                        }
                    }
                    return Err(ArchiveError::Remote(error));
                }
                TransferOutcome::Downloaded { .. } => unreachable!("upload worker sent a download outcome"),
            }
        }

        catalog.documents.push(document.clone());
        self.store.save(&catalog)?;
        Ok(AddOutcome { document, mirrored })
    }

    /// Fetch a remote-only document into the local tree.
    pub async fn download(&self, name: &str, doc_type: Option<DocType>) -> ArchiveResult<Document> {
        let transfers = self.transfers.as_ref().ok_or(ArchiveError::NoRemote)?;

        let catalog = self.store.load()?;
        let doc = find_document(&catalog, name, doc_type)?.clone();
        let destination = self
            .layout
            .local_destination(doc.doc_type, doc.entity(), &doc.filename);

        let key = doc.key();
        let rx = transfers.start_download(&doc, destination).await?;

        match wait_for(rx).await? {
            TransferOutcome::Downloaded { local } => self
                .commit_download(&key, &local)
                .await?
                .ok_or_else(|| ArchiveError::DocumentNotFound(name.to_string())),
            TransferOutcome::Failed { error, .. } => Err(ArchiveError::Remote(error)),
            TransferOutcome::Uploaded { .. } => unreachable!("download worker sent an upload outcome"),
        }
    }

    /// Mirror an already-archived local-only document to the remote.
    pub async fn push(&self, name: &str, doc_type: Option<DocType>) -> ArchiveResult<Document> {
        let transfers = self.transfers.as_ref().ok_or(ArchiveError::NoRemote)?;

        let catalog = self.store.load()?;
        let doc = find_document(&catalog, name, doc_type)?.clone();
        let local = doc
            .local_path()
            .ok_or_else(|| ArchiveError::NotLocal(doc.filename.clone()))?
            .to_path_buf();

        let key = doc.key();
        let rx = transfers.start_upload(local, doc.clone()).await?;

        match wait_for(rx).await? {
            TransferOutcome::Uploaded {
                remote_path,
                remote_id,
                size,
            } => self
                .commit_upload(&key, remote_path, remote_id, size)
                .await?
                .ok_or_else(|| ArchiveError::DocumentNotFound(name.to_string())),
            TransferOutcome::Failed { error, .. } => Err(ArchiveError::Remote(error)),
            TransferOutcome::Downloaded { .. } => unreachable!("upload worker sent a download outcome"),
        }
    }

    /// Remove a document from the catalog and from local disk; with
    /// `also_remote`, best-effort remove the remote copy too.
    ///
    /// A local-only removal of a mirrored document leaves the remote
    /// copy in place, so the next synchronize rediscovers it.
    pub async fn delete(
        &self,
        name: &str,
        doc_type: Option<DocType>,
        also_remote: bool,
    ) -> ArchiveResult<DeleteOutcome> {
        if also_remote && self.remote.is_none() {
            return Err(ArchiveError::NoRemote);
        }

        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;
        let doc = find_document(&catalog, name, doc_type)?.clone();

        let mut local_removed = false;
        if let Some(local) = doc.local_path() {
            if local.exists() {
                std::fs::remove_file(local)?;
                local_removed = true;
            }
        }

        let mut remote_removed = false;
        let mut remote_error = None;
        if also_remote {
            if let (Some(remote), Some(remote_path)) = (&self.remote, doc.remote_ref()) {
                let target = RemoteRef::with_id(remote_path, doc.remote_id.as_deref());
                match remote.delete(target).await {
                    Ok(()) => remote_removed = true,
                    Err(e) => {
                        warn!(remote = remote_path, error = %e, "remote deletion failed");
                        remote_error = Some(e.to_string());
                    }
                }
            }
        }

        let key = doc.key();
        catalog.documents.retain(|d| d.key() != key);
        self.store.save(&catalog)?;

        Ok(DeleteOutcome {
            document: doc,
            local_removed,
            remote_removed,
            remote_error,
        })
    }

    /// Repair local state and pull in unknown remote files. Without a
    /// remote backend this is the repair pass alone.
    pub async fn synchronize(&self) -> ArchiveResult<SyncReport> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;

        let report = match &self.remote {
            Some(remote) => reconcile::reconcile(&mut catalog, remote.as_ref()).await?,
            None => SyncReport {
                added: 0,
                repaired: reconcile::validate_local(&mut catalog),
            },
        };

        self.store.save(&catalog)?;
        Ok(report)
    }

    /// Hand the document to the OS default handler. Fire and forget.
    pub async fn open_document(&self, name: &str, doc_type: Option<DocType>) -> ArchiveResult<PathBuf> {
        let (catalog, _) = self.load_repaired().await?;
        let doc = find_document(&catalog, name, doc_type)?;
        let local = doc
            .local_path()
            .filter(|p| p.exists())
            .ok_or_else(|| ArchiveError::NotLocal(doc.filename.clone()))?
            .to_path_buf();

        open_with_default_handler(&local)?;
        Ok(local)
    }

    pub async fn status(&self) -> ArchiveResult<StatusReport> {
        let (catalog, _) = self.load_repaired().await?;

        let mut report = StatusReport {
            catalog_path: self.store.path().to_path_buf(),
            total: catalog.documents.len(),
            local_only: 0,
            remote_only: 0,
            synced: 0,
            senders: catalog.senders.len(),
            executors: catalog.executors.len(),
            total_size: 0,
            remote: None,
        };
        for doc in &catalog.documents {
            report.total_size += doc.size;
            match doc.state() {
                DocState::LocalOnly => report.local_only += 1,
                DocState::RemoteOnly => report.remote_only += 1,
                DocState::Synced => report.synced += 1,
            }
        }
        if let Some(remote) = &self.remote {
            report.remote = Some(RemoteStatus {
                backend: remote.backend(),
                reachable: remote.test_connection().await,
            });
        }
        Ok(report)
    }

    pub async fn entities(&self, kind: EntityKind) -> ArchiveResult<Vec<Entity>> {
        let catalog = self.store.load()?;
        Ok(catalog.entities(kind).to_vec())
    }

    /// Register an entity and prepare its local (and, best-effort,
    /// remote) per-entity container.
    pub async fn add_entity(
        &self,
        kind: EntityKind,
        name: &str,
        description: &str,
    ) -> ArchiveResult<Entity> {
        let entity = {
            let _guard = self.write_lock.lock().await;
            let mut catalog = self.store.load()?;
            let entity = catalog.add_entity(kind, name, description)?;
            self.store.save(&catalog)?;
            entity
        };

        let doc_type = match kind {
            EntityKind::Sender => DocType::Incoming,
            EntityKind::Executor => DocType::Outgoing,
        };
        std::fs::create_dir_all(self.layout.local_dir(doc_type, Some(&entity.name)))?;

        if let Some(remote) = &self.remote {
            for dir in remote_dir_chain(doc_type, Some(&entity.name)) {
                if let Err(e) = remote.make_dir(&dir).await {
                    warn!(dir = %dir, error = %e, "could not prepare remote container");
                    break;
                }
            }
        }

        Ok(entity)
    }

    /// Remove an entity by name. Documents keep the name; it shows as
    /// unregistered from then on. Folders are left in place.
    pub async fn remove_entity(&self, kind: EntityKind, name: &str) -> ArchiveResult<Entity> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;
        let id = catalog
            .find_entity(kind, name)
            .ok_or_else(|| crate::error::EntityError::UnknownEntity(name.to_string()))?
            .id;
        let removed = catalog.remove_entity(kind, id)?;
        self.store.save(&catalog)?;
        Ok(removed)
    }

    /// Commit a finished download. `None` when the document was
    /// deleted while the transfer ran; the catalog is left untouched.
    async fn commit_download(&self, key: &DocKey, local: &Path) -> ArchiveResult<Option<Document>> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;
        let Some(doc) = catalog.documents.iter_mut().find(|d| d.key() == *key) else {
            warn!(key = %key, "document deleted while downloading; dropping outcome");
            return Ok(None);
        };
        doc.path = local.to_string_lossy().into_owned();
        let updated = doc.clone();
        self.store.save(&catalog)?;
        Ok(Some(updated))
    }

    /// Commit a finished upload, same no-op rule as downloads.
    async fn commit_upload(
        &self,
        key: &DocKey,
        remote_path: String,
        remote_id: Option<String>,
        size: u64,
    ) -> ArchiveResult<Option<Document>> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.store.load()?;
        let Some(doc) = catalog.documents.iter_mut().find(|d| d.key() == *key) else {
            warn!(key = %key, "document deleted while uploading; dropping outcome");
            return Ok(None);
        };
        doc.remote_path = Some(remote_path);
        doc.remote_id = remote_id;
        if doc.size == 0 {
            doc.size = size;
        }
        let updated = doc.clone();
        self.store.save(&catalog)?;
        Ok(Some(updated))
    }
}

/// Await one transfer's completion. A worker never drops its sender
/// before reporting, so a closed channel means the runtime tore the
/// task down mid-transfer.
async fn wait_for(rx: oneshot::Receiver<TransferOutcome>) -> ArchiveResult<TransferOutcome> {
    rx.await.map_err(|_| {
        ArchiveError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "transfer worker dropped without reporting",
        ))
    })
}

fn find_document<'a>(
    catalog: &'a Catalog,
    name: &str,
    doc_type: Option<DocType>,
) -> ArchiveResult<&'a Document> {
    let needle = name.to_lowercase();
    let mut matches = catalog.documents.iter().filter(|d| {
        d.filename.to_lowercase() == needle && doc_type.map_or(true, |t| d.doc_type == t)
    });

    let Some(first) = matches.next() else {
        return Err(ArchiveError::DocumentNotFound(name.to_string()));
    };
    if matches.next().is_some() {
        return Err(ArchiveError::AmbiguousDocument(name.to_string()));
    }
    Ok(first)
}

/// Paths referring to the same existing file, canonicalized.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn open_with_default_handler(path: &Path) -> io::Result<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]).arg(path);
        c
    };
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = Command::new("open");
        c.arg(path);
        c
    };
    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut c = Command::new("xdg-open");
        c.arg(path);
        c
    };

    command.spawn()?;
    Ok(())
}
