//! Reconciliation between the catalog and its two sources of truth.
//!
//! The local disk and the remote store both change out from under the
//! catalog: users delete files in their file manager, colleagues drop
//! new documents into the shared remote. The engine runs two passes to
//! absorb that drift:
//!
//! - [`validate_local`] repairs rows whose local file vanished, using
//!   only the filesystem. It never touches the network.
//! - [`discover_remote`] walks the two remote containers and appends a
//!   catalog row for every file not yet known.
//!
//! [`reconcile`] composes them; that is the user-facing synchronize.
//! Both passes mutate the in-memory catalog only. The caller persists
//! once per sweep, which keeps one load/save pair per operation.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::catalog::{now_stamp, Catalog, DocKey, DocType, Document, REMOTE_SENTINEL};
use crate::error::{RemoteError, RemoteResult};
use crate::layout::remote_container;
use crate::remote::{RemoteEntry, RemoteStore};

/// What a local repair pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Documents whose vanished local copy is still recoverable from
    /// the remote; their path now carries the sentinel.
    pub flipped_remote: Vec<String>,
    /// Documents whose file vanished with no remote copy. Dropped.
    pub removed_missing: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.flipped_remote.is_empty() && self.removed_missing.is_empty()
    }
}

/// Outcome of one synchronize sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote files newly appended to the catalog.
    pub added: usize,
    pub repaired: RepairReport,
}

/// Repair pass over local state. For every document recorded as
/// locally present, verify the file is still there; flip to the
/// remote sentinel when a remote copy exists, drop the row when
/// nothing is left to recover. Idempotent, filesystem-only.
pub fn validate_local(catalog: &mut Catalog) -> RepairReport {
    let mut report = RepairReport::default();

    catalog.documents.retain_mut(|doc| {
        let missing = match doc.local_path() {
            None => return true,
            Some(path) => !path.exists(),
        };
        if !missing {
            return true;
        }

        if doc.remote_path.is_some() {
            doc.mark_remote_only();
            debug!(filename = %doc.filename, "local copy vanished, keeping remote reference");
            report.flipped_remote.push(doc.filename.clone());
            true
        } else {
            info!(filename = %doc.filename, "local copy vanished with no remote backup, dropping");
            report.removed_missing.push(doc.filename.clone());
            false
        }
    });

    report
}

/// Walk the remote containers and append a sentinel row for every
/// file the catalog does not know yet. Returns how many were added.
///
/// Identity is the lower-cased 5-tuple key (see
/// [`crate::catalog::DocKey`]); a candidate whose key matches an
/// existing row, or an earlier candidate from the same walk, is
/// skipped. Containers that do not exist yet are treated as empty.
pub async fn discover_remote(
    catalog: &mut Catalog,
    remote: &dyn RemoteStore,
) -> RemoteResult<usize> {
    let mut seen = catalog.keys();
    let mut added = 0;

    for doc_type in [DocType::Incoming, DocType::Outgoing] {
        let container = remote_container(doc_type);
        let entries = match remote.list(&container).await {
            Ok(entries) => entries,
            Err(RemoteError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            if entry.is_dir {
                let subdir = format!("{}/{}", container, entry.name);
                let children = match remote.list(&subdir).await {
                    Ok(children) => children,
                    Err(RemoteError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                for child in children {
                    if child.is_dir {
                        // One level of per-entity containers; anything
                        // deeper is not part of the layout.
                        continue;
                    }
                    added += consider(catalog, &mut seen, doc_type, Some(&entry.name), &subdir, child);
                }
            } else {
                added += consider(catalog, &mut seen, doc_type, None, &container, entry);
            }
        }
    }

    if added > 0 {
        info!(added, "remote walk found new documents");
    }
    Ok(added)
}

/// Synchronize: repair local state, then pull in unknown remote
/// files. Safe to run repeatedly; beyond genuinely new remote items
/// it changes nothing.
pub async fn reconcile(
    catalog: &mut Catalog,
    remote: &dyn RemoteStore,
) -> RemoteResult<SyncReport> {
    let repaired = validate_local(catalog);
    let added = discover_remote(catalog, remote).await?;
    Ok(SyncReport { added, repaired })
}

fn consider(
    catalog: &mut Catalog,
    seen: &mut HashSet<DocKey>,
    doc_type: DocType,
    entity: Option<&str>,
    dir: &str,
    entry: RemoteEntry,
) -> usize {
    let candidate = candidate_document(doc_type, entity, dir, entry);
    if !seen.insert(candidate.key()) {
        return 0;
    }
    debug!(filename = %candidate.filename, remote = ?candidate.remote_path, "discovered remote document");
    catalog.documents.push(candidate);
    1
}

/// Build the catalog row for a remote file nobody cataloged yet. The
/// entity comes from the per-entity container name when there is one;
/// backends with a metadata channel fill the rest, a bare listing
/// leaves the document number unknown.
fn candidate_document(
    doc_type: DocType,
    entity: Option<&str>,
    dir: &str,
    entry: RemoteEntry,
) -> Document {
    let remote_path = format!("{}/{}", dir.trim_end_matches('/'), entry.name);
    let meta = entry.meta.unwrap_or_default();

    let (sender, executor) = match doc_type {
        DocType::Incoming => (entity.map(str::to_string).or(meta.sender), None),
        DocType::Outgoing => (None, entity.map(str::to_string).or(meta.executor)),
    };

    Document {
        filename: entry.name,
        doc_type,
        doc_number: meta.doc_number,
        doc_date: meta.doc_date,
        sender,
        sender_id: None,
        executor,
        executor_id: None,
        path: format!("{}{}", REMOTE_SENTINEL, remote_path),
        remote_path: Some(remote_path),
        remote_id: meta.remote_id,
        date: now_stamp(),
        size: entry.size,
    }
}
