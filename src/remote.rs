//! Remote storage abstraction.
//!
//! Every backend (the hierarchical WebDAV store, the Telegram chat
//! used as a message-log blob store, the in-memory store used in
//! tests) satisfies the same capability set. The reconciliation
//! engine and the transfer orchestrator are written against this
//! trait only and never see a backend's data shape; in particular,
//! caption parsing in the message-log backend stays behind
//! [`RemoteStore::list`], which hands back structured entries.
//!
//! # Example
//!
//! ```rust,no_run
//! use docket::remote::{RemoteRef, RemoteStore};
//! # async fn example(store: &dyn RemoteStore) -> anyhow::Result<()> {
//! if store.test_connection().await {
//!     for entry in store.list("/Документы/Входящие").await? {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::Path;

use crate::catalog::Document;
use crate::error::RemoteResult;

/// Reference to one remote object: the path within the remote
/// hierarchy (virtual for the message-log backend) plus the
/// backend-specific id when one is known.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRef<'a> {
    pub path: &'a str,
    pub id: Option<&'a str>,
}

impl<'a> RemoteRef<'a> {
    pub fn path(path: &'a str) -> Self {
        Self { path, id: None }
    }

    pub fn with_id(path: &'a str, id: Option<&'a str>) -> Self {
        Self { path, id }
    }
}

/// Metadata a backend recovered from its own metadata channel (the
/// chat caption). Hierarchical backends have no such channel and
/// leave it unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMeta {
    pub doc_number: Option<String>,
    pub doc_date: Option<String>,
    pub sender: Option<String>,
    pub executor: Option<String>,
    /// Backend-specific object id (e.g. chat message id).
    pub remote_id: Option<String>,
}

/// One entry in a container listing.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Bare name, no path separators, no trailing directory marker.
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes when the backend reports one, otherwise 0.
    pub size: u64,
    pub meta: Option<EntryMeta>,
}

impl RemoteEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            meta: None,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            meta: None,
        }
    }
}

/// Receipt returned by a successful upload.
#[derive(Debug, Clone, Default)]
pub struct UploadReceipt {
    /// Backend-specific object id to remember on the document, if the
    /// backend issues one.
    pub remote_id: Option<String>,
}

/// Capability set every remote backend provides.
///
/// Path arguments are slash-separated absolute paths under the remote
/// root (see [`crate::layout`]); the message-log backend maps them
/// onto caption metadata instead of real directories.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend identifier (`"webdav"`, `"telegram"`, `"memory"`).
    fn backend(&self) -> &'static str;

    /// Cheap connectivity check. Never errors and never hangs past
    /// the configured timeout; false on any network or auth failure.
    async fn test_connection(&self) -> bool;

    /// Whether an object or container exists at this reference.
    async fn exists(&self, target: RemoteRef<'_>) -> RemoteResult<bool>;

    /// List the direct children of a container. A missing container
    /// is `RemoteError::NotFound`.
    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>>;

    /// Create a container. Creating one that already exists is not an
    /// error.
    async fn make_dir(&self, dir: &str) -> RemoteResult<()>;

    /// Upload a local file. `doc` supplies the metadata a backend may
    /// carry out-of-band (the caption); the collision check against an
    /// existing object is the caller's job, done via [`exists`] before
    /// calling this.
    ///
    /// [`exists`]: RemoteStore::exists
    async fn upload(
        &self,
        local: &Path,
        target: RemoteRef<'_>,
        doc: &Document,
    ) -> RemoteResult<UploadReceipt>;

    /// Download an object to `local`. On success the file is complete
    /// and valid; on failure nothing is left at `local`.
    async fn download(&self, target: RemoteRef<'_>, local: &Path) -> RemoteResult<()>;

    /// Delete an object. Callers treat failure as reportable but
    /// non-blocking for the local deletion it usually accompanies.
    async fn delete(&self, target: RemoteRef<'_>) -> RemoteResult<()>;
}
