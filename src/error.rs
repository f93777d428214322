//! Error types for the archive core.
//!
//! Each layer has its own enum; [`ArchiveError`] composes them for the
//! facade. Background transfer failures are not surfaced through these
//! types directly; a worker reports a failure outcome on its
//! transfer's completion channel (see [`crate::transfer`]) and it is
//! converted at commit time.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving the catalog file.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog file exists but is not a valid catalog document.
    /// Never silently replaced with an empty catalog.
    #[error("catalog {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The in-memory catalog could not be encoded to JSON.
    #[error("failed to encode catalog: {0}")]
    Encode(#[from] serde_json::Error),

    /// Reading or (atomically) replacing the catalog file failed.
    #[error("catalog io: {0}")]
    Io(#[from] std::io::Error),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Errors raised by sender/executor registry operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EntityError {
    /// Entity names must be non-empty after trimming.
    #[error("entity name must not be empty")]
    EmptyName,

    /// Names are unique per collection, compared case-insensitively.
    #[error("an entity named '{0}' already exists")]
    DuplicateName(String),

    /// The referenced entity is not present in the collection.
    #[error("no such entity: '{0}'")]
    UnknownEntity(String),
}

/// Errors raised by a remote backend.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Refusing to overwrite an object that is already on the remote.
    #[error("remote object already exists at {0}")]
    AlreadyExists(String),

    /// The remote object or container is not there.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// Transport-level failure (connect, TLS, timeout).
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered, but not with anything we can interpret.
    #[error("unexpected {backend} response: {detail}")]
    Protocol {
        backend: &'static str,
        detail: String,
    },

    /// A download failed after it was started.
    #[error("download of {remote} failed: {reason}")]
    Download { remote: String, reason: String },

    /// An upload failed after it was started.
    #[error("upload to {remote} failed: {reason}")]
    Upload { remote: String, reason: String },

    /// Local disk I/O during a transfer.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors raised by the transfer orchestrator.
#[derive(Error, Debug)]
pub enum TransferError {
    /// A transfer for this document is already running.
    #[error("a transfer for '{0}' is already in flight")]
    AlreadyInFlight(String),

    /// The document cannot be transferred in its current state,
    /// e.g. downloading a document that has no remote path.
    #[error("document '{0}' is not transferable: {1}")]
    NotTransferable(String, String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors surfaced by the [`crate::archive::Archive`] facade.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A document with this filename and type is already cataloged.
    #[error("a {doc_type} document named '{filename}' already exists")]
    DuplicateDocument { filename: String, doc_type: String },

    /// No catalog entry matches the given reference.
    #[error("no document matches '{0}'")]
    DocumentNotFound(String),

    /// More than one catalog entry matches; the caller must narrow
    /// the reference with a document type.
    #[error("multiple documents named '{0}'; specify the type")]
    AmbiguousDocument(String),

    /// The operation needs the file on local disk and it is not
    /// there.
    #[error("'{0}' has no local copy; download it first")]
    NotLocal(String),

    /// The operation needs a remote backend and none is configured.
    #[error("no remote backend configured")]
    NoRemote,

    /// Local file I/O outside the catalog store (copying into the
    /// archive, deleting, opening).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
