//! Catalog data model and JSON store.
//!
//! The whole archive state lives in one JSON document of record:
//! cataloged documents, the sender and executor registries, and a
//! reserved `current_user` slot. All mutation is load, modify, save;
//! saves replace the file atomically so a crash can never leave a
//! half-written catalog behind.
//!
//! Legacy catalogs are upgraded in place by a small pipeline of
//! value-level normalizers that runs before typed decoding.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CatalogError, CatalogResult, EntityError};

/// Prefix stored in `path` when a document's bytes live only on the
/// remote; the rest of the value is the remote path.
pub const REMOTE_SENTINEL: &str = "remote:";

/// Sentinel prefix written by older catalogs. Accepted on load and
/// rewritten by [`migrate`].
const LEGACY_SENTINEL: &str = "yadisk:";

/// Timestamp format used for `date` and `created_at` fields.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in the catalog's timestamp format.
pub fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Document direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Incoming,
    Outgoing,
}

impl DocType {
    /// Name of the counterpart entity for this direction.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            DocType::Incoming => EntityKind::Sender,
            DocType::Outgoing => EntityKind::Executor,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocType::Incoming => write!(f, "incoming"),
            DocType::Outgoing => write!(f, "outgoing"),
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incoming" | "in" => Ok(DocType::Incoming),
            "outgoing" | "out" => Ok(DocType::Outgoing),
            other => Err(format!(
                "unknown document type '{}', expected incoming or outgoing",
                other
            )),
        }
    }
}

/// Derived document state. Computed from `path` and `remote_path`,
/// never persisted; the transient in-flight states live with the
/// transfer orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    /// Bytes on local disk only.
    LocalOnly,
    /// Bytes on the remote only (`path` carries the sentinel).
    RemoteOnly,
    /// Bytes on local disk and mirrored on the remote.
    Synced,
}

impl fmt::Display for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocState::LocalOnly => write!(f, "local"),
            DocState::RemoteOnly => write!(f, "remote"),
            DocState::Synced => write!(f, "synced"),
        }
    }
}

/// A cataloged piece of correspondence.
///
/// Serde field names match the persisted JSON produced by earlier
/// versions of the archive, so existing catalogs load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub filename: String,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    /// Registered letter number. Empty for documents discovered on the
    /// remote, where the listing carries no such metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,
    /// Date written on the letter itself, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Cached registry id; the `sender` name is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// Cached registry id; the `executor` name is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<u64>,
    /// Absolute local path, or the remote sentinel.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    /// Backend-specific object id, e.g. a chat message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Catalog entry creation time.
    #[serde(default)]
    pub date: String,
    /// File size in bytes. Older catalogs stored this as a string;
    /// [`migrate`] coerces it.
    #[serde(default)]
    pub size: u64,
}

impl Document {
    pub fn state(&self) -> DocState {
        if self.path.starts_with(REMOTE_SENTINEL) {
            DocState::RemoteOnly
        } else if self.remote_path.is_some() {
            DocState::Synced
        } else {
            DocState::LocalOnly
        }
    }

    /// Local path, if the bytes are (recorded as) present locally.
    pub fn local_path(&self) -> Option<&Path> {
        if self.path.starts_with(REMOTE_SENTINEL) {
            None
        } else {
            Some(Path::new(&self.path))
        }
    }

    /// Remote path, from `remote_path` or the sentinel.
    pub fn remote_ref(&self) -> Option<&str> {
        self.remote_path
            .as_deref()
            .or_else(|| self.path.strip_prefix(REMOTE_SENTINEL))
    }

    /// The counterpart entity name for this document's direction.
    pub fn entity(&self) -> Option<&str> {
        match self.doc_type {
            DocType::Incoming => self.sender.as_deref(),
            DocType::Outgoing => self.executor.as_deref(),
        }
    }

    /// Point `path` at the remote sentinel, keeping `remote_path`.
    pub fn mark_remote_only(&mut self) {
        if let Some(remote) = &self.remote_path {
            self.path = format!("{}{}", REMOTE_SENTINEL, remote);
        }
    }

    pub fn key(&self) -> DocKey {
        DocKey::new(
            &self.filename,
            self.doc_type,
            self.doc_number.as_deref(),
            self.sender.as_deref(),
            self.executor.as_deref(),
        )
    }
}

/// Identity 5-tuple used for "already cataloged" checks. Text parts
/// are compared lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    filename: String,
    doc_type: DocType,
    doc_number: String,
    sender: String,
    executor: String,
}

impl DocKey {
    pub fn new(
        filename: &str,
        doc_type: DocType,
        doc_number: Option<&str>,
        sender: Option<&str>,
        executor: Option<&str>,
    ) -> Self {
        Self {
            filename: filename.to_lowercase(),
            doc_type,
            doc_number: doc_number.unwrap_or("").to_lowercase(),
            sender: sender.unwrap_or("").to_lowercase(),
            executor: executor.unwrap_or("").to_lowercase(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn doc_type(&self) -> DocType {
        self.doc_type
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, self.doc_type)
    }
}

/// Which entity registry an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Sender,
    Executor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Sender => write!(f, "sender"),
            EntityKind::Executor => write!(f, "executor"),
        }
    }
}

/// A sender or executor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique within its collection. Assigned as max(ids)+1, so an id
    /// can be reused after the highest-numbered entity is deleted.
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: String,
}

/// The persisted archive state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub senders: Vec<Entity>,
    #[serde(default)]
    pub executors: Vec<Entity>,
    /// Reserved for a future login feature; always null today.
    #[serde(default)]
    pub current_user: Option<Value>,
}

impl Catalog {
    pub fn entities(&self, kind: EntityKind) -> &[Entity] {
        match kind {
            EntityKind::Sender => &self.senders,
            EntityKind::Executor => &self.executors,
        }
    }

    fn entities_mut(&mut self, kind: EntityKind) -> &mut Vec<Entity> {
        match kind {
            EntityKind::Sender => &mut self.senders,
            EntityKind::Executor => &mut self.executors,
        }
    }

    /// Case-insensitive exact name lookup.
    pub fn find_entity(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        let needle = name.to_lowercase();
        self.entities(kind)
            .iter()
            .find(|e| e.name.to_lowercase() == needle)
    }

    /// Register a new entity. The name is trimmed; uniqueness is
    /// case-insensitive within the collection.
    pub fn add_entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        description: &str,
    ) -> Result<Entity, EntityError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EntityError::EmptyName);
        }
        if self.find_entity(kind, name).is_some() {
            return Err(EntityError::DuplicateName(name.to_string()));
        }

        let entities = self.entities_mut(kind);
        let id = entities.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let entity = Entity {
            id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now_stamp(),
        };
        entities.push(entity.clone());
        Ok(entity)
    }

    /// Remove an entity by id. Documents referencing its name are left
    /// alone; a dangling name is shown as unknown, never an error.
    pub fn remove_entity(&mut self, kind: EntityKind, id: u64) -> Result<Entity, EntityError> {
        let entities = self.entities_mut(kind);
        let pos = entities
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| EntityError::UnknownEntity(format!("{} #{}", kind, id)))?;
        Ok(entities.remove(pos))
    }

    /// Dedup keys of every cataloged document.
    pub fn keys(&self) -> HashSet<DocKey> {
        self.documents.iter().map(Document::key).collect()
    }

    /// True if a document with this filename and type is cataloged,
    /// filename compared case-insensitively.
    pub fn has_document_named(&self, filename: &str, doc_type: DocType) -> bool {
        let needle = filename.to_lowercase();
        self.documents
            .iter()
            .any(|d| d.doc_type == doc_type && d.filename.to_lowercase() == needle)
    }
}

// ============ Migration ============

/// A value-level catalog normalizer. Returns whether it changed the
/// document. Runs before typed decoding so it can fix shapes the
/// typed model no longer accepts.
type Normalizer = fn(&mut Value) -> bool;

const NORMALIZERS: &[(&str, Normalizer)] = &[
    ("size-to-integer", coerce_string_sizes),
    ("legacy-remote-sentinel", rewrite_legacy_sentinels),
];

/// Run every normalizer over a raw catalog value. Returns true if any
/// of them changed something (the caller then persists the result).
/// Running it again on its own output is a no-op.
pub fn migrate(root: &mut Value) -> bool {
    let mut changed = false;
    for (name, normalize) in NORMALIZERS {
        if normalize(root) {
            debug!(normalizer = name, "catalog normalizer applied");
            changed = true;
        }
    }
    changed
}

fn documents_of(root: &mut Value) -> Option<&mut Vec<Value>> {
    root.get_mut("documents").and_then(Value::as_array_mut)
}

/// Older catalogs stored `size` as a string. Unparseable values fall
/// back to 0.
fn coerce_string_sizes(root: &mut Value) -> bool {
    let mut changed = false;
    let Some(docs) = documents_of(root) else {
        return false;
    };
    for doc in docs {
        let Some(obj) = doc.as_object_mut() else {
            continue;
        };
        if let Some(text) = obj.get("size").and_then(Value::as_str) {
            let size = text.trim().parse::<u64>().unwrap_or(0);
            obj.insert("size".to_string(), Value::from(size));
            changed = true;
        }
    }
    changed
}

/// Rewrite the pre-rename `yadisk:` sentinel to `remote:`.
fn rewrite_legacy_sentinels(root: &mut Value) -> bool {
    let mut changed = false;
    let Some(docs) = documents_of(root) else {
        return false;
    };
    for doc in docs {
        let Some(obj) = doc.as_object_mut() else {
            continue;
        };
        let rewritten = obj
            .get("path")
            .and_then(Value::as_str)
            .and_then(|path| path.strip_prefix(LEGACY_SENTINEL))
            .map(|rest| format!("{}{}", REMOTE_SENTINEL, rest));
        if let Some(path) = rewritten {
            obj.insert("path".to_string(), Value::String(path));
            changed = true;
        }
    }
    changed
}

// ============ Store ============

/// Loads and saves the catalog file.
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog. A missing file yields an empty catalog; a
    /// present but unreadable one is an error, never silently replaced.
    /// Legacy shapes are migrated and, if anything changed, written
    /// back once.
    pub fn load(&self) -> CatalogResult<Catalog> {
        if !self.path.exists() {
            return Ok(Catalog::default());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let mut value: Value = serde_json::from_str(&raw).map_err(|e| CatalogError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let migrated = migrate(&mut value);

        let catalog: Catalog =
            serde_json::from_value(value).map_err(|e| CatalogError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if migrated {
            self.save(&catalog)?;
            info!(path = %self.path.display(), "catalog migrated to current format");
        }

        Ok(catalog)
    }

    /// Write the catalog atomically: serialize to a temp file in the
    /// same directory, then rename over the target.
    pub fn save(&self, catalog: &Catalog) -> CatalogResult<()> {
        let json = serde_json::to_string_pretty(catalog)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| CatalogError::Io(e.error))?;
        Ok(())
    }
}

/// Human-readable size for listings: bytes up to 1 KB, then KB/MB
/// with two decimals.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
