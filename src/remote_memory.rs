//! In-memory remote backend for tests.
//!
//! Stores directories and file bytes in process memory behind the same
//! [`RemoteStore`] trait the real backends implement, so sync and
//! transfer flows can be exercised without a server. Failure switches
//! simulate a flaky connection.
//!
//! With [`MemoryStore::with_captions`] the store behaves like the chat
//! backend: listings carry recovered metadata and uploads are assigned
//! stable ids. The plain constructor mimics a bare file server where
//! listings are names and sizes only.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::catalog::Document;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{EntryMeta, RemoteEntry, RemoteRef, RemoteStore, UploadReceipt};

#[derive(Clone, Debug)]
struct StoredFile {
    bytes: Vec<u8>,
    id: String,
    meta: Option<EntryMeta>,
}

pub struct MemoryStore {
    dirs: RwLock<BTreeSet<String>>,
    files: RwLock<HashMap<String, StoredFile>>,
    next_id: AtomicU64,
    captions: bool,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl MemoryStore {
    /// A bare store: listings carry names and sizes only.
    pub fn new() -> Self {
        Self {
            dirs: RwLock::new(BTreeSet::new()),
            files: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            captions: false,
            fail_uploads: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
        }
    }

    /// A store that keeps document metadata alongside each file and
    /// hands back ids, the way the chat backend does.
    pub fn with_captions() -> Self {
        Self {
            captions: true,
            ..Self::new()
        }
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Place a file directly, bypassing `upload`.
    pub async fn seed_file(&self, path: &str, bytes: &[u8], meta: Option<EntryMeta>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut meta = meta;
        if let Some(meta) = meta.as_mut() {
            meta.remote_id.get_or_insert_with(|| id.clone());
        }
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                bytes: bytes.to_vec(),
                id: id.clone(),
                meta,
            },
        );
        id
    }

    pub async fn seed_dir(&self, dir: &str) {
        self.dirs
            .write()
            .await
            .insert(dir.trim_end_matches('/').to_string());
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn has_file(&self, path: &str) -> bool {
        self.files.read().await.contains_key(path)
    }

    pub async fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(path).map(|f| f.bytes.clone())
    }

    async fn resolve(&self, target: RemoteRef<'_>) -> RemoteResult<(String, StoredFile)> {
        let files = self.files.read().await;

        if let Some(id) = target.id {
            if let Some((path, file)) = files.iter().find(|(_, f)| f.id == id) {
                return Ok((path.clone(), file.clone()));
            }
        }
        files
            .get(target.path)
            .map(|f| (target.path.to_string(), f.clone()))
            .ok_or_else(|| RemoteError::NotFound(target.path.to_string()))
    }

    async fn dir_exists(&self, dir: &str) -> bool {
        let dir = dir.trim_end_matches('/');
        if self.dirs.read().await.contains(dir) {
            return true;
        }
        let prefix = format!("{}/", dir);
        self.files
            .read()
            .await
            .keys()
            .any(|path| path.starts_with(&prefix))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn test_connection(&self) -> bool {
        true
    }

    async fn exists(&self, target: RemoteRef<'_>) -> RemoteResult<bool> {
        if let Some(id) = target.id {
            if self.files.read().await.values().any(|f| f.id == id) {
                return Ok(true);
            }
        }
        if self.files.read().await.contains_key(target.path) {
            return Ok(true);
        }
        Ok(self.dir_exists(target.path).await)
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let dir = dir.trim_end_matches('/');
        if !self.dir_exists(dir).await {
            return Err(RemoteError::NotFound(dir.to_string()));
        }

        let prefix = format!("{}/", dir);
        let mut subdirs = BTreeSet::new();
        let mut entries = Vec::new();

        for known in self.dirs.read().await.iter() {
            if let Some(rest) = known.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    subdirs.insert(rest.to_string());
                }
            }
        }
        for (path, file) in self.files.read().await.iter() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((first, _)) => {
                    subdirs.insert(first.to_string());
                }
                None => {
                    let mut entry = RemoteEntry::file(rest, file.bytes.len() as u64);
                    if self.captions {
                        entry.meta = file.meta.clone();
                    }
                    entries.push(entry);
                }
            }
        }

        let mut listing: Vec<RemoteEntry> = subdirs.into_iter().map(RemoteEntry::dir).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        listing.append(&mut entries);
        Ok(listing)
    }

    async fn make_dir(&self, dir: &str) -> RemoteResult<()> {
        self.seed_dir(dir).await;
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        target: RemoteRef<'_>,
        doc: &Document,
    ) -> RemoteResult<UploadReceipt> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Upload {
                remote: target.path.to_string(),
                reason: "simulated upload failure".to_string(),
            });
        }

        let bytes = tokio::fs::read(local).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let meta = self.captions.then(|| EntryMeta {
            doc_number: doc.doc_number.clone(),
            doc_date: doc.doc_date.clone(),
            sender: doc.sender.clone(),
            executor: doc.executor.clone(),
            remote_id: Some(id.clone()),
        });

        self.files.write().await.insert(
            target.path.to_string(),
            StoredFile {
                bytes,
                id: id.clone(),
                meta,
            },
        );

        Ok(UploadReceipt {
            remote_id: self.captions.then_some(id),
        })
    }

    async fn download(&self, target: RemoteRef<'_>, local: &Path) -> RemoteResult<()> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(RemoteError::Download {
                remote: target.path.to_string(),
                reason: "simulated download failure".to_string(),
            });
        }

        let (_, file) = self.resolve(target).await?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, &file.bytes).await?;
        Ok(())
    }

    async fn delete(&self, target: RemoteRef<'_>) -> RemoteResult<()> {
        match self.resolve(target).await {
            Ok((path, _)) => {
                self.files.write().await.remove(&path);
                Ok(())
            }
            Err(RemoteError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
