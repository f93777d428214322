//! Background upload/download orchestration.
//!
//! Remote transfers run on spawned workers so the caller never blocks
//! on network I/O. Each start hands back a one-shot receiver that
//! resolves to that transfer's [`TransferOutcome`], so concurrent
//! transfers on different documents cannot consume each other's
//! completions. The catalog owner applies outcomes with
//! check-before-apply semantics (see [`crate::archive::Archive`]), so
//! a worker finishing after its document was deleted mutates nothing.
//! Dropping the receiver cancels interest: the worker runs to
//! completion but its outcome goes nowhere.
//!
//! At most one transfer per document is in flight at a time. Starting
//! a second one while the first is still running is rejected with
//! [`TransferError::AlreadyInFlight`].

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::catalog::{DocKey, DocState, Document};
use crate::error::{RemoteError, RemoteResult, TransferError};
use crate::layout::{remote_destination, remote_dir_chain};
use crate::remote::{RemoteRef, RemoteStore, UploadReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Download,
    Upload,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Download => write!(f, "download"),
            TransferKind::Upload => write!(f, "upload"),
        }
    }
}

#[derive(Debug)]
pub enum TransferOutcome {
    /// The bytes are at `local`, staged and renamed into place.
    Downloaded { local: PathBuf },
    /// The bytes are at `remote_path`; `remote_id` when the backend
    /// issues ids.
    Uploaded {
        remote_path: String,
        remote_id: Option<String>,
        size: u64,
    },
    /// The transfer failed. Catalog state is untouched.
    Failed {
        kind: TransferKind,
        error: RemoteError,
    },
}

/// Transfer orchestrator. Owns the per-document in-flight guard and
/// hands each caller the receiving end of its transfer's completion
/// channel.
pub struct Transfers {
    remote: Arc<dyn RemoteStore>,
    in_flight: Arc<Mutex<HashSet<DocKey>>>,
}

impl Transfers {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn claim(&self, key: &DocKey) -> Result<(), TransferError> {
        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(key.clone()) {
            return Err(TransferError::AlreadyInFlight(key.to_string()));
        }
        Ok(())
    }

    /// Begin fetching a remote-only document to `destination`.
    /// Returns as soon as the worker is spawned; the outcome arrives
    /// on the returned receiver.
    pub async fn start_download(
        &self,
        doc: &Document,
        destination: PathBuf,
    ) -> Result<oneshot::Receiver<TransferOutcome>, TransferError> {
        if doc.state() != DocState::RemoteOnly {
            return Err(TransferError::NotTransferable(
                doc.filename.clone(),
                "the file is already present locally".to_string(),
            ));
        }
        let Some(remote_path) = doc.remote_ref().map(str::to_string) else {
            return Err(TransferError::NotTransferable(
                doc.filename.clone(),
                "no remote copy recorded".to_string(),
            ));
        };

        let key = doc.key();
        self.claim(&key).await?;
        debug!(filename = %doc.filename, remote = %remote_path, "download started");

        let remote = Arc::clone(&self.remote);
        let remote_id = doc.remote_id.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let target = RemoteRef::with_id(&remote_path, remote_id.as_deref());
            let outcome = match remote.download(target, &destination).await {
                Ok(()) => TransferOutcome::Downloaded { local: destination },
                Err(error) => TransferOutcome::Failed {
                    kind: TransferKind::Download,
                    error,
                },
            };
            in_flight.lock().await.remove(&key);
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }

    /// Begin mirroring a local file to the remote. Creates the
    /// container chain idempotently, refuses to overwrite an existing
    /// remote object, and reports the destination (and backend id) on
    /// the returned receiver.
    ///
    /// `doc` is the catalog row the upload belongs to; for a fresh
    /// add it is not in the catalog yet.
    pub async fn start_upload(
        &self,
        local: PathBuf,
        doc: Document,
    ) -> Result<oneshot::Receiver<TransferOutcome>, TransferError> {
        if doc.remote_path.is_some() {
            return Err(TransferError::NotTransferable(
                doc.filename.clone(),
                "already mirrored on the remote".to_string(),
            ));
        }

        let key = doc.key();
        self.claim(&key).await?;
        debug!(filename = %doc.filename, "upload started");

        let remote = Arc::clone(&self.remote);
        let in_flight = Arc::clone(&self.in_flight);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = run_upload(remote.as_ref(), &local, &doc).await;
            let outcome = match result {
                Ok((remote_path, receipt, size)) => TransferOutcome::Uploaded {
                    remote_path,
                    remote_id: receipt.remote_id,
                    size,
                },
                Err(error) => TransferOutcome::Failed {
                    kind: TransferKind::Upload,
                    error,
                },
            };
            in_flight.lock().await.remove(&key);
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }
}

async fn run_upload(
    remote: &dyn RemoteStore,
    local: &Path,
    doc: &Document,
) -> RemoteResult<(String, UploadReceipt, u64)> {
    for dir in remote_dir_chain(doc.doc_type, doc.entity()) {
        remote.make_dir(&dir).await?;
    }

    let destination = remote_destination(doc.doc_type, doc.entity(), &doc.filename);
    if remote.exists(RemoteRef::path(&destination)).await? {
        return Err(RemoteError::AlreadyExists(destination));
    }

    let size = tokio::fs::metadata(local).await?.len();
    let receipt = remote.upload(local, RemoteRef::path(&destination), doc).await?;
    Ok((destination, receipt, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DocType;
    use crate::remote_memory::MemoryStore;
    use tempfile::TempDir;

    fn local_doc(filename: &str, path: &str) -> Document {
        Document {
            filename: filename.to_string(),
            doc_type: DocType::Incoming,
            doc_number: Some("1".to_string()),
            doc_date: None,
            sender: Some("Почта России".to_string()),
            sender_id: None,
            executor: None,
            executor_id: None,
            path: path.to_string(),
            remote_path: None,
            remote_id: None,
            date: String::new(),
            size: 4,
        }
    }

    fn remote_doc(filename: &str, remote_path: &str) -> Document {
        Document {
            remote_path: Some(remote_path.to_string()),
            path: format!("remote:{}", remote_path),
            ..local_doc(filename, "")
        }
    }

    #[tokio::test]
    async fn test_upload_reports_on_its_receiver() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("письмо.pdf");
        std::fs::write(&file, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        let transfers = Transfers::new(store.clone());

        let doc = local_doc("письмо.pdf", file.to_str().unwrap());
        let rx = transfers.start_upload(file.clone(), doc).await.unwrap();

        match rx.await.unwrap() {
            TransferOutcome::Uploaded {
                remote_path, size, ..
            } => {
                assert_eq!(remote_path, "/Документы/Входящие/Почта России/письмо.pdf");
                assert_eq!(size, 4);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.has_file("/Документы/Входящие/Почта России/письмо.pdf").await);
        assert_eq!(transfers.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_upload_collision_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("письмо.pdf");
        std::fs::write(&file, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .seed_file("/Документы/Входящие/Почта России/письмо.pdf", b"old", None)
            .await;
        let transfers = Transfers::new(store.clone());

        let doc = local_doc("письмо.pdf", file.to_str().unwrap());
        let rx = transfers.start_upload(file.clone(), doc).await.unwrap();

        assert!(matches!(
            rx.await.unwrap(),
            TransferOutcome::Failed {
                kind: TransferKind::Upload,
                error: RemoteError::AlreadyExists(_),
            }
        ));
        // The old object is untouched.
        assert_eq!(
            store
                .file_bytes("/Документы/Входящие/Почта России/письмо.pdf")
                .await
                .unwrap(),
            b"old".to_vec()
        );
    }

    #[tokio::test]
    async fn test_download_flips_nothing_on_failure() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .seed_file("/Документы/Входящие/письмо.pdf", b"data", None)
            .await;
        store.set_fail_downloads(true);
        let transfers = Transfers::new(store.clone());

        let doc = remote_doc("письмо.pdf", "/Документы/Входящие/письмо.pdf");
        let destination = dir.path().join("Входящее").join("письмо.pdf");
        let rx = transfers
            .start_download(&doc, destination.clone())
            .await
            .unwrap();

        assert!(matches!(
            rx.await.unwrap(),
            TransferOutcome::Failed {
                kind: TransferKind::Download,
                ..
            }
        ));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_two_transfers_deliver_independent_outcomes() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_file("/Документы/Входящие/первый.pdf", b"first", None)
            .await;
        store
            .seed_file("/Документы/Входящие/второй.pdf", b"second", None)
            .await;
        let transfers = Transfers::new(store.clone());

        let dir = TempDir::new().unwrap();
        let doc_a = remote_doc("первый.pdf", "/Документы/Входящие/первый.pdf");
        let doc_b = remote_doc("второй.pdf", "/Документы/Входящие/второй.pdf");

        let rx_a = transfers
            .start_download(&doc_a, dir.path().join("первый.pdf"))
            .await
            .unwrap();
        let rx_b = transfers
            .start_download(&doc_b, dir.path().join("второй.pdf"))
            .await
            .unwrap();

        // Await in the opposite order of starting; each receiver
        // resolves to its own document's outcome regardless of which
        // worker finishes first.
        let outcome_b = rx_b.await.unwrap();
        let outcome_a = rx_a.await.unwrap();
        assert!(
            matches!(outcome_b, TransferOutcome::Downloaded { ref local } if local.ends_with("второй.pdf"))
        );
        assert!(
            matches!(outcome_a, TransferOutcome::Downloaded { ref local } if local.ends_with("первый.pdf"))
        );
        assert_eq!(
            std::fs::read(dir.path().join("первый.pdf")).unwrap(),
            b"first"
        );
        assert_eq!(
            std::fs::read(dir.path().join("второй.pdf")).unwrap(),
            b"second"
        );
        assert_eq!(transfers.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_download_for_same_document_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_file("/Документы/Входящие/письмо.pdf", b"data", None)
            .await;
        let transfers = Transfers::new(store.clone());

        let doc = remote_doc("письмо.pdf", "/Документы/Входящие/письмо.pdf");
        let dir = TempDir::new().unwrap();

        let first = transfers
            .start_download(&doc, dir.path().join("a.pdf"))
            .await
            .unwrap();
        let second = transfers.start_download(&doc, dir.path().join("b.pdf")).await;

        match second {
            Err(TransferError::AlreadyInFlight(_)) => {}
            // The first worker may already have finished; then the
            // second start is legitimate and must succeed.
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
        // Wait the first out so the worker finishes before the
        // runtime shuts down.
        let _ = first.await;
    }

    #[tokio::test]
    async fn test_download_of_local_document_is_not_transferable() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("письмо.pdf");
        std::fs::write(&file, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        let transfers = Transfers::new(store);

        let doc = local_doc("письмо.pdf", file.to_str().unwrap());
        let err = transfers
            .start_download(&doc, dir.path().join("copy.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotTransferable(_, _)));
    }
}
