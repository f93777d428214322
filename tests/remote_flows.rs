//! Mirror flows driven through the library API against the in-memory
//! remote backend.

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use docket::archive::{AddRequest, Archive, DocumentFilter};
use docket::catalog::{DocState, DocType};
use docket::error::{ArchiveError, RemoteError};
use docket::layout::Layout;
use docket::remote::RemoteStore;
use docket::remote_memory::MemoryStore;

fn archive_with(store: &Arc<MemoryStore>, root: &TempDir) -> Archive {
    Archive::new(
        Layout::new(root.path().join("archive")),
        Some(store.clone() as Arc<dyn RemoteStore>),
    )
}

fn incoming_request(root: &TempDir) -> AddRequest {
    let source = root.path().join("письмо.pdf");
    fs::write(&source, b"incoming letter bytes").unwrap();
    AddRequest {
        source,
        doc_type: DocType::Incoming,
        doc_number: "42-КЛ".to_string(),
        doc_date: Some("2024-03-01".to_string()),
        entity: "Почта России".to_string(),
    }
}

#[tokio::test]
async fn test_add_mirrors_to_remote() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let archive = archive_with(&store, &tmp);
    archive.init().await.unwrap();

    let outcome = archive.add_document(incoming_request(&tmp)).await.unwrap();
    assert!(outcome.mirrored);
    assert_eq!(outcome.document.state(), DocState::Synced);
    assert!(
        store
            .has_file("/Документы/Входящие/Почта России/письмо.pdf")
            .await
    );
}

#[tokio::test]
async fn test_discover_then_download() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .seed_file(
            "/Документы/Входящие/Почта России/входящее.pdf",
            b"seeded on another machine",
            None,
        )
        .await;

    let archive = archive_with(&store, &tmp);
    archive.init().await.unwrap();

    let report = archive.synchronize().await.unwrap();
    assert_eq!(report.added, 1);

    let docs = archive
        .list_documents(&DocumentFilter::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].state(), DocState::RemoteOnly);
    assert_eq!(docs[0].sender.as_deref(), Some("Почта России"));

    let doc = archive.download("входящее.pdf", None).await.unwrap();
    assert_eq!(doc.state(), DocState::Synced);
    let local = doc.local_path().unwrap();
    assert_eq!(fs::read(local).unwrap(), b"seeded on another machine");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_downloads_both_complete() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let big = vec![0x42u8; 2 * 1024 * 1024];
    store
        .seed_file("/Документы/Входящие/Почта России/большое.pdf", &big, None)
        .await;
    store
        .seed_file("/Документы/Входящие/Почта России/малое.pdf", b"tiny", None)
        .await;

    let archive = archive_with(&store, &tmp);
    archive.init().await.unwrap();
    assert_eq!(archive.synchronize().await.unwrap().added, 2);

    // Neither download may starve the other of its completion; the
    // timeout turns a regression into a failure instead of a hang.
    let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            archive.download("большое.pdf", None),
            archive.download("малое.pdf", None)
        )
    })
    .await
    .expect("both downloads finish");

    assert_eq!(first.unwrap().state(), DocState::Synced);
    assert_eq!(second.unwrap().state(), DocState::Synced);
    assert_eq!(
        fs::read(
            tmp.path()
                .join("archive")
                .join("Входящее")
                .join("Почта России")
                .join("малое.pdf")
        )
        .unwrap(),
        b"tiny"
    );
    assert_eq!(
        fs::read(
            tmp.path()
                .join("archive")
                .join("Входящее")
                .join("Почта России")
                .join("большое.pdf")
        )
        .unwrap()
        .len(),
        big.len()
    );
}

#[tokio::test]
async fn test_push_after_backend_appears() {
    let tmp = TempDir::new().unwrap();
    let layout = Layout::new(tmp.path().join("archive"));

    // First life of the archive: no backend configured.
    let offline = Archive::new(layout.clone(), None);
    offline.init().await.unwrap();
    let outcome = offline
        .add_document(incoming_request(&tmp))
        .await
        .unwrap();
    assert!(!outcome.mirrored);
    drop(offline);

    // Second life: a backend exists, the old document gets pushed.
    let store = Arc::new(MemoryStore::new());
    let online = archive_with(&store, &tmp);
    let doc = online.push("письмо.pdf", None).await.unwrap();
    assert_eq!(doc.state(), DocState::Synced);
    assert_eq!(
        store
            .file_bytes("/Документы/Входящие/Почта России/письмо.pdf")
            .await
            .as_deref(),
        Some(b"incoming letter bytes".as_slice())
    );
}

#[tokio::test]
async fn test_upload_collision_leaves_catalog_clean() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .seed_file(
            "/Документы/Входящие/Почта России/письмо.pdf",
            b"someone else's bytes",
            None,
        )
        .await;

    let archive = archive_with(&store, &tmp);
    archive.init().await.unwrap();

    let err = archive
        .add_document(incoming_request(&tmp))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Remote(RemoteError::AlreadyExists(_))
    ));

    // Nothing was archived, nothing overwritten.
    let docs = archive
        .list_documents(&DocumentFilter::default())
        .await
        .unwrap();
    assert!(docs.is_empty());
    assert_eq!(
        store
            .file_bytes("/Документы/Входящие/Почта России/письмо.pdf")
            .await
            .as_deref(),
        Some(b"someone else's bytes".as_slice())
    );
}

#[tokio::test]
async fn test_delete_with_remote_removes_both_copies() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let archive = archive_with(&store, &tmp);
    archive.init().await.unwrap();
    archive.add_document(incoming_request(&tmp)).await.unwrap();

    let outcome = archive.delete("письмо.pdf", None, true).await.unwrap();
    assert!(outcome.local_removed);
    assert!(outcome.remote_removed);
    assert!(outcome.remote_error.is_none());
    assert_eq!(store.file_count().await, 0);

    // Nothing left to rediscover.
    let report = archive.synchronize().await.unwrap();
    assert_eq!(report.added, 0);
}

#[tokio::test]
async fn test_two_archives_share_one_remote() {
    let store = Arc::new(MemoryStore::new());

    let machine_a = TempDir::new().unwrap();
    let archive_a = archive_with(&store, &machine_a);
    archive_a.init().await.unwrap();
    archive_a
        .add_document(incoming_request(&machine_a))
        .await
        .unwrap();

    let machine_b = TempDir::new().unwrap();
    let archive_b = archive_with(&store, &machine_b);
    archive_b.init().await.unwrap();

    let report = archive_b.synchronize().await.unwrap();
    assert_eq!(report.added, 1);

    let doc = archive_b.download("письмо.pdf", None).await.unwrap();
    assert_eq!(
        fs::read(doc.local_path().unwrap()).unwrap(),
        b"incoming letter bytes"
    );

    // Both catalogs now agree the document is mirrored.
    let docs_b = archive_b
        .list_documents(&DocumentFilter::default())
        .await
        .unwrap();
    assert_eq!(docs_b[0].state(), DocState::Synced);
}
