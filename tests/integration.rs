use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dkt_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dkt");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Sample files to archive
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("письмо.pdf"), b"incoming letter bytes").unwrap();
    fs::write(files_dir.join("ответ.pdf"), b"outgoing reply bytes").unwrap();

    let config_content = format!(
        r#"[storage]
root = "{}/archive"

[remote]
backend = "none"
"#,
        root.display()
    );

    let config_path = config_dir.join("docket.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dkt(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dkt_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dkt binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add_incoming(config_path: &Path, tmp: &TempDir) -> (String, String, bool) {
    let file = tmp.path().join("files").join("письмо.pdf");
    run_dkt(
        config_path,
        &[
            "add",
            file.to_str().unwrap(),
            "--doc-type",
            "in",
            "--number",
            "42-КЛ",
            "--sender",
            "Почта России",
        ],
    )
}

#[test]
fn test_init_creates_tree_and_catalog() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dkt(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ok"));

    let archive = tmp.path().join("archive");
    assert!(archive.join("data.json").exists());
    assert!(archive.join("Входящее").is_dir());
    assert!(archive.join("Исходящее").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_dkt(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_dkt(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_add_and_list() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let (stdout, stderr, success) = add_incoming(&config_path, &tmp);
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("add письмо.pdf"));
    assert!(stdout.contains("type: incoming"));
    assert!(stdout.contains("sender: Почта России"));
    assert!(stdout.contains("not mirrored"));
    assert!(stdout.contains("ok"));

    // The file was copied into the sender's folder
    assert!(tmp
        .path()
        .join("archive")
        .join("Входящее")
        .join("Почта России")
        .join("письмо.pdf")
        .exists());

    let (stdout, _, success) = run_dkt(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("письмо.pdf"));
    assert!(stdout.contains("local"));
    assert!(stdout.contains("1 document(s)"));
}

#[test]
fn test_add_rejects_wrong_entity_flag() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let file = tmp.path().join("files").join("письмо.pdf");
    let (_, stderr, success) = run_dkt(
        &config_path,
        &[
            "add",
            file.to_str().unwrap(),
            "--doc-type",
            "in",
            "--number",
            "1",
            "--executor",
            "Иванов",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("--sender"), "stderr was: {}", stderr);
}

#[test]
fn test_add_duplicate_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let (_, _, first) = add_incoming(&config_path, &tmp);
    assert!(first);

    let (_, stderr, second) = add_incoming(&config_path, &tmp);
    assert!(!second, "duplicate add should fail");
    assert!(stderr.contains("already exists"), "stderr was: {}", stderr);
}

#[test]
fn test_list_filter_by_type() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);
    add_incoming(&config_path, &tmp);

    let reply = tmp.path().join("files").join("ответ.pdf");
    let (_, _, success) = run_dkt(
        &config_path,
        &[
            "add",
            reply.to_str().unwrap(),
            "--doc-type",
            "out",
            "--number",
            "7",
            "--executor",
            "Иванов",
        ],
    );
    assert!(success);

    let (stdout, _, _) = run_dkt(&config_path, &["list", "--doc-type", "out"]);
    assert!(stdout.contains("ответ.pdf"));
    assert!(!stdout.contains("письмо.pdf"));
    assert!(stdout.contains("1 document(s)"));

    let (stdout, _, _) = run_dkt(&config_path, &["list", "--query", "почта"]);
    assert!(stdout.contains("письмо.pdf"));
    assert!(!stdout.contains("ответ.pdf"));
}

#[test]
fn test_delete_removes_row_and_file() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);
    add_incoming(&config_path, &tmp);

    let (stdout, stderr, success) = run_dkt(&config_path, &["delete", "письмо.pdf"]);
    assert!(
        success,
        "delete failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("local copy removed"));

    assert!(!tmp
        .path()
        .join("archive")
        .join("Входящее")
        .join("Почта России")
        .join("письмо.pdf")
        .exists());

    let (stdout, _, _) = run_dkt(&config_path, &["list"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_sync_drops_vanished_document_without_remote() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);
    add_incoming(&config_path, &tmp);

    // The user deletes the archived file in their file manager.
    fs::remove_file(
        tmp.path()
            .join("archive")
            .join("Входящее")
            .join("Почта России")
            .join("письмо.pdf"),
    )
    .unwrap();

    let (stdout, _, success) = run_dkt(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("dropped (no copy anywhere): письмо.pdf"));
    assert!(stdout.contains("discovered on remote: 0"));

    let (stdout, _, _) = run_dkt(&config_path, &["list"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_sync_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);
    add_incoming(&config_path, &tmp);

    let (_, _, first) = run_dkt(&config_path, &["sync"]);
    assert!(first);
    let (stdout, _, second) = run_dkt(&config_path, &["sync"]);
    assert!(second);
    assert!(stdout.contains("discovered on remote: 0"));

    let (stdout, _, _) = run_dkt(&config_path, &["list"]);
    assert!(stdout.contains("1 document(s)"));
}

#[test]
fn test_sender_registry_roundtrip() {
    let (_tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let (stdout, _, success) = run_dkt(
        &config_path,
        &["sender", "add", "Иванов", "--description", "отдел писем"],
    );
    assert!(success);
    assert!(stdout.contains("id: 1"));

    // Duplicate, case-insensitively
    let (_, stderr, success) = run_dkt(&config_path, &["sender", "add", "иванов"]);
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr was: {}", stderr);

    let (stdout, _, _) = run_dkt(&config_path, &["sender", "list"]);
    assert!(stdout.contains("Иванов"));
    assert!(stdout.contains("отдел писем"));

    let (_, _, success) = run_dkt(&config_path, &["sender", "remove", "Иванов"]);
    assert!(success);
    let (stdout, _, _) = run_dkt(&config_path, &["sender", "list"]);
    assert!(stdout.contains("No senders registered."));
}

#[test]
fn test_entity_ids_do_not_collide_after_removal() {
    let (_tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    run_dkt(&config_path, &["executor", "add", "Иванов"]);
    run_dkt(&config_path, &["executor", "add", "Петров"]);
    run_dkt(&config_path, &["executor", "add", "Сидоров"]);
    run_dkt(&config_path, &["executor", "remove", "Петров"]);

    // Remaining ids are 1 and 3; the next one continues past the max.
    let (stdout, _, success) = run_dkt(&config_path, &["executor", "add", "Козлов"]);
    assert!(success);
    assert!(stdout.contains("id: 4"), "stdout was: {}", stdout);
}

#[test]
fn test_status_counts() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);
    add_incoming(&config_path, &tmp);

    let (stdout, _, success) = run_dkt(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("documents: 1 (1 local, 0 remote, 0 synced)"));
    assert!(stdout.contains("senders: 1"));
    assert!(stdout.contains("remote: none"));
}

#[test]
fn test_download_without_backend_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let (_, stderr, success) = run_dkt(&config_path, &["download", "письмо.pdf"]);
    assert!(!success);
    assert!(
        stderr.contains("no remote backend"),
        "stderr was: {}",
        stderr
    );
}

#[test]
fn test_open_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    let (_, stderr, success) = run_dkt(&config_path, &["open", "нет.pdf"]);
    assert!(!success);
    assert!(stderr.contains("no document matches"), "stderr was: {}", stderr);
}

#[test]
fn test_catalog_survives_legacy_fields() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    // A catalog written by an older version: string-typed size and the
    // legacy remote prefix.
    let catalog = tmp.path().join("archive").join("data.json");
    fs::write(
        &catalog,
        r#"{
  "documents": [
    {
      "filename": "старое.pdf",
      "type": "incoming",
      "doc_number": "3",
      "path": "yadisk:/Документы/Входящие/старое.pdf",
      "remote_path": "/Документы/Входящие/старое.pdf",
      "date": "2023-11-02 10:00:00",
      "size": "2048"
    }
  ],
  "senders": [],
  "executors": [],
  "current_user": null
}"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_dkt(&config_path, &["list"]);
    assert!(success, "list failed: stderr={}", stderr);
    assert!(stdout.contains("старое.pdf"));
    assert!(stdout.contains("remote"));
    assert!(stdout.contains("2.00 KB"));

    // The migrated catalog was written back with integer size.
    let rewritten = fs::read_to_string(&catalog).unwrap();
    assert!(rewritten.contains("\"size\": 2048"));
    assert!(rewritten.contains("remote:/Документы/Входящие/старое.pdf"));
}

#[test]
fn test_corrupt_catalog_is_an_error() {
    let (tmp, config_path) = setup_test_env();
    run_dkt(&config_path, &["init"]);

    fs::write(tmp.path().join("archive").join("data.json"), "{not json").unwrap();

    let (_, stderr, success) = run_dkt(&config_path, &["list"]);
    assert!(!success, "corrupt catalog must not be silently replaced");
    assert!(stderr.contains("corrupt"), "stderr was: {}", stderr);
}
