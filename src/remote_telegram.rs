//! Telegram remote backend.
//!
//! Uses a Telegram chat as a flat message log of document files. Every
//! archived file is one message with an attached document; the message
//! caption carries the metadata in a small line-oriented micro-format:
//!
//! ```text
//! Входящий
//! Номер: 42-КЛ
//! Дата: 2024-03-05
//! Отправитель: Почта России
//! ```
//!
//! A standalone line `Входящий`/`Исходящий` marks the direction;
//! `Номер:`, `Дата:`, `Отправитель:` and `Исполнитель:` label the
//! fields. Labels match case-insensitively, the first occurrence of a
//! label wins, and unmatched lines are ignored. Captions never leave
//! this module; listings hand back structured entries.
//!
//! The chat has no real directories. The hierarchy other backends
//! store physically is simulated here: a message's direction and
//! sender/executor place it under a virtual container path, `list`
//! groups scanned messages by those paths, and `make_dir` is a no-op.
//! Listing is approximated by scanning the bot's update history
//! (`getUpdates` pages), which is the only history access the Bot API
//! offers.
//!
//! # Configuration
//!
//! ```toml
//! [remote]
//! backend = "telegram"
//!
//! [remote.telegram]
//! chat_id = -1001234567890
//! timeout_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! - `DOCKET_TELEGRAM_TOKEN`: required, the bot token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tokio::sync::RwLock;
use tracing::debug;

use crate::catalog::{DocType, Document};
use crate::config::TelegramConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::layout::{remote_container, remote_destination, REMOTE_ROOT};
use crate::remote::{EntryMeta, RemoteEntry, RemoteRef, RemoteStore, UploadReceipt};

const TYPE_MARKER_INCOMING: &str = "входящий";
const TYPE_MARKER_OUTGOING: &str = "исходящий";

const LABEL_NUMBER: &str = "номер";
const LABEL_DATE: &str = "дата";
const LABEL_SENDER: &str = "отправитель";
const LABEL_EXECUTOR: &str = "исполнитель";

/// Metadata recovered from (or rendered into) one message caption.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionMeta {
    pub doc_type: Option<DocType>,
    pub doc_number: Option<String>,
    pub doc_date: Option<String>,
    pub sender: Option<String>,
    pub executor: Option<String>,
}

/// Parse a caption. Lines are matched independently; a line is either
/// a direction marker, a `Label: value` pair with a known label, or
/// ignored. First match per field wins.
pub fn parse_caption(caption: &str) -> CaptionMeta {
    let mut meta = CaptionMeta::default();

    for line in caption.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let lowered = line.to_lowercase();
        if meta.doc_type.is_none() {
            if lowered == TYPE_MARKER_INCOMING {
                meta.doc_type = Some(DocType::Incoming);
                continue;
            }
            if lowered == TYPE_MARKER_OUTGOING {
                meta.doc_type = Some(DocType::Outgoing);
                continue;
            }
        }

        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let slot = match label.as_str() {
            LABEL_NUMBER => &mut meta.doc_number,
            LABEL_DATE => &mut meta.doc_date,
            LABEL_SENDER => &mut meta.sender,
            LABEL_EXECUTOR => &mut meta.executor,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    meta
}

/// Render the caption for an uploaded document.
pub fn render_caption(doc: &Document) -> String {
    let mut lines = Vec::new();
    lines.push(
        match doc.doc_type {
            DocType::Incoming => "Входящий",
            DocType::Outgoing => "Исходящий",
        }
        .to_string(),
    );
    if let Some(number) = doc.doc_number.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Номер: {}", number));
    }
    if let Some(date) = doc.doc_date.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Дата: {}", date));
    }
    if let Some(sender) = doc.sender.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Отправитель: {}", sender));
    }
    if let Some(executor) = doc.executor.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Исполнитель: {}", executor));
    }
    lines.join("\n")
}

/// One document message found in the chat.
#[derive(Debug, Clone)]
struct ChatDoc {
    message_id: i64,
    file_id: String,
    file_name: String,
    size: u64,
    meta: CaptionMeta,
}

impl ChatDoc {
    fn doc_type(&self) -> Option<DocType> {
        self.meta.doc_type
    }

    fn entity(&self) -> Option<&str> {
        match self.meta.doc_type? {
            DocType::Incoming => self.meta.sender.as_deref(),
            DocType::Outgoing => self.meta.executor.as_deref(),
        }
    }

    /// Virtual container this message lives under.
    fn virtual_dir(&self) -> Option<String> {
        Some(crate::layout::remote_dir(self.doc_type()?, self.entity()))
    }

    /// Full virtual path of the file.
    fn virtual_path(&self) -> Option<String> {
        Some(remote_destination(
            self.doc_type()?,
            self.entity(),
            &self.file_name,
        ))
    }

    fn entry_meta(&self) -> EntryMeta {
        EntryMeta {
            doc_number: self.meta.doc_number.clone(),
            doc_date: self.meta.doc_date.clone(),
            sender: self.meta.sender.clone(),
            executor: self.meta.executor.clone(),
            remote_id: Some(self.message_id.to_string()),
        }
    }
}

/// Group scanned messages into a listing of `dir`. `None` means the
/// virtual container does not exist.
fn entries_under(docs: &[ChatDoc], dir: &str) -> Option<Vec<RemoteEntry>> {
    let dir = dir.trim_end_matches('/');

    if dir == REMOTE_ROOT {
        return Some(vec![
            RemoteEntry::dir(crate::layout::REMOTE_INCOMING),
            RemoteEntry::dir(crate::layout::REMOTE_OUTGOING),
        ]);
    }

    for doc_type in [DocType::Incoming, DocType::Outgoing] {
        let container = remote_container(doc_type);

        if dir == container {
            let mut entries = Vec::new();
            let mut subdirs = BTreeSet::new();
            for doc in docs.iter().filter(|d| d.doc_type() == Some(doc_type)) {
                match doc.entity() {
                    Some(entity) => {
                        subdirs.insert(entity.to_string());
                    }
                    None => {
                        let mut entry = RemoteEntry::file(doc.file_name.clone(), doc.size);
                        entry.meta = Some(doc.entry_meta());
                        entries.push(entry);
                    }
                }
            }
            let mut listing: Vec<RemoteEntry> =
                subdirs.into_iter().map(RemoteEntry::dir).collect();
            listing.append(&mut entries);
            return Some(listing);
        }

        if let Some(entity) = dir
            .strip_prefix(container.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if entity.is_empty() || entity.contains('/') {
                continue;
            }
            let matching: Vec<RemoteEntry> = docs
                .iter()
                .filter(|d| d.doc_type() == Some(doc_type) && d.entity() == Some(entity))
                .map(|d| {
                    let mut entry = RemoteEntry::file(d.file_name.clone(), d.size);
                    entry.meta = Some(d.entry_meta());
                    entry
                })
                .collect();
            if matching.is_empty() {
                return None;
            }
            return Some(matching);
        }
    }

    None
}

// ============ Bot API Types ============

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    document: Option<TgDocument>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgDocument {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    #[allow(dead_code)]
    id: i64,
}

/// A Telegram chat as a [`RemoteStore`].
pub struct TelegramStore {
    api_base: String,
    token: String,
    chat_id: i64,
    client: reqwest::Client,
    /// Scan of the chat's document messages, filled lazily and
    /// invalidated by uploads and deletes.
    scanned: RwLock<Option<Vec<ChatDoc>>>,
}

impl TelegramStore {
    /// Build a store for the configured chat, reading the bot token
    /// from `DOCKET_TELEGRAM_TOKEN`.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = std::env::var("DOCKET_TELEGRAM_TOKEN")
            .context("DOCKET_TELEGRAM_TOKEN environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build http client")?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            chat_id: config.chat_id,
            client,
            scanned: RwLock::new(None),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> RemoteResult<T> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(params)
            .send()
            .await?;
        let envelope: ApiResponse<T> = resp.json().await?;
        unwrap_envelope(method, envelope)
    }

    /// Scan the chat's update history for document messages, caching
    /// the result for the lifetime of this store until invalidated.
    async fn scan(&self) -> RemoteResult<Vec<ChatDoc>> {
        if let Some(docs) = self.scanned.read().await.as_ref() {
            return Ok(docs.clone());
        }

        let docs = self.fetch_chat_docs().await?;
        debug!(count = docs.len(), "telegram chat scan complete");
        *self.scanned.write().await = Some(docs.clone());
        Ok(docs)
    }

    async fn invalidate(&self) {
        *self.scanned.write().await = None;
    }

    async fn fetch_chat_docs(&self) -> RemoteResult<Vec<ChatDoc>> {
        const PAGE: usize = 100;

        // Keyed by message id so an edited message replaces its
        // earlier appearance.
        let mut by_message: BTreeMap<i64, ChatDoc> = BTreeMap::new();
        let mut offset: Option<i64> = None;

        loop {
            let mut params = serde_json::json!({
                "limit": PAGE,
                "timeout": 0,
                "allowed_updates": ["message", "channel_post", "edited_message", "edited_channel_post"],
            });
            if let Some(offset) = offset {
                params["offset"] = serde_json::json!(offset);
            }

            let updates: Vec<TgUpdate> = self.call("getUpdates", &params).await?;
            let Some(last) = updates.last() else {
                break;
            };
            offset = Some(last.update_id + 1);
            let page_len = updates.len();

            for update in updates {
                let Some(message) = update.message.or(update.channel_post) else {
                    continue;
                };
                if message.chat.id != self.chat_id {
                    continue;
                }
                let Some(document) = message.document else {
                    continue;
                };
                let Some(file_name) = document.file_name else {
                    continue;
                };
                let meta = parse_caption(message.caption.as_deref().unwrap_or(""));
                if meta.doc_type.is_none() {
                    // Not an archive message; plain file drops in the
                    // chat are ignored.
                    continue;
                }
                by_message.insert(
                    message.message_id,
                    ChatDoc {
                        message_id: message.message_id,
                        file_id: document.file_id,
                        file_name,
                        size: document.file_size.unwrap_or(0),
                        meta,
                    },
                );
            }

            if page_len < PAGE {
                break;
            }
        }

        Ok(by_message.into_values().collect())
    }

    /// Resolve a reference to a scanned message, by id when known,
    /// else by virtual path.
    async fn resolve(&self, target: RemoteRef<'_>) -> RemoteResult<ChatDoc> {
        let docs = self.scan().await?;

        if let Some(id) = target.id {
            if let Some(doc) = docs.iter().find(|d| d.message_id.to_string() == id) {
                return Ok(doc.clone());
            }
        }

        docs.iter()
            .find(|d| d.virtual_path().as_deref() == Some(target.path))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(target.path.to_string()))
    }
}

#[async_trait]
impl RemoteStore for TelegramStore {
    fn backend(&self) -> &'static str {
        "telegram"
    }

    async fn test_connection(&self) -> bool {
        let result: RemoteResult<TgUser> = self.call("getMe", &serde_json::json!({})).await;
        match result {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "telegram connectivity check failed");
                false
            }
        }
    }

    async fn exists(&self, target: RemoteRef<'_>) -> RemoteResult<bool> {
        let docs = self.scan().await?;

        if let Some(id) = target.id {
            if docs.iter().any(|d| d.message_id.to_string() == id) {
                return Ok(true);
            }
        }

        let path = target.path.trim_end_matches('/');
        if docs
            .iter()
            .any(|d| d.virtual_path().as_deref() == Some(path))
        {
            return Ok(true);
        }
        // Containers exist once something lives under them; the fixed
        // ones always do.
        Ok(entries_under(&docs, path).is_some())
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let docs = self.scan().await?;
        entries_under(&docs, dir).ok_or_else(|| RemoteError::NotFound(dir.to_string()))
    }

    async fn make_dir(&self, _dir: &str) -> RemoteResult<()> {
        // Containers are virtual; they appear with their first file.
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        target: RemoteRef<'_>,
        doc: &Document,
    ) -> RemoteResult<UploadReceipt> {
        let bytes = tokio::fs::read(local).await?;
        let caption = render_caption(doc);

        let form = Form::new()
            .text("chat_id", self.chat_id.to_string())
            .text("caption", caption)
            .part(
                "document",
                Part::bytes(bytes).file_name(doc.filename.clone()),
            );

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        let envelope: ApiResponse<TgMessage> = resp.json().await?;
        let message = unwrap_envelope("sendDocument", envelope).map_err(|e| {
            RemoteError::Upload {
                remote: target.path.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.invalidate().await;
        debug!(remote = target.path, message_id = message.message_id, "telegram upload complete");
        Ok(UploadReceipt {
            remote_id: Some(message.message_id.to_string()),
        })
    }

    async fn download(&self, target: RemoteRef<'_>, local: &Path) -> RemoteResult<()> {
        let doc = self.resolve(target).await?;

        let file: TgFile = self
            .call(
                "getFile",
                &serde_json::json!({ "file_id": doc.file_id }),
            )
            .await?;
        let file_path = file.file_path.ok_or_else(|| RemoteError::Download {
            remote: target.path.to_string(),
            reason: "getFile returned no file_path".to_string(),
        })?;

        let resp = self.client.get(self.file_url(&file_path)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Download {
                remote: target.path.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        let bytes = resp.bytes().await?;

        let dir = local.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(local).map_err(|e| RemoteError::Io(e.error))?;

        debug!(remote = target.path, local = %local.display(), "telegram download complete");
        Ok(())
    }

    async fn delete(&self, target: RemoteRef<'_>) -> RemoteResult<()> {
        let doc = match self.resolve(target).await {
            Ok(doc) => doc,
            // Already gone.
            Err(RemoteError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let deleted: bool = self
            .call(
                "deleteMessage",
                &serde_json::json!({
                    "chat_id": self.chat_id,
                    "message_id": doc.message_id,
                }),
            )
            .await?;
        self.invalidate().await;

        if deleted {
            Ok(())
        } else {
            Err(RemoteError::Protocol {
                backend: "telegram",
                detail: format!("deleteMessage refused for message {}", doc.message_id),
            })
        }
    }
}

fn unwrap_envelope<T>(method: &str, envelope: ApiResponse<T>) -> RemoteResult<T> {
    if !envelope.ok {
        return Err(RemoteError::Protocol {
            backend: "telegram",
            detail: format!(
                "{}: {}",
                method,
                envelope
                    .description
                    .unwrap_or_else(|| "no error description".to_string())
            ),
        });
    }
    envelope.result.ok_or_else(|| RemoteError::Protocol {
        backend: "telegram",
        detail: format!("{}: ok response without result", method),
    })
}
