//! WebDAV remote backend.
//!
//! Talks to a WebDAV share (Yandex Disk by default) using the plain
//! HTTP verbs of the protocol: `PROPFIND` for existence checks and
//! listings, `MKCOL` for containers, `PUT`/`GET` for object bytes,
//! `DELETE` for removal. Multistatus responses are parsed with
//! `quick-xml`, matching on local element names so any namespace
//! prefix a server picks is accepted.
//!
//! # Configuration
//!
//! ```toml
//! [remote]
//! backend = "webdav"
//!
//! [remote.webdav]
//! endpoint = "https://webdav.yandex.ru"
//! timeout_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `DOCKET_WEBDAV_LOGIN`: required
//! - `DOCKET_WEBDAV_PASSWORD`: required (use an app password, not
//!   the account password, for providers that issue them)
//!
//! # Authentication
//!
//! Every request carries HTTP Basic auth. Non-ASCII path segments are
//! percent-encoded on the wire and decoded back when reading hrefs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::catalog::Document;
use crate::config::WebdavConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::layout::REMOTE_ROOT;
use crate::remote::{RemoteEntry, RemoteRef, RemoteStore, UploadReceipt};

/// WebDAV credentials loaded from environment variables.
struct WebdavCredentials {
    login: String,
    password: String,
}

impl WebdavCredentials {
    /// Load credentials from `DOCKET_WEBDAV_LOGIN` and
    /// `DOCKET_WEBDAV_PASSWORD`.
    fn from_env() -> Result<Self> {
        let login = std::env::var("DOCKET_WEBDAV_LOGIN")
            .context("DOCKET_WEBDAV_LOGIN environment variable not set")?;
        let password = std::env::var("DOCKET_WEBDAV_PASSWORD")
            .context("DOCKET_WEBDAV_PASSWORD environment variable not set")?;
        Ok(Self { login, password })
    }
}

/// A WebDAV share as a [`RemoteStore`].
pub struct WebdavStore {
    endpoint: String,
    auth_header: String,
    client: reqwest::Client,
}

impl WebdavStore {
    /// Build a store for the configured endpoint, reading credentials
    /// from the environment.
    pub fn new(config: &WebdavConfig) -> Result<Self> {
        let creds = WebdavCredentials::from_env()?;
        Self::with_credentials(config, &creds.login, &creds.password)
    }

    fn with_credentials(config: &WebdavConfig, login: &str, password: &str) -> Result<Self> {
        let token = STANDARD.encode(format!("{}:{}", login, password));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build http client")?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", token),
            client,
        })
    }

    fn url(&self, remote: &str) -> String {
        format!("{}{}", self.endpoint, encode_path(remote))
    }

    fn request(&self, method: Method, remote: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(remote))
            .header("Authorization", &self.auth_header)
    }

    /// Issue a PROPFIND. `Ok(None)` means 404, `Ok(Some(body))` the
    /// multistatus payload.
    async fn propfind(&self, remote: &str, depth: &str) -> RemoteResult<Option<String>> {
        let method = Method::from_bytes(b"PROPFIND").expect("static method name");
        let resp = self
            .request(method, remote)
            .header("Depth", depth)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.text().await?)),
            status => Err(protocol_error("PROPFIND", remote, status, resp).await),
        }
    }
}

#[async_trait]
impl RemoteStore for WebdavStore {
    fn backend(&self) -> &'static str {
        "webdav"
    }

    async fn test_connection(&self) -> bool {
        match self.propfind(REMOTE_ROOT, "0").await {
            Ok(Some(_)) => true,
            // A missing archive root still proves the share answers.
            Ok(None) => true,
            Err(e) => {
                debug!(error = %e, "webdav connectivity check failed");
                false
            }
        }
    }

    async fn exists(&self, target: RemoteRef<'_>) -> RemoteResult<bool> {
        Ok(self.propfind(target.path, "0").await?.is_some())
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let body = self
            .propfind(dir, "1")
            .await?
            .ok_or_else(|| RemoteError::NotFound(dir.to_string()))?;
        parse_multistatus(&body, dir)
    }

    async fn make_dir(&self, dir: &str) -> RemoteResult<()> {
        let method = Method::from_bytes(b"MKCOL").expect("static method name");
        let resp = self.request(method, dir).send().await?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            // The collection is already there.
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => Err(protocol_error("MKCOL", dir, status, resp).await),
        }
    }

    async fn upload(
        &self,
        local: &Path,
        target: RemoteRef<'_>,
        _doc: &Document,
    ) -> RemoteResult<UploadReceipt> {
        let bytes = tokio::fs::read(local).await?;
        let resp = self
            .request(Method::PUT, target.path)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(remote = target.path, "webdav upload complete");
            Ok(UploadReceipt::default())
        } else {
            Err(RemoteError::Upload {
                remote: target.path.to_string(),
                reason: format!("HTTP {}", status),
            })
        }
    }

    async fn download(&self, target: RemoteRef<'_>, local: &Path) -> RemoteResult<()> {
        let resp = self.request(Method::GET, target.path).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(target.path.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::Download {
                remote: target.path.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let bytes = resp.bytes().await?;

        // Stage into a temp file next to the destination so a failed
        // transfer never leaves a partial file at the final path.
        let dir = local.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(local).map_err(|e| RemoteError::Io(e.error))?;

        debug!(remote = target.path, local = %local.display(), "webdav download complete");
        Ok(())
    }

    async fn delete(&self, target: RemoteRef<'_>) -> RemoteResult<()> {
        let resp = self.request(Method::DELETE, target.path).send().await?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            // Already gone; the goal state is reached.
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(protocol_error("DELETE", target.path, status, resp).await),
        }
    }
}

async fn protocol_error(
    verb: &str,
    remote: &str,
    status: StatusCode,
    resp: reqwest::Response,
) -> RemoteError {
    let body = resp.text().await.unwrap_or_default();
    RemoteError::Protocol {
        backend: "webdav",
        detail: format!(
            "{} {} failed (HTTP {}): {}",
            verb,
            remote,
            status,
            body.chars().take(500).collect::<String>()
        ),
    }
}

// ============ Multistatus Parsing ============

#[derive(Default)]
struct ResponseEntry {
    href: String,
    is_dir: bool,
    size: u64,
}

/// Parse a `PROPFIND` Depth:1 multistatus body into entries, skipping
/// the response that describes the requested container itself.
fn parse_multistatus(xml: &str, requested: &str) -> RemoteResult<Vec<RemoteEntry>> {
    use quick_xml::events::Event;

    let mut entries = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut current: Option<ResponseEntry> = None;
    let mut in_href = false;
    let mut in_length = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => current = Some(ResponseEntry::default()),
                b"href" => in_href = true,
                b"getcontentlength" => in_length = true,
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default();
                if let Some(entry) = current.as_mut() {
                    if in_href {
                        entry.href = text.to_string();
                    } else if in_length {
                        entry.size = text.trim().parse().unwrap_or(0);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"getcontentlength" => in_length = false,
                b"response" => {
                    if let Some(entry) = current.take() {
                        if let Some(remote_entry) = finish_entry(entry, requested) {
                            entries.push(remote_entry);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RemoteError::Protocol {
                    backend: "webdav",
                    detail: format!("bad multistatus XML: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn finish_entry(entry: ResponseEntry, requested: &str) -> Option<RemoteEntry> {
    let decoded = percent_decode(href_path(&entry.href));
    let trimmed = decoded.trim_end_matches('/');

    // The first response is the container itself.
    if trimmed == requested.trim_end_matches('/') {
        return None;
    }

    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() {
        return None;
    }

    Some(if entry.is_dir {
        RemoteEntry::dir(name)
    } else {
        RemoteEntry::file(name, entry.size)
    })
}

/// Strip scheme and host when a server returns absolute-URL hrefs.
fn href_path(href: &str) -> &str {
    if let Some(rest) = href.split("://").nth(1) {
        match rest.find('/') {
            Some(pos) => &rest[pos..],
            None => "/",
        }
    } else {
        href
    }
}

/// Percent-encode a remote path, keeping `/` separators intact.
///
/// Encodes everything except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn encode_path(path: &str) -> String {
    let mut result = String::new();
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Decode `%XX` escapes; invalid escapes pass through untouched.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/%D0%94%D0%BE%D0%BA%D1%83%D0%BC%D0%B5%D0%BD%D1%82%D1%8B/%D0%92%D1%85%D0%BE%D0%B4%D1%8F%D1%89%D0%B8%D0%B5/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/%D0%94%D0%BE%D0%BA%D1%83%D0%BC%D0%B5%D0%BD%D1%82%D1%8B/%D0%92%D1%85%D0%BE%D0%B4%D1%8F%D1%89%D0%B8%D0%B5/%D0%98%D0%B2%D0%B0%D0%BD%D0%BE%D0%B2/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/%D0%94%D0%BE%D0%BA%D1%83%D0%BC%D0%B5%D0%BD%D1%82%D1%8B/%D0%92%D1%85%D0%BE%D0%B4%D1%8F%D1%89%D0%B8%D0%B5/scan01.pdf</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>2048</d:getcontentlength>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_multistatus_skips_self_entry() {
        let entries = parse_multistatus(SAMPLE, "/Документы/Входящие").unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "Иванов");
        assert!(entries[0].is_dir);

        assert_eq!(entries[1].name, "scan01.pdf");
        assert!(!entries[1].is_dir);
        assert_eq!(entries[1].size, 2048);
    }

    #[test]
    fn test_parse_multistatus_empty_container() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/Docs/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(xml, "/Docs").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let path = "/Документы/Входящие/Почта России/письмо 1.pdf";
        let encoded = encode_path(path);
        assert!(encoded.is_ascii());
        assert!(!encoded.contains(' '));
        assert_eq!(percent_decode(&encoded), path);
    }

    #[test]
    fn test_percent_decode_passes_invalid_escapes() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%2Gb"), "a%2Gb");
        assert_eq!(percent_decode("a%20b"), "a b");
    }

    #[test]
    fn test_href_path_strips_host() {
        assert_eq!(
            href_path("https://webdav.yandex.ru/a/b.pdf"),
            "/a/b.pdf"
        );
        assert_eq!(href_path("/a/b.pdf"), "/a/b.pdf");
    }
}
