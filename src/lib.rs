//! # Docket
//!
//! A local-first correspondence archive with cloud and chat-backed
//! mirrors.
//!
//! Docket keeps incoming and outgoing letters in a local directory
//! tree, records them in a single JSON catalog, and mirrors the files
//! to a remote store: a WebDAV share or a Telegram chat used as a
//! message log. The catalog survives out-of-band edits on either side;
//! a synchronize sweep repairs local drift and pulls in files
//! colleagues dropped on the remote.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌─────────────┐
//! │  Catalog  │◀──│  Archive  │──▶│ RemoteStore │
//! │ data.json │   │  facade   │   │  WebDAV/TG  │
//! └───────────┘   └─────┬─────┘   └─────────────┘
//!                       │
//!           ┌───────────┼───────────┐
//!           ▼           ▼           ▼
//!     ┌───────────┐ ┌──────────┐ ┌──────────┐
//!     │ reconcile │ │ transfer │ │   CLI    │
//!     │  engine   │ │ workers  │ │  (dkt)   │
//!     └───────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dkt init                                  # prepare the archive tree
//! dkt add scan.pdf --doc-type in --number 42 --sender "Почта России"
//! dkt list --doc-type in
//! dkt sync                                  # repair + discover remote files
//! dkt download уведомление.pdf              # fetch a file found on the remote
//! dkt status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`catalog`] | Catalog document model and JSON store |
//! | [`layout`] | Local and remote directory layout |
//! | [`error`] | Error taxonomy |
//! | [`remote`] | Remote backend trait |
//! | [`remote_webdav`] | WebDAV backend |
//! | [`remote_telegram`] | Telegram message-log backend |
//! | [`remote_memory`] | In-memory backend for tests |
//! | [`reconcile`] | Local repair and remote discovery |
//! | [`transfer`] | Background upload/download workers |
//! | [`archive`] | Facade tying it all together |

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod layout;
pub mod reconcile;
pub mod remote;
pub mod remote_memory;
pub mod remote_telegram;
pub mod remote_webdav;
pub mod transfer;
