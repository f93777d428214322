//! Archive folder layout, local and remote.
//!
//! The local archive root holds the catalog file plus one folder per
//! document direction; incoming documents are grouped into per-sender
//! subfolders and outgoing documents into per-executor subfolders. The
//! remote store mirrors the same two-container hierarchy under a fixed
//! root, so upload destinations and the discovery walk always agree.
//!
//! Folder names are part of the on-disk and on-remote data format and
//! must not be localized.

use std::path::{Path, PathBuf};

use crate::catalog::DocType;

/// Remote root container holding both direction containers.
pub const REMOTE_ROOT: &str = "/Документы";
/// Remote container for incoming documents.
pub const REMOTE_INCOMING: &str = "Входящие";
/// Remote container for outgoing documents.
pub const REMOTE_OUTGOING: &str = "Исходящие";

/// Local folder for incoming documents.
pub const LOCAL_INCOMING: &str = "Входящее";
/// Local folder for outgoing documents.
pub const LOCAL_OUTGOING: &str = "Исходящее";

/// Name of the catalog file inside the archive root.
pub const CATALOG_FILE: &str = "data.json";

/// Remote container for a direction (`/Документы/Входящие` or
/// `/Документы/Исходящие`).
pub fn remote_container(doc_type: DocType) -> String {
    match doc_type {
        DocType::Incoming => format!("{}/{}", REMOTE_ROOT, REMOTE_INCOMING),
        DocType::Outgoing => format!("{}/{}", REMOTE_ROOT, REMOTE_OUTGOING),
    }
}

/// Remote folder for a document, honoring the per-entity subcontainer.
pub fn remote_dir(doc_type: DocType, entity: Option<&str>) -> String {
    let base = remote_container(doc_type);
    match entity {
        Some(name) if !name.is_empty() => format!("{}/{}", base, name),
        _ => base,
    }
}

/// Full remote destination for a file of the given direction/entity.
pub fn remote_destination(doc_type: DocType, entity: Option<&str>, filename: &str) -> String {
    format!("{}/{}", remote_dir(doc_type, entity), filename)
}

/// The chain of remote containers that must exist before uploading,
/// outermost first.
pub fn remote_dir_chain(doc_type: DocType, entity: Option<&str>) -> Vec<String> {
    let mut chain = vec![REMOTE_ROOT.to_string(), remote_container(doc_type)];
    if let Some(name) = entity {
        if !name.is_empty() {
            chain.push(remote_dir(doc_type, Some(name)));
        }
    }
    chain
}

/// Resolves the local paths the archive uses.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the catalog file (`<root>/data.json`).
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    /// Local folder for a direction (`Входящее` or `Исходящее`).
    pub fn local_container(&self, doc_type: DocType) -> PathBuf {
        match doc_type {
            DocType::Incoming => self.root.join(LOCAL_INCOMING),
            DocType::Outgoing => self.root.join(LOCAL_OUTGOING),
        }
    }

    /// Local folder for a document, honoring the per-entity subfolder.
    pub fn local_dir(&self, doc_type: DocType, entity: Option<&str>) -> PathBuf {
        let base = self.local_container(doc_type);
        match entity {
            Some(name) if !name.is_empty() => base.join(name),
            _ => base,
        }
    }

    /// Full local destination for a file of the given direction/entity.
    pub fn local_destination(
        &self,
        doc_type: DocType,
        entity: Option<&str>,
        filename: &str,
    ) -> PathBuf {
        self.local_dir(doc_type, entity).join(filename)
    }

    /// Create the archive root and both direction folders if absent.
    pub fn ensure_base_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.local_container(DocType::Incoming))?;
        std::fs::create_dir_all(self.local_container(DocType::Outgoing))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_dir_flat_and_nested() {
        let layout = Layout::new("/tmp/archive");
        assert_eq!(
            layout.local_dir(DocType::Incoming, None),
            PathBuf::from("/tmp/archive/Входящее")
        );
        assert_eq!(
            layout.local_dir(DocType::Incoming, Some("Иванов")),
            PathBuf::from("/tmp/archive/Входящее/Иванов")
        );
        assert_eq!(
            layout.local_dir(DocType::Outgoing, Some("")),
            PathBuf::from("/tmp/archive/Исходящее")
        );
    }

    #[test]
    fn test_remote_destination_mirrors_hierarchy() {
        assert_eq!(
            remote_destination(DocType::Incoming, Some("Почта России"), "a.pdf"),
            "/Документы/Входящие/Почта России/a.pdf"
        );
        assert_eq!(
            remote_destination(DocType::Outgoing, None, "b.pdf"),
            "/Документы/Исходящие/b.pdf"
        );
    }

    #[test]
    fn test_remote_dir_chain_outermost_first() {
        assert_eq!(
            remote_dir_chain(DocType::Outgoing, Some("Петров")),
            vec![
                "/Документы".to_string(),
                "/Документы/Исходящие".to_string(),
                "/Документы/Исходящие/Петров".to_string(),
            ]
        );
        assert_eq!(remote_dir_chain(DocType::Incoming, None).len(), 2);
    }
}
