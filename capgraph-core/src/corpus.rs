//! Corpus scans
//!
//! The corpus is its own index: every lookup here re-reads the documents under
//! all roots, so nothing can go stale between writes.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::Result;
use crate::models::{DocumentKind, Identifier, FIELD_CAPABILITY_ID, FIELD_ID, FIELD_NAME, FIELD_TYPE};
use crate::repository::DocumentRepository;

/// Summary of one document found during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEntry {
    pub path: PathBuf,
    pub id: Option<Identifier>,
    pub kind: Option<DocumentKind>,
    pub name: Option<String>,
    /// Owning capability, for enablers
    pub capability_id: Option<Identifier>,
}

impl DocumentEntry {
    pub fn from_text(path: PathBuf, text: &str) -> Self {
        let id: Option<Identifier> = codec::extract_field(text, FIELD_ID).and_then(|v| v.parse().ok());
        let kind = id
            .and_then(|id| DocumentKind::from_prefix(id.prefix))
            .or_else(|| match codec::extract_field(text, FIELD_TYPE)?.to_lowercase().as_str() {
                "capability" => Some(DocumentKind::Capability),
                "enabler" => Some(DocumentKind::Enabler),
                _ => None,
            });

        Self {
            path,
            id,
            kind,
            name: codec::extract_field(text, FIELD_NAME).filter(|n| !n.is_empty()),
            capability_id: codec::extract_field(text, FIELD_CAPABILITY_ID).and_then(|v| v.parse().ok()),
        }
    }
}

/// Summaries of every document in the corpus
pub fn scan(repo: &DocumentRepository) -> Result<Vec<DocumentEntry>> {
    Ok(repo
        .scan_texts()?
        .into_iter()
        .map(|(path, text)| DocumentEntry::from_text(path, &text))
        .collect())
}

/// Path of the first document whose metadata ID is `id`
pub fn find_by_id(repo: &DocumentRepository, id: &Identifier) -> Result<Option<PathBuf>> {
    for path in repo.documents()? {
        let text = match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                log::warn!("Skipping unreadable document {}: {}", path.display(), e);
                continue;
            }
        };
        let matches = codec::extract_field(&text, FIELD_ID)
            .and_then(|v| v.parse::<Identifier>().ok())
            .is_some_and(|found| found == *id);
        if matches {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Directory holding the document whose metadata ID is `id`
pub fn directory_of(repo: &DocumentRepository, id: &Identifier) -> Result<Option<PathBuf>> {
    Ok(find_by_id(repo, id)?.and_then(|path| path.parent().map(Path::to_path_buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DocumentRepository) {
        let temp_dir = TempDir::new().unwrap();
        let repo = DocumentRepository::new(GraphConfig::with_roots([temp_dir.path().join("a"), temp_dir.path().join("b")]));
        (temp_dir, repo)
    }

    #[test]
    fn test_scan_reads_metadata() {
        let (temp_dir, repo) = setup();
        fs::create_dir_all(temp_dir.path().join("a/payments")).unwrap();
        fs::create_dir_all(temp_dir.path().join("b")).unwrap();
        fs::write(
            temp_dir.path().join("a/payments/100001-capability.md"),
            "## Metadata\n- **Name**: Payments\n- **ID**: CAP-100001\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("b/notes.md"),
            "## Metadata\n- **Type**: Enabler\n- **Capability ID**: CAP-100001\n",
        )
        .unwrap();

        let entries = scan(&repo).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, Some(DocumentKind::Capability));
        assert_eq!(entries[0].name.as_deref(), Some("Payments"));
        assert_eq!(entries[1].id, None);
        assert_eq!(entries[1].kind, Some(DocumentKind::Enabler));
        assert_eq!(entries[1].capability_id, Some("CAP-100001".parse().unwrap()));
    }

    #[test]
    fn test_find_by_id_uses_metadata_not_file_name() {
        let (temp_dir, repo) = setup();
        fs::create_dir_all(temp_dir.path().join("b/team")).unwrap();
        fs::write(
            temp_dir.path().join("b/team/renamed.md"),
            "## Metadata\n- **ID**: CAP-100002\n",
        )
        .unwrap();

        let id: Identifier = "CAP-100002".parse().unwrap();
        assert_eq!(
            find_by_id(&repo, &id).unwrap(),
            Some(temp_dir.path().join("b/team/renamed.md"))
        );
        assert_eq!(directory_of(&repo, &id).unwrap(), Some(temp_dir.path().join("b/team")));
        assert_eq!(find_by_id(&repo, &"CAP-999999".parse().unwrap()).unwrap(), None);
    }
}
