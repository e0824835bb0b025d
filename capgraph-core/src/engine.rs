//! Engine entry point
//!
//! `Engine` owns the repository and the identifier allocator and runs the
//! consistency hooks after every save, so callers only deal with logical paths
//! and document text.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::audit::{self, AuditReport};
use crate::config::GraphConfig;
use crate::corpus::{self, DocumentEntry};
use crate::error::{GraphError, Result};
use crate::identifier::IdAllocator;
use crate::models::{
    document_id, CapabilityData, DependencyEdge, EnablerData, IdPrefix, Identifier,
};
use crate::relationships::{RelationshipManager, ReparentOutcome};
use crate::repository::DocumentRepository;
use crate::sync::{DependencySynchronizer, SyncReport};
use crate::template::render_capability;

/// Consistency work triggered by a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    /// Final location of the saved document
    pub path: PathBuf,
    pub id: Option<Identifier>,
    /// Set when a capability's edges were synchronized
    pub sync: Option<SyncReport>,
    /// Set when an enabler changed parent
    pub reparent: Option<ReparentOutcome>,
    /// Whether the enabler's row in its parent was rewritten
    pub mirrored: bool,
}

/// What `save_document` learned from the text before writing it
enum Parsed {
    Capability(CapabilityData),
    Enabler(EnablerData),
    Other(Identifier),
    Unidentified,
}

pub struct Engine {
    repo: DocumentRepository,
    allocator: IdAllocator,
}

impl Engine {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            repo: DocumentRepository::new(config),
            allocator: IdAllocator::new(),
        }
    }

    pub fn repository(&self) -> &DocumentRepository {
        &self.repo
    }

    fn relationships(&self) -> RelationshipManager<'_> {
        RelationshipManager::new(&self.repo)
    }

    pub fn allocate(&self, prefix: IdPrefix) -> Result<Identifier> {
        self.allocator.allocate(&self.repo, prefix)
    }

    /// Path of the document whose metadata ID is `id`
    pub fn find(&self, id: &Identifier) -> Result<PathBuf> {
        corpus::find_by_id(&self.repo, id)?.ok_or_else(|| GraphError::DocumentNotFound(id.to_string()))
    }

    pub fn read_document(&self, logical: &Path) -> Result<String> {
        let path = self.repo.locate(logical)?;
        self.repo.read(&path)
    }

    /// Writes the text without running any consistency hook
    pub fn write_document(&self, logical: &Path, text: &str) -> Result<PathBuf> {
        let path = self.repo.locate_for_write(logical)?;
        self.repo.write(&path, text)?;
        Ok(path)
    }

    /// Writes a document and brings the rest of the graph in line with it.
    ///
    /// Capabilities get their declared edges mirrored. Enablers are reparented
    /// when their `Capability ID` changed since the last save, then mirrored
    /// into their parent's table. Documents without a parsable ID are only
    /// written. A capability or enabler that cannot be parsed is rejected
    /// before anything touches disk.
    pub fn save_document(&self, logical: &Path, text: &str) -> Result<SaveOutcome> {
        let path = self.repo.locate_for_write(logical)?;

        let parsed = match document_id(text) {
            Ok(id) => match id.prefix {
                IdPrefix::Capability => Parsed::Capability(CapabilityData::from_document(text)?),
                IdPrefix::Enabler => Parsed::Enabler(EnablerData::from_document(text)?),
                _ => Parsed::Other(id),
            },
            Err(e) => {
                log::debug!("No consistency hooks for {}: {}", path.display(), e);
                Parsed::Unidentified
            }
        };

        let previous = if path.is_file() {
            Some(self.repo.read(&path)?)
        } else {
            None
        };
        self.repo.write(&path, text)?;

        let mut outcome = SaveOutcome {
            path,
            id: None,
            sync: None,
            reparent: None,
            mirrored: false,
        };

        match parsed {
            Parsed::Capability(data) => {
                outcome.id = Some(data.id);
                outcome.sync = Some(self.synchronize_capability(&data.id, &data.upstream, &data.downstream)?);
            }
            Parsed::Enabler(data) => {
                outcome.id = Some(data.id);
                let old_parent = previous
                    .as_deref()
                    .and_then(|old| EnablerData::from_document(old).ok())
                    .and_then(|old| old.capability_id);

                if previous.is_some() && old_parent != data.capability_id {
                    let reparent = self.reparent_enabler(
                        &data.id,
                        &data.name,
                        old_parent.as_ref(),
                        data.capability_id.as_ref(),
                    )?;
                    if let Some(moved) = &reparent.moved_to {
                        outcome.path = moved.clone();
                    }
                    outcome.reparent = Some(reparent);
                }

                outcome.mirrored = self.mirror_enabler_fields(&data)?;
            }
            Parsed::Other(id) => outcome.id = Some(id),
            Parsed::Unidentified => {}
        }

        Ok(outcome)
    }

    /// Deletes a document. An enabler's row is removed from its parent first.
    pub fn delete_document(&self, logical: &Path) -> Result<PathBuf> {
        let path = self.repo.locate(logical)?;
        let text = self.repo.read(&path)?;

        if let Ok(enabler) = EnablerData::from_document(&text) {
            if let Some(parent) = &enabler.capability_id {
                self.relationships().remove_enabler_row(&enabler.id, parent)?;
            }
        }

        self.repo.delete(&path)?;
        Ok(path)
    }

    /// Moves a document to `new` inside the root that holds it
    pub fn rename_document(&self, old: &Path, new: &Path) -> Result<PathBuf> {
        let from = self.repo.locate(old)?;
        let root = self
            .repo
            .root_of(&from)
            .ok_or_else(|| GraphError::PathTraversal(from.clone()))?;
        let to = self.repo.resolve(new, root)?;
        self.repo.move_document(&from, &to)?;
        Ok(to)
    }

    pub fn synchronize_capability(
        &self,
        id: &Identifier,
        upstream: &[DependencyEdge],
        downstream: &[DependencyEdge],
    ) -> Result<SyncReport> {
        DependencySynchronizer::new(&self.repo).synchronize(id, upstream, downstream)
    }

    /// Writes a new capability into `dir` (relative to the default root) and
    /// mirrors any edges it declares.
    pub fn create_capability(&self, data: &CapabilityData, dir: Option<&Path>) -> Result<PathBuf> {
        let file_name = Some(data.id)
            .filter(|id| id.prefix == IdPrefix::Capability)
            .and_then(|id| id.file_name(&self.repo.config().document_extension))
            .ok_or_else(|| GraphError::InvalidIdentifier(format!("{} is not a capability id", data.id)))?;
        let logical = dir.map(|d| d.join(&file_name)).unwrap_or_else(|| PathBuf::from(&file_name));
        let path = self.repo.resolve(&logical, self.repo.default_root()?)?;
        if path.exists() {
            return Err(GraphError::DestinationExists(path));
        }

        self.repo.write(&path, &render_capability(data))?;
        if !data.upstream.is_empty() || !data.downstream.is_empty() {
            self.synchronize_capability(&data.id, &data.upstream, &data.downstream)?;
        }
        Ok(path)
    }

    pub fn create_enabler(&self, data: &EnablerData, capability_id: Option<&Identifier>) -> Result<PathBuf> {
        self.relationships().create_enabler(data, capability_id)
    }

    /// Copies the enabler's summary fields into its parent's table
    pub fn mirror_enabler_fields(&self, data: &EnablerData) -> Result<bool> {
        match &data.capability_id {
            Some(parent) => self.relationships().save_enabler_fields(data, parent),
            None => Ok(false),
        }
    }

    pub fn reparent_enabler(
        &self,
        id: &Identifier,
        name: &str,
        old_parent: Option<&Identifier>,
        new_parent: Option<&Identifier>,
    ) -> Result<ReparentOutcome> {
        self.relationships().reparent(id, name, old_parent, new_parent)
    }

    pub fn list(&self) -> Result<Vec<DocumentEntry>> {
        corpus::scan(&self.repo)
    }

    pub fn audit(&self) -> Result<AuditReport> {
        audit::audit(&self.repo)
    }
}
