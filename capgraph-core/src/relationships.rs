//! Enabler ownership
//!
//! An enabler document is authoritative for its own summary fields; its
//! parent capability keeps a cached row of them in its `Enablers` table, and
//! the enabler file lives in the parent's directory. This module keeps the
//! three in step when enablers are created, saved or moved to a new parent.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::corpus;
use crate::error::{GraphError, Result};
use crate::models::{
    EnablerData, IdPrefix, Identifier, DEFAULT_APPROVAL, DEFAULT_PRIORITY, DEFAULT_STATUS,
    ENABLERS_HEADING, FIELD_APPROVAL, FIELD_CAPABILITY_ID, FIELD_DESCRIPTION, FIELD_DEVELOPER,
    FIELD_NAME, FIELD_OWNER, FIELD_PRIORITY, FIELD_STATUS,
};
use crate::repository::DocumentRepository;
use crate::template::render_enabler;

/// Result of each independent reparenting step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReparentOutcome {
    /// The row was removed from the old parent's table
    pub removed_from_old: bool,
    /// A row was added to the new parent's table
    pub added_to_new: bool,
    /// New location of the enabler file, when it moved
    pub moved_to: Option<PathBuf>,
    /// Steps that failed and were logged; earlier steps are not rolled back
    pub failures: Vec<String>,
}

impl ReparentOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, message: String) {
        log::warn!("{}", message);
        self.failures.push(message);
    }
}

pub struct RelationshipManager<'a> {
    repo: &'a DocumentRepository,
}

impl<'a> RelationshipManager<'a> {
    pub fn new(repo: &'a DocumentRepository) -> Self {
        Self { repo }
    }

    /// Writes a new enabler next to its parent capability (default root when the
    /// parent cannot be found) and mirrors it into the parent's table.
    ///
    /// When a document with the enabler's ID already exists anywhere under the
    /// roots, its metadata is updated in place and it is reparented if the
    /// parent changed, so the enabler never ends up in two files or two tables.
    pub fn create_enabler(
        &self,
        data: &EnablerData,
        capability_id: Option<&Identifier>,
    ) -> Result<PathBuf> {
        let mut data = data.clone();
        if let Some(id) = capability_id {
            data.capability_id = Some(*id);
        }

        let file_name = Some(data.id)
            .filter(|id| id.prefix == IdPrefix::Enabler)
            .and_then(|id| id.file_name(&self.repo.config().document_extension))
            .ok_or_else(|| GraphError::InvalidIdentifier(format!("{} is not an enabler id", data.id)))?;

        if let Some(existing) = corpus::find_by_id(self.repo, &data.id)? {
            return self.update_existing(existing, &data);
        }

        let dir = match &data.capability_id {
            Some(id) => corpus::directory_of(self.repo, id)?,
            None => None,
        };
        let dir = match dir {
            Some(dir) => dir,
            None => {
                if let Some(id) = &data.capability_id {
                    log::warn!("Capability {} not found, placing {} in the default root", id, data.id);
                }
                self.repo.default_root()?.to_path_buf()
            }
        };

        let path = dir.join(file_name);
        if path.exists() {
            log::info!("{} already exists, updating it", path.display());
            self.repo.update(&path, |text| apply_enabler_fields(text, &data))?;
        } else {
            self.repo.write(&path, &render_enabler(&data))?;
        }

        if let Some(parent) = &data.capability_id {
            self.save_enabler_fields(&data, parent)?;
        }

        Ok(path)
    }

    /// Patches an enabler that already has a document, moving it when its
    /// parent changed
    fn update_existing(&self, path: PathBuf, data: &EnablerData) -> Result<PathBuf> {
        log::info!("{} already exists at {}, updating it", data.id, path.display());
        let old_parent = EnablerData::from_document(&self.repo.read(&path)?)
            .ok()
            .and_then(|old| old.capability_id);
        self.repo.update(&path, |text| apply_enabler_fields(text, data))?;

        let mut path = path;
        if old_parent != data.capability_id {
            let outcome = self.reparent(
                &data.id,
                &data.name,
                old_parent.as_ref(),
                data.capability_id.as_ref(),
            )?;
            if let Some(moved) = outcome.moved_to {
                path = moved;
            }
        }

        if let Some(parent) = &data.capability_id {
            self.save_enabler_fields(data, parent)?;
        }

        Ok(path)
    }

    /// Mirrors the enabler's summary fields into its parent's table.
    ///
    /// A missing parent or table is logged and reported as `false`.
    pub fn save_enabler_fields(&self, data: &EnablerData, capability_id: &Identifier) -> Result<bool> {
        let Some(parent) = corpus::find_by_id(self.repo, capability_id)? else {
            log::warn!("Parent {} of {} not found, row not mirrored", capability_id, data.id);
            return Ok(false);
        };

        let key = data.id.to_string();
        let cells = data.summary_cells();
        let result = self
            .repo
            .update(&parent, |text| codec::upsert_table_row(text, ENABLERS_HEADING, &key, &cells));
        recover(result, || format!("Could not mirror {} into {}", data.id, capability_id))
    }

    /// Removes the enabler's row from its parent's table.
    ///
    /// A missing parent or table is logged and reported as `false`.
    pub fn remove_enabler_row(&self, enabler_id: &Identifier, capability_id: &Identifier) -> Result<bool> {
        let Some(parent) = corpus::find_by_id(self.repo, capability_id)? else {
            log::warn!("Parent {} of {} not found, no row removed", capability_id, enabler_id);
            return Ok(false);
        };

        let key = enabler_id.to_string();
        let result = self
            .repo
            .update(&parent, |text| codec::remove_table_row(text, ENABLERS_HEADING, &key));
        recover(result, || format!("Could not remove {} from {}", enabler_id, capability_id))
    }

    /// Moves an enabler from `old` to `new`.
    ///
    /// Runs independent, idempotent steps: drop the old row, add a placeholder
    /// row to the new parent, move the file into the new parent's directory,
    /// point the enabler's own `Capability ID` at the new parent. A failed step
    /// is logged and recorded; earlier steps stay applied.
    pub fn reparent(
        &self,
        enabler_id: &Identifier,
        enabler_name: &str,
        old: Option<&Identifier>,
        new: Option<&Identifier>,
    ) -> Result<ReparentOutcome> {
        let mut outcome = ReparentOutcome::default();
        if old == new {
            return Ok(outcome);
        }
        log::info!(
            "Reparenting {} from {} to {}",
            enabler_id,
            old.map(|id| id.to_string()).unwrap_or_else(|| "none".into()),
            new.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
        );

        let old_dir = match old {
            Some(old) => self.detach(enabler_id, old, &mut outcome)?,
            None => None,
        };

        let new_dir = match new {
            Some(new) => Some(self.attach(enabler_id, enabler_name, new, &mut outcome)?),
            None => None,
        };

        let mut enabler_path = corpus::find_by_id(self.repo, enabler_id)?;
        if enabler_path.is_none() {
            outcome.fail(format!("Enabler document {} not found", enabler_id));
        }

        let moved = match (&old_dir, &new_dir, &enabler_path) {
            (Some(old_dir), Some(new_dir), Some(current))
                if old_dir != new_dir && current.parent() != Some(new_dir.as_path()) =>
            {
                self.relocate(current, new_dir, &mut outcome)
            }
            _ => None,
        };
        if moved.is_some() {
            enabler_path = moved;
        }

        if let Some(path) = &enabler_path {
            let value = new.map(|id| id.to_string()).unwrap_or_default();
            let result = self
                .repo
                .update(path, |text| codec::upsert_field(text, FIELD_CAPABILITY_ID, &value));
            if let Err(e) = result {
                if !e.is_recoverable() {
                    return Err(e);
                }
                outcome.fail(format!("Could not set Capability ID of {}: {}", enabler_id, e));
            }
        }

        Ok(outcome)
    }

    /// Step (a): removes the row from the old parent; returns its directory
    fn detach(
        &self,
        enabler_id: &Identifier,
        old: &Identifier,
        outcome: &mut ReparentOutcome,
    ) -> Result<Option<PathBuf>> {
        let Some(parent) = corpus::find_by_id(self.repo, old)? else {
            outcome.fail(format!("Old parent {} of {} not found", old, enabler_id));
            return Ok(None);
        };

        let key = enabler_id.to_string();
        match self
            .repo
            .update(&parent, |text| codec::remove_table_row(text, ENABLERS_HEADING, &key))
        {
            Ok(changed) => outcome.removed_from_old = changed,
            Err(e) if e.is_recoverable() => {
                outcome.fail(format!("Could not remove {} from {}: {}", enabler_id, old, e))
            }
            Err(e) => return Err(e),
        }

        Ok(parent.parent().map(Path::to_path_buf))
    }

    /// Step (b): adds a placeholder row to the new parent unless one exists;
    /// returns the parent's directory, or the default root when it is missing
    fn attach(
        &self,
        enabler_id: &Identifier,
        enabler_name: &str,
        new: &Identifier,
        outcome: &mut ReparentOutcome,
    ) -> Result<PathBuf> {
        let Some(parent) = corpus::find_by_id(self.repo, new)? else {
            outcome.fail(format!("New parent {} of {} not found", new, enabler_id));
            return Ok(self.repo.default_root()?.to_path_buf());
        };

        let key = enabler_id.to_string();
        let cells = vec![
            enabler_name.to_string(),
            String::new(),
            DEFAULT_STATUS.to_string(),
            DEFAULT_APPROVAL.to_string(),
            DEFAULT_PRIORITY.to_string(),
        ];
        let result = self.repo.update(&parent, |text| {
            let rows = codec::extract_table(text, ENABLERS_HEADING)?;
            if rows.iter().any(|row| row.key() == key) {
                Ok(text.to_string())
            } else {
                codec::upsert_table_row(text, ENABLERS_HEADING, &key, &cells)
            }
        });
        match result {
            Ok(changed) => outcome.added_to_new = changed,
            Err(e) if e.is_recoverable() => {
                outcome.fail(format!("Could not add {} to {}: {}", enabler_id, new, e))
            }
            Err(e) => return Err(e),
        }

        match parent.parent() {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Ok(self.repo.default_root()?.to_path_buf()),
        }
    }

    /// Step (c): moves the enabler file, keeping its name
    fn relocate(&self, current: &Path, new_dir: &Path, outcome: &mut ReparentOutcome) -> Option<PathBuf> {
        let file_name = current.file_name()?;
        let destination = new_dir.join(file_name);
        match self.repo.move_document(current, &destination) {
            Ok(()) => {
                outcome.moved_to = Some(destination.clone());
                Some(destination)
            }
            Err(e) => {
                outcome.fail(format!(
                    "Could not move {} to {}: {}",
                    current.display(),
                    destination.display(),
                    e
                ));
                None
            }
        }
    }
}

/// Patches an existing enabler document with `data`'s metadata
pub fn apply_enabler_fields(text: &str, data: &EnablerData) -> Result<String> {
    let capability = data.capability_id.map(|id| id.to_string()).unwrap_or_default();
    let mut fields = vec![
        (FIELD_NAME, data.name.as_str()),
        (FIELD_CAPABILITY_ID, capability.as_str()),
        (FIELD_STATUS, data.status.as_str()),
        (FIELD_APPROVAL, data.approval.as_str()),
        (FIELD_PRIORITY, data.priority.as_str()),
        (FIELD_DESCRIPTION, data.description.as_str()),
    ];
    if let Some(owner) = &data.owner {
        fields.push((FIELD_OWNER, owner));
    }
    if let Some(developer) = &data.developer {
        fields.push((FIELD_DEVELOPER, developer));
    }

    fields
        .into_iter()
        .try_fold(text.to_string(), |text, (label, value)| codec::upsert_field(&text, label, value))
}

/// Downgrades a recoverable failure on a non-primary document to a logged `false`
fn recover<F: FnOnce() -> String>(result: Result<bool>, context: F) -> Result<bool> {
    match result {
        Ok(changed) => Ok(changed),
        Err(e) if e.is_recoverable() => {
            log::warn!("{}: {}", context(), e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::models::CapabilityData;
    use crate::template::render_capability;
    use std::fs;
    use tempfile::TempDir;

    fn id(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    struct Fixture {
        temp_dir: TempDir,
        repo: DocumentRepository,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let roots = [temp_dir.path().join("specs"), temp_dir.path().join("team")];
            for root in &roots {
                fs::create_dir_all(root).unwrap();
            }
            let repo = DocumentRepository::new(GraphConfig::with_roots(roots));
            Self { temp_dir, repo }
        }

        fn capability(&self, root: &str, cap: &str) -> PathBuf {
            let cap_id = id(cap);
            let path = self.temp_dir.path().join(root).join(cap_id.file_name("md").unwrap());
            fs::write(&path, render_capability(&CapabilityData::new(cap_id, cap))).unwrap();
            path
        }

        fn manager(&self) -> RelationshipManager<'_> {
            RelationshipManager::new(&self.repo)
        }

        fn rows(&self, path: &Path) -> Vec<codec::TableRow> {
            codec::extract_table(&fs::read_to_string(path).unwrap(), ENABLERS_HEADING).unwrap()
        }
    }

    fn enabler(enb: &str, name: &str) -> EnablerData {
        let mut data = EnablerData::new(id(enb), name);
        data.description = "Talks to the acquirer".to_string();
        data.priority = "High".to_string();
        data
    }

    #[test]
    fn test_create_enabler_lands_next_to_parent() {
        let fx = Fixture::new();
        let cap = fx.capability("team", "CAP-100001");

        let path = fx
            .manager()
            .create_enabler(&enabler("ENB-654321", "Gateway"), Some(&id("CAP-100001")))
            .unwrap();

        assert_eq!(path, fx.temp_dir.path().join("team/654321-enabler.md"));
        let written = EnablerData::from_document(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.capability_id, Some(id("CAP-100001")));

        let rows = fx.rows(&cap);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].cells,
            vec!["ENB-654321", "Gateway", "Talks to the acquirer", "In Draft", "Not Approved", "High"]
        );
    }

    #[test]
    fn test_create_enabler_without_parent_uses_default_root() {
        let fx = Fixture::new();
        let path = fx
            .manager()
            .create_enabler(&enabler("ENB-000001", "Orphan"), Some(&id("CAP-999999")))
            .unwrap();
        assert_eq!(path, fx.temp_dir.path().join("specs/000001-enabler.md"));
    }

    #[test]
    fn test_create_enabler_twice_updates_in_place() {
        let fx = Fixture::new();
        fx.capability("specs", "CAP-100001");
        let manager = fx.manager();
        let path = manager
            .create_enabler(&enabler("ENB-000002", "First"), Some(&id("CAP-100001")))
            .unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("\nAuthor notes stay.\n");
        fs::write(&path, &text).unwrap();

        let mut renamed = enabler("ENB-000002", "Second");
        renamed.status = "Implemented".to_string();
        manager.create_enabler(&renamed, Some(&id("CAP-100001"))).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("Author notes stay.\n"));
        assert_eq!(codec::extract_field(&text, FIELD_NAME).as_deref(), Some("Second"));
        assert_eq!(codec::extract_field(&text, FIELD_STATUS).as_deref(), Some("Implemented"));
        let rows = fx.rows(&fx.temp_dir.path().join("specs/100001-capability.md"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cell(1), Some("Second"));
    }

    #[test]
    fn test_create_existing_enabler_under_new_parent_moves_it() {
        let fx = Fixture::new();
        let old = fx.capability("specs", "CAP-100001");
        let new = fx.capability("team", "CAP-100002");
        let manager = fx.manager();
        let first = manager
            .create_enabler(&enabler("ENB-000008", "Roamer"), Some(&id("CAP-100001")))
            .unwrap();

        let second = manager
            .create_enabler(&enabler("ENB-000008", "Roamer"), Some(&id("CAP-100002")))
            .unwrap();

        assert_eq!(second, fx.temp_dir.path().join("team/000008-enabler.md"));
        assert!(!first.exists());
        let text = fs::read_to_string(&second).unwrap();
        assert_eq!(codec::extract_field(&text, FIELD_CAPABILITY_ID).as_deref(), Some("CAP-100002"));
        assert!(fx.rows(&old).is_empty());
        let rows = fx.rows(&new);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[..3], ["ENB-000008", "Roamer", "Talks to the acquirer"]);
        assert!(crate::audit::audit(&fx.repo).unwrap().is_clean());
    }

    #[test]
    fn test_save_enabler_fields_is_idempotent() {
        let fx = Fixture::new();
        let cap = fx.capability("specs", "CAP-100001");
        let manager = fx.manager();
        let data = enabler("ENB-000003", "Stable");

        assert!(manager.save_enabler_fields(&data, &id("CAP-100001")).unwrap());
        let first = fs::read_to_string(&cap).unwrap();
        assert!(!manager.save_enabler_fields(&data, &id("CAP-100001")).unwrap());
        assert_eq!(fs::read_to_string(&cap).unwrap(), first);
        assert_eq!(fx.rows(&cap).len(), 1);
    }

    #[test]
    fn test_save_enabler_fields_missing_parent_or_table_is_not_fatal() {
        let fx = Fixture::new();
        let manager = fx.manager();
        let data = enabler("ENB-000004", "Lost");
        assert!(!manager.save_enabler_fields(&data, &id("CAP-424242")).unwrap());

        let bare = fx.temp_dir.path().join("specs/bare.md");
        fs::write(&bare, "## Metadata\n- **ID**: CAP-424242\n").unwrap();
        assert!(!manager.save_enabler_fields(&data, &id("CAP-424242")).unwrap());
        assert_eq!(fs::read_to_string(&bare).unwrap(), "## Metadata\n- **ID**: CAP-424242\n");
    }

    #[test]
    fn test_reparent_within_same_directory_does_not_move() {
        let fx = Fixture::new();
        let old = fx.capability("specs", "CAP-100001");
        let new = fx.capability("specs", "CAP-100002");
        let manager = fx.manager();
        let path = manager
            .create_enabler(&enabler("ENB-000005", "Local"), Some(&id("CAP-100001")))
            .unwrap();

        let outcome = manager
            .reparent(&id("ENB-000005"), "Local", Some(&id("CAP-100001")), Some(&id("CAP-100002")))
            .unwrap();

        assert!(outcome.is_complete());
        assert!(outcome.removed_from_old);
        assert!(outcome.added_to_new);
        assert_eq!(outcome.moved_to, None);
        assert!(fx.rows(&old).is_empty());
        assert_eq!(fx.rows(&new)[0].cells[..2], ["ENB-000005", "Local"]);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(codec::extract_field(&text, FIELD_CAPABILITY_ID).as_deref(), Some("CAP-100002"));
    }

    #[test]
    fn test_failed_move_keeps_table_updates() {
        let fx = Fixture::new();
        let old = fx.capability("specs", "CAP-100001");
        let new = fx.capability("team", "CAP-100002");
        let manager = fx.manager();
        let path = manager
            .create_enabler(&enabler("ENB-000006", "Stuck"), Some(&id("CAP-100001")))
            .unwrap();
        fs::write(fx.temp_dir.path().join("team/000006-enabler.md"), "squatter").unwrap();

        let outcome = manager
            .reparent(&id("ENB-000006"), "Stuck", Some(&id("CAP-100001")), Some(&id("CAP-100002")))
            .unwrap();

        assert!(!outcome.is_complete());
        assert!(outcome.failures[0].contains("Could not move"));
        assert!(fx.rows(&old).is_empty());
        assert_eq!(fx.rows(&new).len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_reparent_same_parent_is_no_op() {
        let fx = Fixture::new();
        let outcome = fx
            .manager()
            .reparent(&id("ENB-000007"), "x", Some(&id("CAP-100001")), Some(&id("CAP-100001")))
            .unwrap();
        assert_eq!(outcome, ReparentOutcome::default());
    }
}
