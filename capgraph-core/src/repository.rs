//! Document repository
//!
//! Maps logical (relative) paths onto the configured storage roots, refuses
//! anything that would land outside them, and performs every write through a
//! backup-then-overwrite sequence under a per-document file lock.

use fs2::FileExt;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};

/// Reads and writes documents under the configured storage roots
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    config: GraphConfig,
}

impl DocumentRepository {
    /// Creates a repository over `config`, whose roots should already be absolute
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn default_root(&self) -> Result<&Path> {
        self.config
            .default_root()
            .ok_or_else(|| GraphError::DocumentNotFound("no storage root configured".to_string()))
    }

    /// Root that physically contains `path`
    pub fn root_of(&self, path: &Path) -> Option<&Path> {
        self.config
            .roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    /// Resolves `logical` under `root`.
    ///
    /// Fails with `PathTraversal` when the normalized path leaves `root`, passes
    /// through an excluded or backup directory, or when an existing ancestor is
    /// a link pointing outside the root. Nothing on disk is touched.
    pub fn resolve(&self, logical: &Path, root: &Path) -> Result<PathBuf> {
        let traversal = || GraphError::PathTraversal(logical.to_path_buf());

        let mut parts: Vec<&OsStr> = Vec::new();
        for component in logical.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(traversal());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(traversal()),
            }
        }

        if let Some((_, dirs)) = parts.split_last() {
            if dirs.iter().any(|dir| self.is_excluded_dir(dir)) {
                return Err(traversal());
            }
        }

        let resolved = parts.iter().fold(root.to_path_buf(), |acc, part| acc.join(part));

        if let Ok(canonical_root) = root.canonicalize() {
            let existing = resolved
                .ancestors()
                .find(|p| p.symlink_metadata().is_ok())
                .map(Path::to_path_buf);
            if let Some(existing) = existing {
                // A dangling link cannot be checked, so it is not followed
                let canonical = existing.canonicalize().map_err(|_| traversal())?;
                if !canonical.starts_with(&canonical_root) {
                    return Err(traversal());
                }
            }
        }

        Ok(resolved)
    }

    /// Finds an existing document for `logical` in any root, first root first
    pub fn locate(&self, logical: &Path) -> Result<PathBuf> {
        for root in &self.config.roots {
            let path = self.resolve(logical, root)?;
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(GraphError::DocumentNotFound(logical.display().to_string()))
    }

    /// Like `locate`, falling back to a new path under the default root
    pub fn locate_for_write(&self, logical: &Path) -> Result<PathBuf> {
        match self.locate(logical) {
            Ok(path) => Ok(path),
            Err(GraphError::DocumentNotFound(_)) => self.resolve(logical, self.default_root()?),
            Err(e) => Err(e),
        }
    }

    fn is_excluded_dir(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        name == self.config.backup_dir || self.config.excluded_dirs.iter().any(|d| *d == name)
    }

    pub fn is_document(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.config.document_extension))
    }

    fn ensure_document(&self, path: &Path) -> Result<()> {
        if self.is_document(path) {
            Ok(())
        } else {
            Err(GraphError::UnsupportedFileType(path.to_path_buf()))
        }
    }

    // =========================================================================
    // Locking
    // =========================================================================

    fn lock_path(&self, path: &Path) -> PathBuf {
        let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        path.with_file_name(&self.config.backup_dir)
            .join(format!(".{}.lock", file_name))
    }

    /// Acquire an exclusive lock on the document for a read-patch-write cycle.
    /// The lock is released when the returned handle is dropped.
    fn acquire_write_lock(&self, path: &Path) -> Result<File> {
        let lock_path = self.lock_path(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.lock_timeout_secs);

        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(GraphError::LockTimeout(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Lock holder info, for debugging
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );

        Ok(lock_file)
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    pub fn read(&self, path: &Path) -> Result<String> {
        self.ensure_document(path)?;
        if !path.is_file() {
            return Err(GraphError::DocumentNotFound(path.display().to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Writes `text`, backing up the previous content first when the file exists
    pub fn write(&self, path: &Path, text: &str) -> Result<()> {
        self.ensure_document(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = self.acquire_write_lock(path)?;
        self.backup(path)?;
        fs::write(path, text)?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    /// Reads, patches and rewrites a document under one lock hold.
    ///
    /// Returns false, without backup or write, when `patch` leaves the text unchanged.
    pub fn update<F>(&self, path: &Path, patch: F) -> Result<bool>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        self.ensure_document(path)?;
        if !path.is_file() {
            return Err(GraphError::DocumentNotFound(path.display().to_string()));
        }

        let _lock = self.acquire_write_lock(path)?;
        let text = fs::read_to_string(path)?;
        let patched = patch(&text)?;
        if patched == text {
            return Ok(false);
        }

        self.backup(path)?;
        fs::write(path, patched)?;
        log::info!("Updated {}", path.display());
        Ok(true)
    }

    /// Deletes a document after backing it up
    pub fn delete(&self, path: &Path) -> Result<()> {
        self.ensure_document(path)?;
        if !path.is_file() {
            return Err(GraphError::DocumentNotFound(path.display().to_string()));
        }

        let _lock = self.acquire_write_lock(path)?;
        self.backup(path)?;
        fs::remove_file(path)?;
        log::info!("Deleted {}", path.display());
        Ok(())
    }

    /// Moves a document, possibly across roots, creating the destination directory.
    /// An existing destination is never overwritten, even one created after the check.
    pub fn move_document(&self, from: &Path, to: &Path) -> Result<()> {
        self.ensure_document(from)?;
        self.ensure_document(to)?;
        if !from.is_file() {
            return Err(GraphError::DocumentNotFound(from.display().to_string()));
        }
        if to.exists() {
            return Err(GraphError::DestinationExists(to.to_path_buf()));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = self.acquire_write_lock(from)?;
        Self::claim_destination(from, to)?;
        fs::remove_file(from)?;
        log::info!("Moved {} -> {}", from.display(), to.display());
        Ok(())
    }

    /// Places `from`'s content at `to`, failing with `DestinationExists` when
    /// `to` is already taken. The source is left in place.
    fn claim_destination(from: &Path, to: &Path) -> Result<()> {
        let taken = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                GraphError::DestinationExists(to.to_path_buf())
            } else {
                GraphError::Io(e)
            }
        };

        match fs::hard_link(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(taken(e)),
            Err(e) => {
                // Different filesystems: copy into a file only we could have created
                log::debug!("Hard link {} failed ({}), copying", to.display(), e);
                let mut target = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(to)
                    .map_err(taken)?;
                let mut source = File::open(from)?;
                std::io::copy(&mut source, &mut target)?;
                Ok(())
            }
        }
    }

    /// Copies the current content of `path` into the sibling backup folder.
    /// Returns the backup path, or None when there was nothing to back up.
    fn backup(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !path.is_file() {
            return Ok(None);
        }

        let backup_dir = path.with_file_name(&self.config.backup_dir);
        fs::create_dir_all(&backup_dir)?;

        let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut backup_path = backup_dir.join(format!("{}.{}.bak", file_name, stamp));
        let mut counter = 1;
        while backup_path.exists() {
            backup_path = backup_dir.join(format!("{}.{}-{}.bak", file_name, stamp, counter));
            counter += 1;
        }

        fs::copy(path, &backup_path)?;
        log::debug!("Backed up {} to {}", path.display(), backup_path.display());
        Ok(Some(backup_path))
    }

    // =========================================================================
    // Corpus scans
    // =========================================================================

    /// Every document under every root, sorted, skipping excluded and backup folders.
    /// Roots that do not exist yet contribute nothing.
    pub fn documents(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();

        for root in &self.config.roots {
            if !root.is_dir() {
                log::debug!("Skipping missing root {}", root.display());
                continue;
            }

            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && self.is_excluded_dir(e.file_name())));
            for entry in walker {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_type().is_file() && self.is_document(entry.path()) {
                    found.push(entry.into_path());
                }
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Every document together with its text. Invalid UTF-8 is replaced rather
    /// than failing the whole scan.
    pub fn scan_texts(&self) -> Result<Vec<(PathBuf, String)>> {
        self.documents()?
            .into_iter()
            .map(|path| {
                let bytes = fs::read(&path)?;
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok((path, text))
            })
            .collect()
    }
}
