use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the project-local configuration file
pub const LOCAL_CONFIG_FILE: &str = "capgraph.yaml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CAPGRAPH_CONFIG";

/// Where the document corpus lives and how it is handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Storage roots, relative to the working directory unless absolute
    pub roots: Vec<PathBuf>,
    /// Root receiving documents whose parent cannot be located; first root when unset
    pub default_root: Option<PathBuf>,
    /// Extension (without dot) of files treated as documents
    pub document_extension: String,
    /// Directory names never resolved into or scanned
    pub excluded_dirs: Vec<String>,
    /// Name of the sibling folder holding pre-write backups
    pub backup_dir: String,
    /// Seconds to wait for another writer to release a document
    pub lock_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("specifications")],
            default_root: None,
            document_extension: "md".to_string(),
            excluded_dirs: ["node_modules", ".git", "target", "vendor", "dist", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_dir: "backup".to_string(),
            lock_timeout_secs: 5,
        }
    }
}

impl GraphConfig {
    /// Configuration with the given roots and default settings otherwise
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Loads the configuration from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Makes every root (and the default root) absolute against `base`
    pub fn resolve_roots(mut self, base: &Path) -> Self {
        let absolutize = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        self.roots = self.roots.iter().map(absolutize).collect();
        self.default_root = self.default_root.as_ref().map(absolutize);
        self
    }

    /// Root that receives documents with no located parent
    pub fn default_root(&self) -> Option<&Path> {
        self.default_root
            .as_deref()
            .or_else(|| self.roots.first().map(PathBuf::as_path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            anyhow::bail!("At least one storage root must be configured");
        }
        if self.document_extension.is_empty() || self.document_extension.contains('.') {
            anyhow::bail!(
                "Document extension must be non-empty and given without a dot: '{}'",
                self.document_extension
            );
        }
        if self.backup_dir.is_empty() || self.backup_dir.contains(['/', '\\']) {
            anyhow::bail!("Backup directory must be a single folder name: '{}'", self.backup_dir);
        }
        Ok(())
    }
}

/// Gets the path to the user-level configuration file
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir().context("Failed to determine config directory")?;

    Ok(config_dir.join("capgraph").join("config.yaml"))
}

/// Determines the configuration to use and resolves its roots against the
/// current working directory.
///
/// Priority: explicit path, `CAPGRAPH_CONFIG`, `./capgraph.yaml`, the user
/// config file, built-in defaults.
pub fn determine_config(explicit: Option<&Path>) -> Result<GraphConfig> {
    let cwd = env::current_dir().context("Failed to determine working directory")?;

    let config = if let Some(path) = explicit {
        GraphConfig::load(path)?
    } else if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        GraphConfig::load(path)?
    } else if cwd.join(LOCAL_CONFIG_FILE).exists() {
        GraphConfig::load(cwd.join(LOCAL_CONFIG_FILE))?
    } else {
        match get_config_path() {
            Ok(path) if path.exists() => GraphConfig::load(path)?,
            _ => GraphConfig::default(),
        }
    };

    config.validate()?;
    Ok(config.resolve_roots(&cwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.roots, vec![PathBuf::from("specifications")]);
        assert_eq!(config.document_extension, "md");
        assert_eq!(config.backup_dir, "backup");
        assert!(config.excluded_dirs.iter().any(|d| d == "node_modules"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("capgraph.yaml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "roots: [specs, docs/more]\nlock_timeout_secs: 2\n").unwrap();

        let config = GraphConfig::load(&path).unwrap();
        assert_eq!(config.roots, vec![PathBuf::from("specs"), PathBuf::from("docs/more")]);
        assert_eq!(config.lock_timeout_secs, 2);
        assert_eq!(config.document_extension, "md");
    }

    #[test]
    fn test_resolve_roots_and_default_root() {
        let base = Path::new("/work");
        let config = GraphConfig::with_roots(["a", "/abs/b"]).resolve_roots(base);
        assert_eq!(config.roots, vec![PathBuf::from("/work/a"), PathBuf::from("/abs/b")]);
        assert_eq!(config.default_root(), Some(Path::new("/work/a")));

        let mut config = GraphConfig::with_roots(["a", "b"]);
        config.default_root = Some(PathBuf::from("b"));
        let config = config.resolve_roots(base);
        assert_eq!(config.default_root(), Some(Path::new("/work/b")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(GraphConfig::with_roots(Vec::<PathBuf>::new()).validate().is_err());

        let mut config = GraphConfig::default();
        config.document_extension = ".md".to_string();
        assert!(config.validate().is_err());

        let mut config = GraphConfig::default();
        config.backup_dir = "a/b".to_string();
        assert!(config.validate().is_err());
    }
}
