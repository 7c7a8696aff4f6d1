//! Application data locations.
//!
//! Everything dbview persists (connection profiles, query history) lives in a
//! single directory, resolved once and passed to the storage types.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Overrides the data directory when set to a non-empty path.
pub const CONFIG_DIR_ENV: &str = "DBVIEW_CONFIG_DIR";

const APP_DIR: &str = "dbview";
const CONNECTIONS_FILE: &str = "connections.json";
const HISTORY_FILE: &str = "history.json";

/// Resolved data directory and the files inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Resolve from `DBVIEW_CONFIG_DIR`, then the platform config dir, then `~/.dbview`.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with(std::env::var_os(CONFIG_DIR_ENV))
    }

    fn resolve_with(override_dir: Option<OsString>) -> Result<Self> {
        if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
            return Ok(Self::at(dir));
        }

        let root = dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{}", APP_DIR))))
            .context("Could not determine a configuration directory")?;
        Ok(Self { root })
    }

    /// Use an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn connections_file(&self) -> PathBuf {
        self.root.join(CONNECTIONS_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    /// Create the data directory if it is missing.
    pub async fn ensure_dir(&self) -> Result<()> {
        async_fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {}", self.root.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let paths = AppPaths::resolve_with(Some(OsString::from("/tmp/dbview-test"))).unwrap();
        assert_eq!(paths.root(), Path::new("/tmp/dbview-test"));
        assert_eq!(
            paths.connections_file(),
            PathBuf::from("/tmp/dbview-test/connections.json")
        );
        assert_eq!(paths.history_file(), PathBuf::from("/tmp/dbview-test/history.json"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let paths = AppPaths::resolve_with(Some(OsString::new())).unwrap();
        assert!(paths.root().ends_with("dbview") || paths.root().ends_with(".dbview"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(temp.path().join("a").join("b"));
        smol::block_on(paths.ensure_dir()).unwrap();
        assert!(paths.root().is_dir());
    }
}
