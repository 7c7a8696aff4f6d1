//! Local persistence for connection profiles, secrets and query history.
//!
//! Profiles and history are plain JSON documents under the data directory
//! (see `AppPaths`). Each loads independently; a missing, unreadable or
//! corrupt file loads as empty instead of failing startup.

mod connections;
mod credentials;
mod history;

pub use connections::{ConnectionConfig, ConnectionManager};
#[cfg(feature = "keyring")]
pub use credentials::KeyringCredentialStore;
pub use credentials::{
    CredentialStore, KEYRING_SERVICE, MemoryCredentialStore, default_credential_store,
};
pub use history::{HistoryEntry, MAX_HISTORY_ENTRIES, QueryHistory};

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Version written into every persisted document.
pub(crate) const FILE_VERSION: u32 = 1;

/// Read a JSON document. Missing files are `None`; unreadable or corrupt ones
/// are `None` with a warning.
pub(crate) async fn read_json(path: &Path) -> Option<serde_json::Value> {
    let text = match async_fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read file, starting empty");
            return None;
        }
    };

    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt file, starting empty");
            None
        }
    }
}

/// Write `value` as pretty JSON, creating parent directories. The file is
/// replaced atomically through a sibling temp file.
pub(crate) async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        async_fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialize document")?;
    let tmp = path.with_extension("json.tmp");
    async_fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    async_fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    tracing::trace!(path = %path.display(), "Saved document");
    Ok(())
}
