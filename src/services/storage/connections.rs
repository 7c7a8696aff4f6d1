//! Connection profiles persisted as JSON, secrets kept in a `CredentialStore`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_lock::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::credentials::CredentialStore;
use super::{FILE_VERSION, read_json, write_json};
use crate::services::database::blocking::BlockingExecutor;
use crate::services::database::traits::{DriverParams, DriverType};

/// A saved connection profile. Never contains the password.
///
/// Every field has a default, so profiles written by older versions (or by
/// hand) load with whatever they specify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub id: String,
    pub name: String,
    pub driver_type: DriverType,
    pub host: String,
    #[serde(deserialize_with = "lenient_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub read_only: bool,
    /// Stored as written; drivers map it with `SslMode::parse`
    pub ssl_mode: String,
    /// Accent color a UI may show for this connection
    pub color: String,
    /// Backend-specific keys passed through to the driver
    pub extra_params: Map<String, JsonValue>,

    pub ssh_enabled: bool,
    pub ssh_host: String,
    #[serde(deserialize_with = "lenient_port")]
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_key_path: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Unnamed".to_string(),
            driver_type: DriverType::default(),
            host: String::new(),
            port: 0,
            database: String::new(),
            username: String::new(),
            read_only: false,
            ssl_mode: "prefer".to_string(),
            color: String::new(),
            extra_params: Map::new(),
            ssh_enabled: false,
            ssh_host: String::new(),
            ssh_port: 22,
            ssh_username: String::new(),
            ssh_key_path: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// A blank profile with a freshly generated id.
    pub fn create_new(name: impl Into<String>, driver_type: DriverType) -> Self {
        Self {
            name: name.into(),
            driver_type,
            ..Default::default()
        }
    }

    /// Short location summary: the file path for SQLite, otherwise
    /// `user@host:port/database`.
    pub fn display_info(&self) -> String {
        if self.driver_type.is_file_based() || self.host.is_empty() {
            return self.database.clone();
        }

        let mut info = String::new();
        if !self.username.is_empty() {
            info.push_str(&self.username);
            info.push('@');
        }
        info.push_str(&self.host);
        if self.port != 0 {
            info.push_str(&format!(":{}", self.port));
        }
        info.push('/');
        info.push_str(&self.database);
        info
    }

    /// Driver params for this profile, without any secret.
    pub fn driver_params(&self) -> DriverParams {
        let mut params = DriverParams::new()
            .with("host", self.host.as_str())
            .with("port", self.port)
            .with("database", self.database.as_str())
            .with("username", self.username.as_str())
            .with("ssl_mode", self.ssl_mode.as_str())
            .with("read_only", self.read_only);
        for (key, value) in &self.extra_params {
            params.insert(key, value.clone());
        }
        params
    }
}

/// Accept a port written as a number or a numeric string. Anything else
/// (null, empty, out of range) reads as 0, meaning "driver default".
fn lenient_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let port = match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(port.unwrap_or(0))
}

#[derive(Serialize)]
struct ConnectionsFile<'a> {
    version: u32,
    connections: Vec<&'a JsonValue>,
}

/// Profiles read from disk, plus the raw entries that could not be parsed.
#[derive(Default)]
struct Profiles {
    configs: Vec<ConnectionConfig>,
    /// Written back untouched so a newer or hand-edited file loses nothing
    unreadable: Vec<JsonValue>,
}

/// Manages saved connection profiles.
///
/// Profiles are kept in memory in insertion order, unique by id, and written
/// back to disk after every change.
pub struct ConnectionManager {
    path: PathBuf,
    connections: RwLock<Vec<ConnectionConfig>>,
    unreadable: Vec<JsonValue>,
    credentials: Arc<dyn CredentialStore>,
    executor: BlockingExecutor,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("path", &self.path)
            .field("credentials", &self.credentials.name())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Load profiles from `path`.
    ///
    /// Entries that fail to parse are not listed but are kept and written
    /// back on the next save. A repeated id replaces the earlier entry.
    pub async fn load(path: impl Into<PathBuf>, credentials: Arc<dyn CredentialStore>) -> Self {
        let path = path.into();
        let profiles = Self::read_profiles(&path).await;
        tracing::debug!(
            path = %path.display(),
            count = profiles.configs.len(),
            unreadable = profiles.unreadable.len(),
            credentials = credentials.name(),
            "Loaded connection profiles"
        );

        Self {
            path,
            connections: RwLock::new(profiles.configs),
            unreadable: profiles.unreadable,
            credentials,
            executor: BlockingExecutor::new("credentials"),
        }
    }

    async fn read_profiles(path: &Path) -> Profiles {
        let Some(document) = read_json(path).await else {
            return Profiles::default();
        };
        let Some(entries) = document.get("connections").and_then(JsonValue::as_array) else {
            tracing::warn!(path = %path.display(), "Connections file has no connection list");
            return Profiles::default();
        };

        let mut profiles = Profiles::default();
        for entry in entries {
            match ConnectionConfig::deserialize(entry) {
                Ok(config) => {
                    match profiles.configs.iter_mut().find(|c| c.id == config.id) {
                        Some(existing) => {
                            tracing::warn!(
                                connection_id = %config.id,
                                "Duplicate connection id, keeping the last entry"
                            );
                            *existing = config;
                        }
                        None => profiles.configs.push(config),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable connection profile");
                    profiles.unreadable.push(entry.clone());
                }
            }
        }
        profiles
    }

    async fn persist(&self, connections: &[ConnectionConfig]) -> Result<()> {
        let entries = connections
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;
        write_json(
            &self.path,
            &ConnectionsFile {
                version: FILE_VERSION,
                connections: entries.iter().chain(&self.unreadable).collect(),
            },
        )
        .await
    }

    async fn with_credentials<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&(dyn CredentialStore + 'static)) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.executor.run_with(&self.credentials, f).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All profiles in insertion order.
    pub async fn list(&self) -> Vec<ConnectionConfig> {
        self.connections.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ConnectionConfig> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Insert or replace a profile, then store `password` if given.
    ///
    /// An empty password is not stored.
    pub async fn save(&self, config: ConnectionConfig, password: Option<&str>) -> Result<()> {
        let id = config.id.clone();
        {
            let mut connections = self.connections.write().await;
            match connections.iter_mut().find(|c| c.id == config.id) {
                Some(existing) => *existing = config,
                None => connections.push(config),
            }
            self.persist(&connections).await?;
        }
        tracing::info!(connection_id = %id, "Saved connection profile");

        if let Some(password) = password {
            let password = password.to_string();
            self.with_credentials(move |store| store.store_password(&id, &password))
                .await?;
        }
        Ok(())
    }

    /// Remove a profile and its stored secret. Returns `false` if unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        {
            let mut connections = self.connections.write().await;
            let before = connections.len();
            connections.retain(|c| c.id != id);
            if connections.len() == before {
                return Ok(false);
            }
            self.persist(&connections).await?;
        }

        let key = id.to_string();
        self.with_credentials(move |store| store.delete(&key)).await?;
        tracing::info!(connection_id = %id, "Deleted connection profile");
        Ok(true)
    }

    /// Copy a profile under a new id and name `"<name> (copy)"`, including its
    /// stored secret.
    pub async fn duplicate(&self, id: &str) -> Result<Option<ConnectionConfig>> {
        let Some(source) = self.get(id).await else {
            return Ok(None);
        };

        let copy = ConnectionConfig {
            id: Uuid::new_v4().to_string(),
            name: format!("{} (copy)", source.name),
            ..source
        };
        self.save(copy.clone(), None).await?;

        if let Some(password) = self.get_password(id).await? {
            let key = copy.id.clone();
            self.with_credentials(move |store| store.store_password(&key, &password))
                .await?;
        }
        Ok(Some(copy))
    }

    pub async fn get_password(&self, id: &str) -> Result<Option<String>> {
        let key = id.to_string();
        self.with_credentials(move |store| store.get(&key)).await
    }

    /// Params for connecting to profile `id`, with the password included
    /// only when one is stored for that id.
    pub async fn get_connection_config(&self, id: &str) -> Result<Option<DriverParams>> {
        let Some(config) = self.get(id).await else {
            return Ok(None);
        };

        let mut params = config.driver_params();
        if let Some(password) = self.get_password(id).await? {
            params.insert("password", password);
        }
        Ok(Some(params))
    }
}
