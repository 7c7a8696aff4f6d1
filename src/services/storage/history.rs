//! Query history: a capped, most-recent-first log persisted as JSON.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{FILE_VERSION, read_json, write_json};
use crate::services::database::traits::QueryResult;

/// Oldest entries beyond this are dropped.
pub const MAX_HISTORY_ENTRIES: usize = 500;

const PREVIEW_LEN: usize = 80;

/// One executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub connection_id: String,
    pub connection_name: String,
    /// ISO-8601 local time
    pub executed_at: String,
    pub execution_time_ms: f64,
    pub row_count: usize,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl HistoryEntry {
    /// A successful entry stamped with the current local time. The query is trimmed.
    pub fn new(
        query: &str,
        connection_id: impl Into<String>,
        connection_name: impl Into<String>,
    ) -> Self {
        Self {
            query: query.trim().to_string(),
            connection_id: connection_id.into(),
            connection_name: connection_name.into(),
            executed_at: chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            execution_time_ms: 0.0,
            row_count: 0,
            success: true,
            error: None,
        }
    }

    /// Take timing, row count and error from `result`.
    pub fn with_result(mut self, result: &QueryResult) -> Self {
        self.execution_time_ms = result.execution_time_ms;
        self.row_count = result.row_count;
        self.success = result.is_success();
        self.error = result.error_message().map(str::to_string);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Single-line form of the query, at most 80 characters.
    pub fn preview(&self) -> String {
        let normalized = self.query.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.chars().count() > PREVIEW_LEN {
            let head: String = normalized.chars().take(PREVIEW_LEN - 3).collect();
            format!("{}...", head)
        } else {
            normalized
        }
    }

    pub fn timestamp(&self) -> Option<chrono::NaiveDateTime> {
        chrono::NaiveDateTime::parse_from_str(&self.executed_at, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }
}

#[derive(Serialize)]
struct HistoryFile<'a> {
    version: u32,
    entries: &'a [HistoryEntry],
}

/// Query history store.
#[derive(Debug)]
pub struct QueryHistory {
    path: PathBuf,
    entries: RwLock<Vec<HistoryEntry>>,
}

impl QueryHistory {
    /// Load history from `path`. A corrupt file loads as empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::read_entries(&path).await;
        tracing::debug!(path = %path.display(), count = entries.len(), "Loaded query history");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    async fn read_entries(path: &Path) -> Vec<HistoryEntry> {
        let Some(mut document) = read_json(path).await else {
            return Vec::new();
        };
        let entries = document
            .get_mut("entries")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);

        match serde_json::from_value::<Vec<HistoryEntry>>(entries) {
            Ok(mut entries) => {
                entries.truncate(MAX_HISTORY_ENTRIES);
                entries
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt history, starting empty");
                Vec::new()
            }
        }
    }

    async fn persist(&self, entries: &[HistoryEntry]) -> Result<()> {
        write_json(
            &self.path,
            &HistoryFile {
                version: FILE_VERSION,
                entries,
            },
        )
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an entry at the front, dropping the oldest past capacity.
    pub async fn add(&self, entry: HistoryEntry) -> Result<HistoryEntry> {
        let mut entries = self.entries.write().await;
        entries.insert(0, entry.clone());
        entries.truncate(MAX_HISTORY_ENTRIES);
        self.persist(&entries).await?;
        Ok(entry)
    }

    /// Entries newest first, optionally filtered by connection and success.
    pub async fn get_entries(
        &self,
        connection_id: Option<&str>,
        limit: Option<usize>,
        success_only: bool,
    ) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| connection_id.is_none_or(|id| e.connection_id == id))
            .filter(|e| !success_only || e.success)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over query text.
    pub async fn search(&self, text: &str, limit: Option<usize>) -> Vec<HistoryEntry> {
        let needle = text.to_lowercase();
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.query.to_lowercase().contains(&needle))
            .take(limit.unwrap_or(50))
            .cloned()
            .collect()
    }

    /// Drop all entries, or only those of one connection.
    pub async fn clear(&self, connection_id: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write().await;
        match connection_id {
            Some(id) => entries.retain(|e| e.connection_id != id),
            None => entries.clear(),
        }
        self.persist(&entries).await
    }

    /// Distinct successful queries, most recent first.
    pub async fn recent_queries(&self, connection_id: Option<&str>, limit: Option<usize>) -> Vec<String> {
        let limit = limit.unwrap_or(10);
        let entries = self.entries.read().await;
        let mut seen = HashSet::new();
        let mut queries = Vec::new();

        for entry in entries
            .iter()
            .filter(|e| e.success && connection_id.is_none_or(|id| e.connection_id == id))
        {
            if queries.len() >= limit {
                break;
            }
            if seen.insert(entry.query.as_str()) {
                queries.push(entry.query.clone());
            }
        }
        queries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query: &str, connection_id: &str, success: bool) -> HistoryEntry {
        let entry = HistoryEntry::new(query, connection_id, "conn");
        if success {
            entry
        } else {
            entry.with_error("boom")
        }
    }

    #[test]
    fn test_preview() {
        let short = HistoryEntry::new("  SELECT *\n  FROM   users  ", "c", "conn");
        assert_eq!(short.query, "SELECT *\n  FROM   users");
        assert_eq!(short.preview(), "SELECT * FROM users");

        let long = HistoryEntry::new(&format!("SELECT {}", "x".repeat(100)), "c", "conn");
        let preview = long.preview();
        assert_eq!(preview.chars().count(), 80);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_with_result() {
        let mut result = QueryResult::failed(
            crate::services::database::traits::QueryErrorKind::Backend,
            "no such table: t",
        );
        result.execution_time_ms = 3.5;
        let entry = HistoryEntry::new("SELECT * FROM t", "c", "conn").with_result(&result);
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("no such table: t"));
        assert_eq!(entry.execution_time_ms, 3.5);
        assert!(entry.timestamp().is_some());
    }

    #[test]
    fn test_capacity_newest_first() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = QueryHistory::load(temp.path().join("history.json")).await;

            for i in 0..(MAX_HISTORY_ENTRIES + 5) {
                history.add(entry(&format!("SELECT {}", i), "c", true)).await.unwrap();
            }

            assert_eq!(history.len().await, MAX_HISTORY_ENTRIES);
            let entries = history.get_entries(None, Some(2), false).await;
            assert_eq!(entries[0].query, format!("SELECT {}", MAX_HISTORY_ENTRIES + 4));
            assert_eq!(entries[1].query, format!("SELECT {}", MAX_HISTORY_ENTRIES + 3));
        });
    }

    #[test]
    fn test_filters_and_search() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = QueryHistory::load(temp.path().join("history.json")).await;
            history.add(entry("select * from users", "a", true)).await.unwrap();
            history.add(entry("SELECT broken", "a", false)).await.unwrap();
            history.add(entry("GET key", "b", true)).await.unwrap();

            assert_eq!(history.get_entries(Some("a"), None, false).await.len(), 2);
            assert_eq!(history.get_entries(Some("a"), None, true).await.len(), 1);
            assert_eq!(history.search("SELECT", None).await.len(), 2);
            assert_eq!(history.search("select", Some(1)).await.len(), 1);
            assert!(history.search("missing", None).await.is_empty());
        });
    }

    #[test]
    fn test_recent_queries_distinct() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = QueryHistory::load(temp.path().join("history.json")).await;
            history.add(entry("SELECT 1", "a", true)).await.unwrap();
            history.add(entry("SELECT 2", "a", true)).await.unwrap();
            history.add(entry("SELECT 1", "a", true)).await.unwrap();
            history.add(entry("SELECT bad", "a", false)).await.unwrap();
            history.add(entry("SELECT 3", "b", true)).await.unwrap();

            assert_eq!(
                history.recent_queries(Some("a"), None).await,
                vec!["SELECT 1".to_string(), "SELECT 2".to_string()]
            );
            assert_eq!(history.recent_queries(None, Some(1)).await, vec!["SELECT 3"]);
        });
    }

    #[test]
    fn test_clear_and_reload() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("history.json");
            let history = QueryHistory::load(&path).await;
            history.add(entry("SELECT 1", "a", true)).await.unwrap();
            history.add(entry("SELECT 2", "b", true)).await.unwrap();

            history.clear(Some("a")).await.unwrap();
            let reloaded = QueryHistory::load(&path).await;
            assert_eq!(reloaded.len().await, 1);
            assert_eq!(reloaded.get_entries(None, None, false).await[0].connection_id, "b");

            reloaded.clear(None).await.unwrap();
            assert!(QueryHistory::load(&path).await.is_empty().await);
        });
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("history.json");
            std::fs::write(&path, r#"{"version": 1, "entries": [{"query": 5}]}"#).unwrap();
            assert!(QueryHistory::load(&path).await.is_empty().await);
        });
    }
}
