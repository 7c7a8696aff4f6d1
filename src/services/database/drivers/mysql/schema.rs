//! MySQL schema introspection.
//!
//! Databases play the role of schemas. Metadata comes from
//! information_schema; string columns are cast to CHAR because MySQL 8 reports
//! several of them with a binary collation.

use std::collections::HashMap;

use sqlx::Row;

use super::connection::{MySqlDriver, SYSTEM_DATABASES};
use super::types::MySqlValueConverter;
use crate::error::DriverResult;
use crate::services::database::drivers::common::backend_error;
use crate::services::database::traits::{
    ColumnDef, DatabaseDriver, ForeignKeyInfo, IndexInfo, TableInfo,
};

const TABLES_QUERY: &str = r#"
    SELECT
        CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(TABLE_TYPE AS CHAR) AS table_type,
        CAST(TABLE_ROWS AS SIGNED) AS table_rows,
        CAST(DATA_LENGTH + INDEX_LENGTH AS SIGNED) AS size_bytes,
        CAST(TABLE_COMMENT AS CHAR) AS table_comment
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ?
    ORDER BY TABLE_NAME
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(COLUMN_TYPE AS CHAR) AS column_type,
        CAST(IS_NULLABLE = 'YES' AS SIGNED) AS nullable,
        CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
        CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position,
        CAST(COLUMN_KEY = 'PRI' AS SIGNED) AS is_primary,
        CAST(COLUMN_KEY = 'UNI' AS SIGNED) AS is_unique,
        CAST(COLUMN_COMMENT AS CHAR) AS column_comment
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const COLUMN_REFERENCES_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(CONCAT(REFERENCED_TABLE_SCHEMA, '.', REFERENCED_TABLE_NAME, '.', REFERENCED_COLUMN_NAME) AS CHAR) AS target
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        AND REFERENCED_TABLE_NAME IS NOT NULL
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        CAST(INDEX_NAME AS CHAR) AS index_name,
        CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS CHAR) AS index_columns,
        CAST(NOT NON_UNIQUE AS SIGNED) AS is_unique,
        CAST(INDEX_NAME = 'PRIMARY' AS SIGNED) AS is_primary,
        CAST(INDEX_TYPE AS CHAR) AS index_type
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    GROUP BY INDEX_NAME, NON_UNIQUE, INDEX_TYPE
    ORDER BY INDEX_NAME
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        CAST(CONSTRAINT_NAME AS CHAR) AS constraint_name,
        CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY ORDINAL_POSITION) AS CHAR) AS fk_columns,
        CAST(CONCAT(REFERENCED_TABLE_SCHEMA, '.', REFERENCED_TABLE_NAME) AS CHAR) AS ref_table,
        CAST(GROUP_CONCAT(REFERENCED_COLUMN_NAME ORDER BY ORDINAL_POSITION) AS CHAR) AS ref_columns
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        AND REFERENCED_TABLE_NAME IS NOT NULL
    GROUP BY CONSTRAINT_NAME, REFERENCED_TABLE_SCHEMA, REFERENCED_TABLE_NAME
"#;

const FK_RULES_QUERY: &str = r#"
    SELECT
        CAST(CONSTRAINT_NAME AS CHAR) AS constraint_name,
        CAST(UPDATE_RULE AS CHAR) AS update_rule,
        CAST(DELETE_RULE AS CHAR) AS delete_rule
    FROM information_schema.REFERENTIAL_CONSTRAINTS
    WHERE CONSTRAINT_SCHEMA = ?
        AND TABLE_NAME = ?
"#;

/// Split a GROUP_CONCAT list
fn split_list(list: Option<String>) -> Vec<String> {
    list.filter(|s| !s.is_empty())
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

impl MySqlDriver {
    /// Databases other than the system ones.
    ///
    /// Falls back to the current database when `SHOW DATABASES` is refused.
    pub(crate) async fn list_databases(&self) -> DriverResult<Vec<String>> {
        let pool = self.get_pool().await?;

        match sqlx::query("SHOW DATABASES").fetch_all(&pool).await {
            Ok(rows) => Ok(rows
                .iter()
                .filter_map(|row| {
                    MySqlValueConverter::convert_row(row)
                        .get(0)
                        .map(|v| v.to_plain_string())
                })
                .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
                .collect()),
            Err(e) => {
                tracing::warn!(error = %e, "SHOW DATABASES failed");
                Ok(self.current_schema().into_iter().collect())
            }
        }
    }

    pub(crate) async fn list_tables(&self, schema: &str) -> DriverResult<Vec<TableInfo>> {
        let pool = self.get_pool().await?;

        let rows = sqlx::query(TABLES_QUERY)
            .bind(schema)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("table_name")?;
                let table_type: String = row.try_get("table_type")?;
                let table_rows: Option<i64> = row.try_get("table_rows")?;
                let size_bytes: Option<i64> = row.try_get("size_bytes")?;
                let comment: Option<String> = row.try_get("table_comment")?;

                Ok(TableInfo::new(name)
                    .with_schema(schema)
                    .with_type(if table_type == "VIEW" { "view" } else { "table" })
                    .with_row_count(table_rows.filter(|n| *n > 0))
                    .with_size(size_bytes.filter(|n| *n > 0))
                    .with_comment(comment.filter(|c| !c.is_empty())))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }

    pub(crate) async fn list_columns(&self, schema: &str, table: &str) -> DriverResult<Vec<ColumnDef>> {
        let pool = self.get_pool().await?;

        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        let references: HashMap<String, String> =
            sqlx::query_as::<_, (String, String)>(COLUMN_REFERENCES_QUERY)
                .bind(schema)
                .bind(table)
                .fetch_all(&pool)
                .await
                .map_err(backend_error)?
                .into_iter()
                .collect();

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("column_type")?;
                let nullable: i64 = row.try_get("nullable")?;
                let default: Option<String> = row.try_get("column_default")?;
                let ordinal: i64 = row.try_get("ordinal_position")?;
                let is_primary: i64 = row.try_get("is_primary")?;
                let is_unique: i64 = row.try_get("is_unique")?;
                let comment: Option<String> = row.try_get("column_comment")?;

                let mut column = ColumnDef::new(name, data_type, ordinal as i32)
                    .with_nullable(nullable != 0)
                    .with_default(default)
                    .with_comment(comment.filter(|c| !c.is_empty()));
                if is_primary != 0 {
                    column = column.as_primary_key();
                }
                if is_unique != 0 {
                    column = column.as_unique();
                }
                if let Some(target) = references.get(&column.name) {
                    column = column.with_reference(target.clone());
                }
                Ok(column)
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }

    pub(crate) async fn list_indexes(&self, schema: &str, table: &str) -> DriverResult<Vec<IndexInfo>> {
        let pool = self.get_pool().await?;

        let rows = sqlx::query(INDEXES_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("index_name")?;
                let columns: Option<String> = row.try_get("index_columns")?;
                let is_unique: i64 = row.try_get("is_unique")?;
                let is_primary: i64 = row.try_get("is_primary")?;
                let index_type: String = row.try_get("index_type")?;

                let mut index = IndexInfo::new(name, split_list(columns)).with_type(index_type);
                if is_primary != 0 {
                    index = index.as_primary();
                } else if is_unique != 0 {
                    index = index.as_unique();
                }
                Ok(index)
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }

    pub(crate) async fn list_foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> DriverResult<Vec<ForeignKeyInfo>> {
        let pool = self.get_pool().await?;

        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        // Rules are optional decoration; keys without them default to NO ACTION
        let rules: HashMap<String, (String, String)> =
            match sqlx::query_as::<_, (String, String, String)>(FK_RULES_QUERY)
                .bind(schema)
                .bind(table)
                .fetch_all(&pool)
                .await
            {
                Ok(rules) => rules
                    .into_iter()
                    .map(|(name, on_update, on_delete)| (name, (on_update, on_delete)))
                    .collect(),
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read referential rules");
                    HashMap::new()
                }
            };

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("constraint_name")?;
                let columns: Option<String> = row.try_get("fk_columns")?;
                let referenced_table: String = row.try_get("ref_table")?;
                let referenced_columns: Option<String> = row.try_get("ref_columns")?;

                let mut fk = ForeignKeyInfo::new(
                    name,
                    split_list(columns),
                    referenced_table,
                    split_list(referenced_columns),
                );
                if let Some((on_update, on_delete)) = rules.get(&fk.name) {
                    fk = fk.with_actions(on_delete.clone(), on_update.clone());
                }
                Ok(fk)
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("a,b".into())), vec!["a", "b"]);
        assert!(split_list(Some(String::new())).is_empty());
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_system_databases_hidden() {
        for name in ["information_schema", "mysql", "performance_schema", "sys"] {
            assert!(SYSTEM_DATABASES.contains(&name));
        }
        assert!(!SYSTEM_DATABASES.contains(&"shop"));
    }

    #[test]
    fn test_catalog_queries_use_placeholders() {
        for query in [TABLES_QUERY, COLUMNS_QUERY, INDEXES_QUERY, FOREIGN_KEYS_QUERY, FK_RULES_QUERY] {
            assert!(query.contains('?'));
            assert!(!query.contains("%s"));
        }
    }
}
