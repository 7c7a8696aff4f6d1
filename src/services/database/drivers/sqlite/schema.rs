//! SQLite schema introspection.
//!
//! Catalog data comes from `sqlite_master` and the `table_info`,
//! `foreign_key_list`, `index_list` and `index_info` PRAGMAs.

use std::collections::HashMap;

use sqlx::Row;

use super::connection::SqliteDriver;
use crate::error::DriverResult;
use crate::services::database::drivers::common::backend_error;
use crate::services::database::traits::{ColumnDef, ForeignKeyInfo, IndexInfo, TableInfo};

/// Quote a name as a single-quoted PRAGMA argument
fn pragma_arg(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

impl SqliteDriver {
    pub(crate) async fn list_tables(&self) -> DriverResult<Vec<TableInfo>> {
        let pool = self.get_pool().await?;

        let query = r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view')
                AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;
        let rows = sqlx::query(query)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name").map_err(backend_error)?;
            let table_type: String = row.try_get("type").map_err(backend_error)?;

            let row_count = if table_type == "table" {
                let count_sql = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
                sqlx::query_scalar::<_, i64>(&count_sql)
                    .fetch_one(&pool)
                    .await
                    .ok()
            } else {
                None
            };

            tables.push(
                TableInfo::new(name)
                    .with_schema("main")
                    .with_type(table_type)
                    .with_row_count(row_count),
            );
        }

        Ok(tables)
    }

    pub(crate) async fn list_columns(&self, table: &str) -> DriverResult<Vec<ColumnDef>> {
        let pool = self.get_pool().await?;

        let references: HashMap<String, String> = self
            .list_foreign_keys(table)
            .await?
            .into_iter()
            .flat_map(|fk| {
                fk.columns
                    .into_iter()
                    .zip(fk.referenced_columns)
                    .map(move |(from, to)| (from, format!("{}.{}", fk.referenced_table, to)))
                    .collect::<Vec<_>>()
            })
            .collect();

        let query = format!("PRAGMA table_info({})", pragma_arg(table));
        let rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let cid: i64 = row.try_get("cid").map_err(backend_error)?;
            let name: String = row.try_get("name").map_err(backend_error)?;
            let data_type: String = row.try_get("type").map_err(backend_error)?;
            let notnull: i64 = row.try_get("notnull").map_err(backend_error)?;
            let default: Option<String> = row.try_get("dflt_value").unwrap_or(None);
            let pk: i64 = row.try_get("pk").map_err(backend_error)?;

            let data_type = if data_type.is_empty() {
                "TEXT".to_string()
            } else {
                data_type
            };

            // cid is 0-indexed
            let mut column = ColumnDef::new(name, data_type, cid as i32 + 1)
                .with_nullable(notnull == 0)
                .with_default(default);
            if pk > 0 {
                column = column.as_primary_key();
            }
            if let Some(target) = references.get(&column.name) {
                column = column.with_reference(target.clone());
            }
            columns.push(column);
        }

        Ok(columns)
    }

    pub(crate) async fn list_indexes(&self, table: &str) -> DriverResult<Vec<IndexInfo>> {
        let pool = self.get_pool().await?;

        let query = format!("PRAGMA index_list({})", pragma_arg(table));
        let index_rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        let mut indexes = Vec::with_capacity(index_rows.len());
        for index_row in index_rows {
            let name: String = index_row.try_get("name").map_err(backend_error)?;
            let unique: i64 = index_row.try_get("unique").map_err(backend_error)?;
            let origin: String = index_row.try_get("origin").map_err(backend_error)?;

            let col_query = format!("PRAGMA index_info({})", pragma_arg(&name));
            let col_rows = sqlx::query(&col_query)
                .fetch_all(&pool)
                .await
                .map_err(backend_error)?;
            // Expression index members have a NULL name
            let columns: Vec<String> = col_rows
                .iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();

            let mut index = IndexInfo::new(name, columns);
            if origin == "pk" {
                index = index.as_primary();
            } else if unique != 0 {
                index = index.as_unique();
            }
            indexes.push(index);
        }

        Ok(indexes)
    }

    pub(crate) async fn list_foreign_keys(&self, table: &str) -> DriverResult<Vec<ForeignKeyInfo>> {
        let pool = self.get_pool().await?;

        let query = format!("PRAGMA foreign_key_list({})", pragma_arg(table));
        let rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(backend_error)?;

        // Composite keys span several rows sharing one id, ordered by seq
        let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id").map_err(backend_error)?;
            let referenced_table: String = row.try_get("table").map_err(backend_error)?;
            let from: String = row.try_get("from").map_err(backend_error)?;
            // `to` is NULL when the reference targets the parent's primary key
            let to: Option<String> = row.try_get("to").unwrap_or(None);
            let on_update: String = row.try_get("on_update").map_err(backend_error)?;
            let on_delete: String = row.try_get("on_delete").map_err(backend_error)?;
            let to = to.unwrap_or_else(|| from.clone());

            match keys.iter_mut().find(|(key_id, _)| *key_id == id) {
                Some((_, fk)) => {
                    fk.columns.push(from);
                    fk.referenced_columns.push(to);
                }
                None => keys.push((
                    id,
                    ForeignKeyInfo::new(
                        format!("fk_{}_{}", table, id),
                        vec![from],
                        referenced_table,
                        vec![to],
                    )
                    .with_actions(on_delete, on_update),
                )),
            }
        }

        Ok(keys.into_iter().map(|(_, fk)| fk).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::services::database::drivers::sqlite::SqliteDriver;
    use crate::services::database::traits::{DatabaseDriver, DriverParams};

    fn connected_with(statements: &[&str]) -> (tempfile::TempDir, SqliteDriver) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db");
        std::fs::File::create(&path).unwrap();

        let driver = SqliteDriver::new();
        smol::block_on(async {
            driver
                .connect(&DriverParams::new().with("database", path.display().to_string()))
                .await
                .unwrap();
            for sql in statements {
                let result = driver.execute(sql, None, None, 0).await.unwrap();
                assert!(result.is_success(), "{:?}", result.error);
            }
        });
        (dir, driver)
    }

    const SCHEMA: &[&str] = &[
        "CREATE TABLE authors (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE)",
        "CREATE TABLE books (id INTEGER PRIMARY KEY, author_id INTEGER REFERENCES authors(id) ON DELETE CASCADE, title TEXT DEFAULT 'untitled')",
        "CREATE INDEX idx_books_title ON books (title)",
        "CREATE VIEW recent AS SELECT * FROM books",
        "INSERT INTO authors (email) VALUES ('a@example.com'), ('b@example.com')",
    ];

    #[test]
    fn test_tables_and_views() {
        let (_dir, driver) = connected_with(SCHEMA);
        let tables = smol::block_on(driver.get_tables(None)).unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["authors", "books", "recent"]);
        assert_eq!(tables[0].row_count, Some(2));
        assert_eq!(tables[0].schema.as_deref(), Some("main"));
        assert!(tables[2].is_view());
        assert_eq!(tables[2].row_count, None);
    }

    #[test]
    fn test_columns_flags() {
        let (_dir, driver) = connected_with(SCHEMA);
        let columns = smol::block_on(driver.get_columns("books", None)).unwrap();

        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary_key);
        assert_eq!(columns[0].ordinal_position, 1);
        assert!(columns[1].is_foreign_key);
        assert_eq!(columns[1].references.as_deref(), Some("authors.id"));
        assert_eq!(columns[2].default.as_deref(), Some("'untitled'"));
        assert!(columns[2].nullable);
    }

    #[test]
    fn test_indexes_and_foreign_keys() {
        let (_dir, driver) = connected_with(SCHEMA);

        let indexes = smol::block_on(driver.get_indexes("books", None)).unwrap();
        let title = indexes.iter().find(|i| i.name == "idx_books_title").unwrap();
        assert_eq!(title.columns, vec!["title".to_string()]);
        assert!(!title.is_unique);

        let author_indexes = smol::block_on(driver.get_indexes("authors", None)).unwrap();
        assert!(author_indexes.iter().any(|i| i.is_unique && i.columns == ["email"]));

        let fks = smol::block_on(driver.get_foreign_keys("books", None)).unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referenced_table, "authors");
        assert_eq!(fks[0].on_delete, "CASCADE");
    }

    #[test]
    fn test_explain_query_plan() {
        let (_dir, driver) = connected_with(SCHEMA);
        let plan = smol::block_on(driver.explain_query("SELECT * FROM books WHERE title = 'x'"))
            .unwrap();
        assert!(plan.contains("idx_books_title"), "{}", plan);

        let error = smol::block_on(driver.explain_query("SELECT * FROM missing")).unwrap();
        assert!(error.starts_with("Error: "));
    }
}
