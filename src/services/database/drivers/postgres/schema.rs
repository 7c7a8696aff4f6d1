//! PostgreSQL schema introspection.
//!
//! Queries information_schema and pg_catalog through the side pool. Catalog
//! columns are cast to `text` so domain types like `sql_identifier` decode as
//! plain strings.

use std::collections::HashMap;

use sqlx::Row;

use super::connection::PostgresDriver;
use crate::error::DriverResult;
use crate::services::database::drivers::common::backend_error;
use crate::services::database::traits::{ColumnDef, ForeignKeyInfo, IndexInfo, TableInfo};

const SCHEMAS_QUERY: &str = r#"
    SELECT schema_name::text
    FROM information_schema.schemata
    WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
    ORDER BY schema_name
"#;

const TABLES_QUERY: &str = r#"
    SELECT
        t.table_name::text AS table_name,
        t.table_type::text AS table_type,
        COALESCE(
            (SELECT reltuples::bigint FROM pg_class
             WHERE relname = t.table_name
               AND relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = t.table_schema)),
            0
        ) AS row_estimate,
        pg_total_relation_size(
            quote_ident(t.table_schema) || '.' || quote_ident(t.table_name)
        ) AS size_bytes,
        obj_description(
            (quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass
        ) AS comment
    FROM information_schema.tables t
    WHERE t.table_schema = $1
    ORDER BY t.table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.is_nullable = 'YES' AS nullable,
        c.column_default::text AS column_default,
        c.ordinal_position::int AS ordinal_position,
        EXISTS(
            SELECT 1 FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_schema = c.table_schema
                AND tc.table_name = c.table_name
                AND ccu.column_name = c.column_name
        ) AS is_primary,
        EXISTS(
            SELECT 1 FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'UNIQUE'
                AND tc.table_schema = c.table_schema
                AND tc.table_name = c.table_name
                AND ccu.column_name = c.column_name
        ) AS is_unique,
        col_description(
            (quote_ident(c.table_schema) || '.' || quote_ident(c.table_name))::regclass,
            c.ordinal_position::int
        ) AS comment
    FROM information_schema.columns c
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const COLUMN_REFERENCES_QUERY: &str = r#"
    SELECT
        kcu.column_name::text AS column_name,
        (ccu.table_schema || '.' || ccu.table_name || '.' || ccu.column_name)::text AS target
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage ccu
        ON ccu.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'FOREIGN KEY'
        AND tc.table_schema = $1
        AND tc.table_name = $2
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.relname::text AS index_name,
        array_agg(a.attname::text ORDER BY k.n) AS columns,
        ix.indisunique AS is_unique,
        ix.indisprimary AS is_primary,
        am.amname::text AS index_type
    FROM pg_index ix
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_am am ON am.oid = i.relam
    CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = $1 AND t.relname = $2
    GROUP BY i.relname, ix.indisunique, ix.indisprimary, am.amname
    ORDER BY i.relname
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        tc.constraint_name::text AS constraint_name,
        array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position) AS columns,
        (ccu.table_schema || '.' || ccu.table_name)::text AS referenced_table,
        array_agg(ccu.column_name::text ORDER BY kcu.ordinal_position) AS referenced_columns,
        rc.update_rule::text AS update_rule,
        rc.delete_rule::text AS delete_rule
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage ccu
        ON ccu.constraint_name = tc.constraint_name
    JOIN information_schema.referential_constraints rc
        ON rc.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'FOREIGN KEY'
        AND tc.table_schema = $1
        AND tc.table_name = $2
    GROUP BY tc.constraint_name, ccu.table_schema, ccu.table_name,
             rc.update_rule, rc.delete_rule
"#;

/// Map information_schema's table_type to the generic label
fn table_kind(table_type: &str) -> &'static str {
    if table_type == "VIEW" { "view" } else { "table" }
}

impl PostgresDriver {
    /// User schemas; a failing catalog query falls back to `public`.
    pub(crate) async fn list_schemas(&self) -> DriverResult<Vec<String>> {
        let pool = self.get_pool().await?;

        match sqlx::query_scalar::<_, String>(SCHEMAS_QUERY)
            .fetch_all(&pool)
            .await
        {
            Ok(schemas) => Ok(schemas),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list schemas, assuming public");
                Ok(vec!["public".to_string()])
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
                let row_estimate: i64 = row.try_get("row_estimate")?;
                let size_bytes: Option<i64> = row.try_get("size_bytes")?;
                let comment: Option<String> = row.try_get("comment")?;

                // reltuples is -1 for never-analyzed tables
                Ok(TableInfo::new(name)
                    .with_schema(schema)
                    .with_type(table_kind(&table_type))
                    .with_row_count(Some(row_estimate).filter(|n| *n > 0))
                    .with_size(size_bytes)
                    .with_comment(comment))
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
                let data_type: String = row.try_get("data_type")?;
                let nullable: bool = row.try_get("nullable")?;
                let default: Option<String> = row.try_get("column_default")?;
                let ordinal: i32 = row.try_get("ordinal_position")?;
                let is_primary: bool = row.try_get("is_primary")?;
                let is_unique: bool = row.try_get("is_unique")?;
                let comment: Option<String> = row.try_get("comment")?;

                let mut column = ColumnDef::new(name, data_type, ordinal)
                    .with_nullable(nullable)
                    .with_default(default)
                    .with_comment(comment);
                if is_primary {
                    column = column.as_primary_key();
                }
                if is_unique {
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
                let columns: Option<Vec<String>> = row.try_get("columns")?;
                let is_unique: bool = row.try_get("is_unique")?;
                let is_primary: bool = row.try_get("is_primary")?;
                let index_type: String = row.try_get("index_type")?;

                let mut index = IndexInfo::new(name, columns.unwrap_or_default()).with_type(index_type);
                if is_primary {
                    index = index.as_primary();
                } else if is_unique {
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

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("constraint_name")?;
                let columns: Option<Vec<String>> = row.try_get("columns")?;
                let referenced_table: String = row.try_get("referenced_table")?;
                let referenced_columns: Option<Vec<String>> = row.try_get("referenced_columns")?;
                let on_update: String = row.try_get("update_rule")?;
                let on_delete: String = row.try_get("delete_rule")?;

                Ok(ForeignKeyInfo::new(
                    name,
                    columns.unwrap_or_default(),
                    referenced_table,
                    referenced_columns.unwrap_or_default(),
                )
                .with_actions(on_delete, on_update))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }
}
