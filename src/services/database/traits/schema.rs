//! Schema introspection value objects.
//!
//! Drivers map their native catalogs (information_schema, PRAGMA, DescribeTable,
//! Redis key scans) into these shapes. They are purely descriptive.

use serde::{Deserialize, Serialize};

/// Information about a table (or a table-like grouping such as a Redis key prefix)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    /// Schema/namespace name, `None` for backends without schemas
    #[serde(default)]
    pub schema: Option<String>,
    /// "table", "view", "keys", ...
    pub table_type: String,
    /// Exact or estimated row count
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table_type: "table".to_string(),
            row_count: None,
            size_bytes: None,
            comment: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_type(mut self, table_type: impl Into<String>) -> Self {
        self.table_type = table_type.into();
        self
    }

    pub fn with_row_count(mut self, row_count: Option<i64>) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_size(mut self, size_bytes: Option<i64>) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    /// Get the fully qualified table name (schema.table)
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    pub fn is_view(&self) -> bool {
        self.table_type.eq_ignore_ascii_case("view")
    }
}

/// Detailed column definition for a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    /// Referenced `table.column` for foreign keys
    #[serde(default)]
    pub references: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// 1-based position within the table
    pub ordinal_position: i32,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: i32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            is_primary_key: false,
            is_foreign_key: false,
            is_unique: false,
            references: None,
            comment: None,
            ordinal_position,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    pub fn as_primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn as_unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Mark this column as a foreign key pointing at `references`
    pub fn with_reference(mut self, references: impl Into<String>) -> Self {
        self.is_foreign_key = true;
        self.references = Some(references.into());
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

/// Index information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// Access method (btree, hash, gin, ...)
    pub index_type: String,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
            is_primary: false,
            index_type: "btree".to_string(),
        }
    }

    pub fn as_unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Mark this index as the primary key (implies unique)
    pub fn as_primary(mut self) -> Self {
        self.is_primary = true;
        self.is_unique = true;
        self
    }

    pub fn with_type(mut self, index_type: impl Into<String>) -> Self {
        self.index_type = index_type.into();
        self
    }
}

/// Foreign key relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
}

impl ForeignKeyInfo {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        referenced_table: impl Into<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            referenced_table: referenced_table.into(),
            referenced_columns,
            on_delete: "NO ACTION".to_string(),
            on_update: "NO ACTION".to_string(),
        }
    }

    pub fn with_actions(mut self, on_delete: impl Into<String>, on_update: impl Into<String>) -> Self {
        self.on_delete = on_delete.into();
        self.on_update = on_update.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_info_full_name() {
        let table = TableInfo::new("users").with_schema("public");
        assert_eq!(table.full_name(), "public.users");
        assert_eq!(table.table_type, "table");

        let bare = TableInfo::new("users");
        assert_eq!(bare.full_name(), "users");
    }

    #[test]
    fn test_column_def_reference_marks_foreign_key() {
        let col = ColumnDef::new("user_id", "INTEGER", 2).with_reference("users.id");
        assert!(col.is_foreign_key);
        assert_eq!(col.references.as_deref(), Some("users.id"));
        assert!(col.nullable);
    }

    #[test]
    fn test_index_info_builder() {
        let idx = IndexInfo::new("users_pkey", vec!["id".to_string()]).as_primary();
        assert!(idx.is_primary);
        assert!(idx.is_unique);
        assert_eq!(idx.index_type, "btree");
    }

    #[test]
    fn test_foreign_key_default_actions() {
        let fk = ForeignKeyInfo::new(
            "fk_orders_user",
            vec!["user_id".to_string()],
            "users",
            vec!["id".to_string()],
        );
        assert_eq!(fk.on_delete, "NO ACTION");
        assert_eq!(fk.on_update, "NO ACTION");
    }
}
