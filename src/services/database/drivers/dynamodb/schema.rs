//! DynamoDB table descriptions as catalog entries.
//!
//! Tables have no declared columns beyond their key attributes, so the column
//! list is the primary key plus the keys of secondary indexes.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::{KeySchemaElement, KeyType, TableDescription};

use super::types::DynamoValueConverter;
use crate::services::database::traits::{ColumnDef, TableInfo};

/// Catalog entry for a described table.
pub(crate) fn table_info(name: &str, region: &str, table: &TableDescription) -> TableInfo {
    TableInfo::new(name)
        .with_schema(region)
        .with_type("table")
        .with_row_count(table.item_count())
        .with_size(table.table_size_bytes())
        .with_comment(table.table_status().map(|s| s.as_str().to_string()))
}

/// Key attributes of a table and its indexes.
pub(crate) fn key_columns(table: &TableDescription) -> Vec<ColumnDef> {
    let attribute_types: HashMap<&str, &str> = table
        .attribute_definitions()
        .iter()
        .map(|def| (def.attribute_name(), def.attribute_type().as_str()))
        .collect();
    let data_type = |name: &str| {
        DynamoValueConverter::type_name(attribute_types.get(name).copied().unwrap_or("S")).to_string()
    };

    let mut columns: Vec<ColumnDef> = Vec::new();
    for key in table.key_schema() {
        let name = key.attribute_name();
        let mut column = ColumnDef::new(name, data_type(name), columns.len() as i32 + 1)
            .with_nullable(false)
            .with_comment(Some(format!("{} key", key.key_type().as_str())));
        if *key.key_type() == KeyType::Hash {
            column = column.as_primary_key();
        }
        columns.push(column);
    }

    let global = table
        .global_secondary_indexes()
        .iter()
        .map(|gsi| (format!("GSI: {}", gsi.index_name().unwrap_or_default()), gsi.key_schema()));
    let local = table
        .local_secondary_indexes()
        .iter()
        .map(|lsi| (format!("LSI: {}", lsi.index_name().unwrap_or_default()), lsi.key_schema()));

    for (comment, keys) in global.chain(local) {
        for key in keys {
            push_index_key(&mut columns, key, &comment, &data_type);
        }
    }
    columns
}

fn push_index_key(
    columns: &mut Vec<ColumnDef>,
    key: &KeySchemaElement,
    comment: &str,
    data_type: &dyn Fn(&str) -> String,
) {
    let name = key.attribute_name();
    if columns.iter().any(|c| c.name == name) {
        return;
    }
    let ordinal = columns.len() as i32 + 1;
    columns.push(
        ColumnDef::new(name, data_type(name), ordinal)
            .with_nullable(true)
            .with_comment(Some(comment.to_string())),
    );
}
