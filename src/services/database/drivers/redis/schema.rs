//! Redis "schema" inference.
//!
//! Redis has no catalog. Tables are key-prefix groups sampled with SCAN, and
//! the columns of a key follow from its type.

use std::collections::BTreeSet;

use redis::{Commands, ConnectionLike, RedisResult};

use crate::services::database::traits::{ColumnDef, ColumnInfo, QueryResult, Row, TableInfo, Value};

/// Keys sampled when inferring prefixes
const SAMPLE_KEYS: usize = 1000;
const SCAN_BATCH: usize = 100;
const MAX_GROUPS: usize = 50;
/// Per-group key count stops here; the count is an estimate
const MAX_GROUP_COUNT: usize = 100;
const MAX_HASH_FIELDS: usize = 50;

/// Prefix a key is grouped under: the part before the first ':'.
pub(crate) fn key_prefix(key: &str) -> &str {
    key.split_once(':').map_or(key, |(prefix, _)| prefix)
}

/// Sample the keyspace and group keys by prefix.
pub(crate) fn key_groups<C: ConnectionLike>(conn: &mut C, db: i64) -> RedisResult<Vec<TableInfo>> {
    let mut prefixes = BTreeSet::new();
    let mut seen = 0;
    let mut cursor: u64 = 0;

    while seen < SAMPLE_KEYS {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query(conn)?;
        seen += keys.len();
        prefixes.extend(keys.iter().map(|key| key_prefix(key).to_string()));
        if next == 0 {
            break;
        }
        cursor = next;
    }

    let mut tables = Vec::new();
    for prefix in prefixes.into_iter().take(MAX_GROUPS) {
        let pattern = format!("{}*", prefix);
        let count = conn
            .scan_match::<_, String>(&pattern)?
            .take(MAX_GROUP_COUNT)
            .count();
        tables.push(
            TableInfo::new(prefix)
                .with_schema(db.to_string())
                .with_type("keys")
                .with_row_count(Some(count as i64))
                .with_comment(Some(format!("Key pattern: {}", pattern))),
        );
    }
    Ok(tables)
}

fn key_type<C: ConnectionLike>(conn: &mut C, key: &str) -> RedisResult<String> {
    redis::cmd("TYPE").arg(key).query(conn)
}

/// Columns implied by the type stored at `key`.
pub(crate) fn key_columns<C: ConnectionLike>(conn: &mut C, key: &str) -> RedisResult<Vec<ColumnDef>> {
    let column = |name: &str, data_type: &str, ordinal: i32, nullable: bool| {
        ColumnDef::new(name, data_type, ordinal).with_nullable(nullable)
    };

    let columns = match key_type(conn, key)?.as_str() {
        "string" => vec![column("value", "string", 1, false)],
        "hash" => {
            let fields: Vec<String> = conn.hkeys(key)?;
            fields
                .iter()
                .take(MAX_HASH_FIELDS)
                .zip(1..)
                .map(|(field, ordinal)| column(field, "string", ordinal, true))
                .collect()
        }
        "list" => vec![
            column("index", "integer", 1, false),
            column("value", "string", 2, false),
        ],
        "set" => vec![column("member", "string", 1, false)],
        "zset" => vec![
            column("member", "string", 1, false),
            column("score", "float", 2, false),
        ],
        _ => vec![column("value", "unknown", 1, true)],
    };
    Ok(columns)
}

fn text_rows(values: impl IntoIterator<Item = String>) -> Vec<Row> {
    values
        .into_iter()
        .map(|v| Row::new(vec![Value::Text(v)]))
        .collect()
}

/// First `limit` entries of a key, or the keys matching it as a prefix.
pub(crate) fn key_preview<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    limit: usize,
) -> RedisResult<QueryResult> {
    // LRANGE/ZRANGE stops are inclusive; -1 would mean "to the end"
    let stop = limit.max(1) as isize - 1;

    let result = match key_type(conn, key)?.as_str() {
        "string" => {
            let value: Option<String> = conn.get(key)?;
            QueryResult::new(
                vec![ColumnInfo::new("value", "string")],
                vec![Row::new(vec![Value::from(value)])],
            )
        }
        "hash" => {
            let pairs: Vec<(String, String)> = conn.hgetall(key)?;
            QueryResult::new(
                vec![ColumnInfo::new("field", "string"), ColumnInfo::new("value", "string")],
                pairs
                    .into_iter()
                    .take(limit)
                    .map(|(f, v)| Row::new(vec![Value::Text(f), Value::Text(v)]))
                    .collect(),
            )
        }
        "list" => {
            let values: Vec<String> = conn.lrange(key, 0, stop)?;
            QueryResult::new(
                vec![ColumnInfo::new("index", "integer"), ColumnInfo::new("value", "string")],
                values
                    .into_iter()
                    .zip(0i64..)
                    .map(|(v, i)| Row::new(vec![Value::Int(i), Value::Text(v)]))
                    .collect(),
            )
        }
        "set" => {
            let members: Vec<String> = conn.smembers(key)?;
            QueryResult::new(
                vec![ColumnInfo::new("member", "string")],
                text_rows(members.into_iter().take(limit)),
            )
        }
        "zset" => {
            let members: Vec<(String, f64)> = conn.zrange_withscores(key, 0, stop)?;
            QueryResult::new(
                vec![ColumnInfo::new("member", "string"), ColumnInfo::new("score", "float")],
                members
                    .into_iter()
                    .map(|(m, s)| Row::new(vec![Value::Text(m), Value::Float(s)]))
                    .collect(),
            )
        }
        _ => {
            // Not a key: treat the name as a prefix
            let pattern = format!("{}*", key);
            let keys: Vec<String> = conn.scan_match::<_, String>(&pattern)?.take(limit).collect();
            QueryResult::new(vec![ColumnInfo::new("key", "string")], text_rows(keys))
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        assert_eq!(key_prefix("user:1:profile"), "user");
        assert_eq!(key_prefix("session"), "session");
        assert_eq!(key_prefix(":odd"), "");
    }
}
