//! Helpers shared by the sqlx-backed drivers.

use futures::{Stream, TryStreamExt};
use sqlx::{Column, TypeInfo};

use crate::error::DriverError;
use crate::services::database::traits::{ColumnInfo, QueryErrorKind, QueryResult};

/// Statement prefixes that produce a result set.
const ROW_RETURNING_PREFIXES: &[&str] = &[
    "select", "with", "pragma", "explain", "values", "show", "describe", "desc", "table",
];

/// Whether `sql` returns rows rather than an affected-row count.
///
/// Comments and quoted text are ignored, so `-- note\nSELECT 1` is a query
/// and a `RETURNING` clause on its own line is still seen.
pub(crate) fn is_row_returning(sql: &str) -> bool {
    let words = code_words(sql);
    let leading = words.first().map(String::as_str).unwrap_or("");
    ROW_RETURNING_PREFIXES.contains(&leading) || words.iter().any(|w| w == "returning")
}

/// Lowercased bare words of `sql`, skipping comments and quoted text.
fn code_words(sql: &str) -> Vec<String> {
    fn flush(current: &mut String, words: &mut Vec<String>) {
        if !current.is_empty() {
            words.push(std::mem::take(current));
        }
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                flush(&mut current, &mut words);
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                flush(&mut current, &mut words);
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            '#' if words.is_empty() && current.is_empty() => {
                flush(&mut current, &mut words);
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut current, &mut words);
                chars.next();
                let mut prev = ' ';
                for q in chars.by_ref() {
                    if prev == '*' && q == '/' {
                        break;
                    }
                    prev = q;
                }
            }
            c if c.is_alphanumeric() || c == '_' => current.extend(c.to_lowercase()),
            _ => flush(&mut current, &mut words),
        }
    }
    flush(&mut current, &mut words);
    words
}

/// Column metadata from sqlx column descriptors.
pub(crate) fn column_info<C: Column>(columns: &[C]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Drain a row stream, skipping `offset` rows and keeping at most `limit`.
///
/// Returns the kept rows and whether at least one more row was available.
pub(crate) async fn collect_page<R, S>(
    mut stream: S,
    limit: Option<usize>,
    offset: usize,
) -> Result<(Vec<R>, bool), sqlx::Error>
where
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    let mut rows = Vec::new();
    let mut skipped = 0;
    while let Some(row) = stream.try_next().await? {
        if skipped < offset {
            skipped += 1;
            continue;
        }
        if limit.is_some_and(|limit| rows.len() >= limit) {
            return Ok((rows, true));
        }
        rows.push(row);
    }
    Ok((rows, false))
}

/// Map a sqlx error raised while connecting to the connection taxonomy.
pub(crate) fn connect_error(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => {
            // SQLSTATE class 28: invalid authorization specification
            if db.code().is_some_and(|code| code.starts_with("28")) {
                DriverError::AuthRejected(db.message().to_string())
            } else {
                DriverError::Backend(db.message().to_string())
            }
        }
        sqlx::Error::Io(e) => DriverError::Unreachable(e.to_string()),
        sqlx::Error::Tls(e) => DriverError::Unreachable(format!("TLS error: {}", e)),
        sqlx::Error::PoolTimedOut => {
            DriverError::Unreachable("timed out waiting for a connection".to_string())
        }
        sqlx::Error::Configuration(e) => DriverError::InvalidConfig(e.to_string()),
        other => DriverError::Backend(other.to_string()),
    }
}

/// Map a sqlx error raised by a catalog query.
pub(crate) fn backend_error(err: sqlx::Error) -> DriverError {
    DriverError::Backend(err.to_string())
}

/// Fold a query failure into a result value.
pub(crate) fn query_failed(err: sqlx::Error) -> QueryResult {
    QueryResult::failed(QueryErrorKind::Backend, err.to_string())
}

/// Render an EXPLAIN-style result as aligned ` | ` rows under a dashed header.
pub(crate) fn format_plan_table(result: &QueryResult) -> String {
    if result.columns.is_empty() || result.rows.is_empty() {
        return "No execution plan available".to_string();
    }
    let header = result
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    let mut lines = vec![header.clone(), "-".repeat(header.chars().count())];
    for row in &result.rows {
        lines.push(
            row.iter()
                .map(|v| v.to_display_string())
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::traits::{Row, Value};

    #[test]
    fn test_is_row_returning() {
        assert!(is_row_returning("SELECT * FROM users"));
        assert!(is_row_returning("  select 1"));
        assert!(is_row_returning("WITH cte AS (SELECT 1) SELECT * FROM cte"));
        assert!(is_row_returning("PRAGMA table_info(users)"));
        assert!(is_row_returning("SHOW DATABASES"));
        assert!(is_row_returning("INSERT INTO t (a) VALUES (1) RETURNING id"));

        assert!(!is_row_returning("INSERT INTO users VALUES (1)"));
        assert!(!is_row_returning("UPDATE users SET name = 'test'"));
        assert!(!is_row_returning("DELETE FROM users"));
        assert!(!is_row_returning("CREATE TABLE selected (id INT)"));
    }

    #[test]
    fn test_is_row_returning_skips_comments() {
        assert!(is_row_returning("-- note\nSELECT 1"));
        assert!(is_row_returning("/* c */ SELECT 1"));
        assert!(is_row_returning("# mysql note\n  SHOW TABLES"));
        assert!(is_row_returning("(SELECT 1) UNION (SELECT 2)"));
        assert!(is_row_returning("INSERT INTO t (a) VALUES (1)\nRETURNING id"));
        assert!(is_row_returning("DELETE FROM t\tRETURNING *"));

        assert!(!is_row_returning("-- SELECT\nDELETE FROM t"));
        assert!(!is_row_returning("UPDATE t SET note = ' returning '"));
        assert!(!is_row_returning("INSERT INTO t VALUES (1) /* returning */"));
        assert!(!is_row_returning(""));
    }

    #[test]
    fn test_collect_page_limits_and_flags_more() {
        let rows: Vec<Result<i32, sqlx::Error>> = (0..10).map(Ok).collect();
        let (page, has_more) =
            smol::block_on(collect_page(futures::stream::iter(rows), Some(3), 2)).unwrap();
        assert_eq!(page, vec![2, 3, 4]);
        assert!(has_more);
    }

    #[test]
    fn test_collect_page_without_limit() {
        let rows: Vec<Result<i32, sqlx::Error>> = (0..4).map(Ok).collect();
        let (page, has_more) =
            smol::block_on(collect_page(futures::stream::iter(rows), None, 0)).unwrap();
        assert_eq!(page.len(), 4);
        assert!(!has_more);
    }

    #[test]
    fn test_collect_page_exact_limit_has_no_more() {
        let rows: Vec<Result<i32, sqlx::Error>> = (0..3).map(Ok).collect();
        let (page, has_more) =
            smol::block_on(collect_page(futures::stream::iter(rows), Some(3), 0)).unwrap();
        assert_eq!(page.len(), 3);
        assert!(!has_more);
    }

    #[test]
    fn test_connect_error_classification() {
        assert!(matches!(connect_error(sqlx::Error::PoolTimedOut), DriverError::Unreachable(_)));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(connect_error(sqlx::Error::Io(io)), DriverError::Unreachable(_)));
    }

    #[test]
    fn test_format_plan_table() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("id", "int"), ColumnInfo::new("type", "text")],
            vec![Row::new(vec![Value::Int(1), Value::Null])],
        );
        assert_eq!(format_plan_table(&result), "id | type\n---------\n1 | NULL");
        assert_eq!(
            format_plan_table(&QueryResult::default()),
            "No execution plan available"
        );
    }
}
