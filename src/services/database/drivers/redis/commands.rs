//! Redis command parsing, dispatch and result shaping.
//!
//! Redis has no query language, so the "query" is a single command line. The
//! first word picks the command (case-insensitive); well-known commands get a
//! typed call and a tabular result shape, anything else is passed through.

use redis::{Commands, ConnectionLike, RedisResult};

use crate::services::database::traits::{ColumnInfo, QueryErrorKind, QueryResult, Row, Value};

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum RedisCommand {
    Keys(String),
    Get(String),
    MGet(Vec<String>),
    HGetAll(String),
    HGet(String, String),
    LRange(String, isize, isize),
    LLen(String),
    SMembers(String),
    SCard(String),
    ZRange(String, isize, isize),
    ZCard(String),
    Type(String),
    Ttl(String),
    Exists(String),
    Info(Option<String>),
    DbSize,
    Scan {
        cursor: u64,
        pattern: String,
        count: usize,
    },
    /// Anything else, sent verbatim
    Generic(String, Vec<String>),
}

/// A reply, classified by the shape it is displayed in.
#[derive(Debug, Clone, PartialEq)]
pub enum RedisReply {
    Nil,
    Scalar(Value),
    List(Vec<Value>),
    /// Sorted-set members with scores
    Scored(Vec<(String, f64)>),
    Hash(Vec<(String, String)>),
    Scan { cursor: u64, keys: Vec<String> },
    /// Replies with no tabular shape, rendered as text
    Other(String),
}

fn require_key(name: &str, args: &[&str]) -> Result<String, String> {
    args.first()
        .map(|s| s.to_string())
        .ok_or_else(|| format!("{} requires a key", name))
}

fn parse_index(raw: &str) -> Result<isize, String> {
    raw.parse()
        .map_err(|_| format!("invalid literal for int(): '{}'", raw))
}

fn require_range(name: &str, args: &[&str]) -> Result<(String, isize, isize), String> {
    if args.len() < 3 {
        return Err(format!("{} requires key, start, and stop", name));
    }
    Ok((args[0].to_string(), parse_index(args[1])?, parse_index(args[2])?))
}

/// Parse a command line. Errors are user-facing messages.
pub fn parse_command(input: &str) -> Result<RedisCommand, String> {
    let mut words = input.split_whitespace();
    let Some(first) = words.next() else {
        return Err("Empty command".to_string());
    };
    let name = first.to_uppercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "KEYS" => RedisCommand::Keys(args.first().copied().unwrap_or("*").to_string()),
        "GET" => RedisCommand::Get(require_key("GET", &args)?),
        "MGET" => {
            if args.is_empty() {
                return Err("MGET requires at least one key".to_string());
            }
            RedisCommand::MGet(args.iter().map(|s| s.to_string()).collect())
        }
        "HGETALL" => RedisCommand::HGetAll(require_key("HGETALL", &args)?),
        "HGET" => {
            if args.len() < 2 {
                return Err("HGET requires key and field".to_string());
            }
            RedisCommand::HGet(args[0].to_string(), args[1].to_string())
        }
        "LRANGE" => {
            let (key, start, stop) = require_range("LRANGE", &args)?;
            RedisCommand::LRange(key, start, stop)
        }
        "LLEN" => RedisCommand::LLen(require_key("LLEN", &args)?),
        "SMEMBERS" => RedisCommand::SMembers(require_key("SMEMBERS", &args)?),
        "SCARD" => RedisCommand::SCard(require_key("SCARD", &args)?),
        "ZRANGE" => {
            let (key, start, stop) = require_range("ZRANGE", &args)?;
            RedisCommand::ZRange(key, start, stop)
        }
        "ZCARD" => RedisCommand::ZCard(require_key("ZCARD", &args)?),
        "TYPE" => RedisCommand::Type(require_key("TYPE", &args)?),
        "TTL" => RedisCommand::Ttl(require_key("TTL", &args)?),
        "EXISTS" => RedisCommand::Exists(require_key("EXISTS", &args)?),
        "INFO" => RedisCommand::Info(args.first().map(|s| s.to_string())),
        "DBSIZE" => RedisCommand::DbSize,
        "SCAN" => {
            let cursor = match args.first() {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| format!("invalid literal for int(): '{}'", raw))?,
                None => 0,
            };
            let pattern = args.get(1).copied().unwrap_or("*").to_string();
            let count = match args.get(2) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| format!("invalid literal for int(): '{}'", raw))?,
                None => 100,
            };
            RedisCommand::Scan {
                cursor,
                pattern,
                count,
            }
        }
        _ => RedisCommand::Generic(name, args.iter().map(|s| s.to_string()).collect()),
    };
    Ok(command)
}

fn bytes_or_nil(value: Option<Vec<u8>>) -> RedisReply {
    match value {
        Some(bytes) => RedisReply::Scalar(bytes_value(bytes)),
        None => RedisReply::Nil,
    }
}

/// Parse `INFO` output into field/value pairs, skipping section headers.
pub fn parse_info(info: &str) -> Vec<(String, String)> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Convert a raw reply from a passthrough command.
pub fn classify_value(value: redis::Value) -> RedisReply {
    match value {
        redis::Value::Nil => RedisReply::Nil,
        redis::Value::Int(i) => RedisReply::Scalar(Value::Int(i)),
        redis::Value::Double(f) => RedisReply::Scalar(Value::Float(f)),
        redis::Value::Boolean(b) => RedisReply::Scalar(Value::Bool(b)),
        redis::Value::Okay => RedisReply::Scalar(Value::Text("OK".to_string())),
        redis::Value::SimpleString(s) => RedisReply::Scalar(Value::Text(s)),
        redis::Value::BulkString(bytes) => RedisReply::Scalar(bytes_value(bytes)),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            RedisReply::List(items.into_iter().map(element_value).collect())
        }
        redis::Value::Map(pairs) => RedisReply::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| {
                    (
                        element_value(k).to_plain_string(),
                        element_value(v).to_plain_string(),
                    )
                })
                .collect(),
        ),
        other => RedisReply::Other(format!("{:?}", other)),
    }
}

fn bytes_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

/// A nested reply element as a single cell
fn element_value(value: redis::Value) -> Value {
    match classify_value(value) {
        RedisReply::Nil => Value::Null,
        RedisReply::Scalar(v) => v,
        RedisReply::List(items) => Value::Array(items),
        other => Value::Text(format!("{:?}", other)),
    }
}

/// Run a parsed command on a blocking connection.
pub fn run_command<C: ConnectionLike>(conn: &mut C, command: RedisCommand) -> RedisResult<RedisReply> {
    let reply = match command {
        RedisCommand::Keys(pattern) => {
            let keys: Vec<String> = conn.keys(pattern)?;
            RedisReply::List(keys.into_iter().map(Value::Text).collect())
        }
        RedisCommand::Get(key) => bytes_or_nil(conn.get(key)?),
        RedisCommand::MGet(keys) => {
            // MGET with one key replies with a bare value, so always go through a list
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query(conn)?;
            RedisReply::List(
                values
                    .into_iter()
                    .map(|value| value.map_or(Value::Null, bytes_value))
                    .collect(),
            )
        }
        RedisCommand::HGetAll(key) => RedisReply::Hash(conn.hgetall(key)?),
        RedisCommand::HGet(key, field) => bytes_or_nil(conn.hget(key, field)?),
        RedisCommand::LRange(key, start, stop) => {
            let values: Vec<String> = conn.lrange(key, start, stop)?;
            RedisReply::List(values.into_iter().map(Value::Text).collect())
        }
        RedisCommand::LLen(key) => RedisReply::Scalar(Value::Int(conn.llen(key)?)),
        RedisCommand::SMembers(key) => {
            let members: Vec<String> = conn.smembers(key)?;
            RedisReply::List(members.into_iter().map(Value::Text).collect())
        }
        RedisCommand::SCard(key) => RedisReply::Scalar(Value::Int(conn.scard(key)?)),
        RedisCommand::ZRange(key, start, stop) => {
            let members: Vec<(String, f64)> = conn.zrange_withscores(key, start, stop)?;
            if members.is_empty() {
                RedisReply::List(Vec::new())
            } else {
                RedisReply::Scored(members)
            }
        }
        RedisCommand::ZCard(key) => RedisReply::Scalar(Value::Int(conn.zcard(key)?)),
        RedisCommand::Type(key) => {
            let key_type: String = redis::cmd("TYPE").arg(key).query(conn)?;
            RedisReply::Scalar(Value::Text(key_type))
        }
        RedisCommand::Ttl(key) => RedisReply::Scalar(Value::Int(conn.ttl(key)?)),
        RedisCommand::Exists(key) => {
            let count: i64 = redis::cmd("EXISTS").arg(key).query(conn)?;
            RedisReply::Scalar(Value::Int(count))
        }
        RedisCommand::Info(section) => {
            let mut cmd = redis::cmd("INFO");
            if let Some(section) = section {
                cmd.arg(section);
            }
            let info: String = cmd.query(conn)?;
            RedisReply::Hash(parse_info(&info))
        }
        RedisCommand::DbSize => {
            let size: i64 = redis::cmd("DBSIZE").query(conn)?;
            RedisReply::Scalar(Value::Int(size))
        }
        RedisCommand::Scan {
            cursor,
            pattern,
            count,
        } => {
            let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query(conn)?;
            RedisReply::Scan { cursor, keys }
        }
        RedisCommand::Generic(name, args) => {
            let value: redis::Value = redis::cmd(&name).arg(args).query(conn)?;
            classify_value(value)
        }
    };
    Ok(reply)
}

/// Shape a reply into a result grid.
pub fn format_reply(reply: RedisReply) -> QueryResult {
    match reply {
        RedisReply::Nil => QueryResult::new(
            vec![ColumnInfo::new("value", "null")],
            vec![Row::new(vec![Value::Text("(nil)".to_string())])],
        ),
        RedisReply::Scalar(value) => QueryResult::new(
            vec![ColumnInfo::new("value", value.type_name())],
            vec![Row::new(vec![value])],
        ),
        RedisReply::List(values) if values.is_empty() => {
            QueryResult::new(vec![ColumnInfo::new("value", "list")], Vec::new())
        }
        RedisReply::List(values) => QueryResult::new(
            vec![ColumnInfo::new("value", "str")],
            values.into_iter().map(|v| Row::new(vec![v])).collect(),
        ),
        RedisReply::Scored(members) => QueryResult::new(
            vec![
                ColumnInfo::new("member", "str"),
                ColumnInfo::new("score", "float"),
            ],
            members
                .into_iter()
                .map(|(member, score)| Row::new(vec![Value::Text(member), Value::Float(score)]))
                .collect(),
        ),
        RedisReply::Hash(pairs) => QueryResult::new(
            vec![
                ColumnInfo::new("field", "str"),
                ColumnInfo::new("value", "str"),
            ],
            pairs
                .into_iter()
                .map(|(field, value)| Row::new(vec![Value::Text(field), Value::Text(value)]))
                .collect(),
        ),
        RedisReply::Scan { cursor, keys } => {
            let cursor = Value::UInt(cursor);
            let rows = if keys.is_empty() {
                vec![Row::new(vec![cursor, Value::Text("(no keys)".to_string())])]
            } else {
                keys.into_iter()
                    .map(|key| Row::new(vec![cursor.clone(), Value::Text(key)]))
                    .collect()
            };
            QueryResult::new(
                vec![ColumnInfo::new("cursor", "int"), ColumnInfo::new("key", "str")],
                rows,
            )
        }
        RedisReply::Other(text) => QueryResult::new(
            vec![ColumnInfo::new("result", "str")],
            vec![Row::new(vec![Value::Text(text)])],
        ),
    }
}

/// Parse errors become query errors, not faults.
pub fn invalid_command(message: String) -> QueryResult {
    QueryResult::failed(QueryErrorKind::Invalid, message)
}
