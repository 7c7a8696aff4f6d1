//! Query parameter translation.
//!
//! Callers hand drivers `QueryParams` in one of two shapes; each driver rewrites
//! the SQL text to its native placeholder syntax here. Quoted strings, quoted
//! identifiers and comments are never rewritten.

use std::collections::HashMap;

use crate::services::database::traits::{QueryParams, Value};

/// Native placeholder syntax of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` per bound value (SQLite, MySQL, PartiQL)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

/// Translate `params` for a backend using `style`.
///
/// Positional params are passed through untouched: the SQL already uses the
/// backend's own placeholders. Named params are looked up from `:name` tokens.
pub fn bind_params(
    sql: &str,
    params: Option<&QueryParams>,
    style: PlaceholderStyle,
) -> (String, Vec<Value>) {
    match params {
        None => (sql.to_string(), Vec::new()),
        Some(QueryParams::Positional(values)) => (sql.to_string(), values.clone()),
        Some(QueryParams::Named(named)) => rewrite_named(sql, named, style),
    }
}

/// Translate pyformat placeholders (`%s`, `%(name)s`, `%%`) into `?`.
///
/// MySQL users write `%s` by habit; sqlx speaks `?`. SQL that already uses `?`
/// is left as is.
pub fn bind_pyformat(sql: &str, params: Option<&QueryParams>) -> (String, Vec<Value>) {
    let Some(params) = params else {
        return (sql.to_string(), Vec::new());
    };
    let named: HashMap<&str, &Value> = match params {
        QueryParams::Named(values) => values.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        QueryParams::Positional(_) => HashMap::new(),
    };
    let positional_values: &[Value] = match params {
        QueryParams::Positional(values) => values,
        QueryParams::Named(_) => &[],
    };
    let mut positional = positional_values.iter();

    let mut out = String::with_capacity(sql.len());
    let mut bound = Vec::new();
    let mut rewrote = false;
    let chars: Vec<char> = sql.chars().collect();

    scan(&chars, &mut out, |chars, i, out| {
        if chars[i] != '%' {
            return None;
        }
        match chars.get(i + 1) {
            Some('%') => {
                out.push('%');
                Some(i + 2)
            }
            Some('s') => {
                rewrote = true;
                out.push('?');
                bound.push(positional.next().cloned().unwrap_or(Value::Null));
                Some(i + 2)
            }
            Some('(') => {
                let close = chars[i + 2..].iter().position(|c| *c == ')')? + i + 2;
                if chars.get(close + 1) != Some(&'s') {
                    return None;
                }
                let name: String = chars[i + 2..close].iter().collect();
                rewrote = true;
                out.push('?');
                bound.push(named.get(name.as_str()).map(|v| (*v).clone()).unwrap_or(Value::Null));
                Some(close + 2)
            }
            _ => None,
        }
    });

    if rewrote {
        (out, bound)
    } else {
        (sql.to_string(), params.values())
    }
}

fn rewrite_named(
    sql: &str,
    named: &[(String, Value)],
    style: PlaceholderStyle,
) -> (String, Vec<Value>) {
    let lookup: HashMap<&str, &Value> = named.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let mut out = String::with_capacity(sql.len());
    let mut bound: Vec<Value> = Vec::new();
    let mut dollar_slots: HashMap<String, usize> = HashMap::new();
    let chars: Vec<char> = sql.chars().collect();

    scan(&chars, &mut out, |chars, i, out| {
        if chars[i] != ':' {
            return None;
        }
        // `::` is a cast, not a parameter
        if chars.get(i + 1) == Some(&':') {
            out.push_str("::");
            return Some(i + 2);
        }
        let start = i + 1;
        if !chars.get(start).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') {
            return None;
        }
        let end = chars[start..]
            .iter()
            .position(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|p| p + start)
            .unwrap_or(chars.len());
        let name: String = chars[start..end].iter().collect();
        let value = lookup.get(name.as_str())?;

        match style {
            PlaceholderStyle::Question => {
                out.push('?');
                bound.push((*value).clone());
            }
            PlaceholderStyle::Dollar => {
                let slot = match dollar_slots.get(&name) {
                    Some(slot) => *slot,
                    None => {
                        bound.push((*value).clone());
                        dollar_slots.insert(name, bound.len());
                        bound.len()
                    }
                };
                out.push('$');
                out.push_str(&slot.to_string());
            }
        }
        Some(end)
    });

    (out, bound)
}

/// Walk `chars`, copying quoted sections and comments verbatim and offering every
/// other position to `on_char`. The callback returns the next index when it
/// consumed input, or `None` to copy the current char unchanged.
fn scan<F>(chars: &[char], out: &mut String, mut on_char: F)
where
    F: FnMut(&[char], usize, &mut String) -> Option<usize>,
{
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|x| *x == c)
                    .map(|p| p + i + 2)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|x| *x == '\n')
                    .map(|p| p + i)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = chars[i + 2..]
                    .windows(2)
                    .position(|w| w == ['*', '/'])
                    .map(|p| p + i + 4)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            _ => match on_char(chars, i, out) {
                Some(next) => i = next,
                None => {
                    out.push(c);
                    i += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, Value)]) -> QueryParams {
        QueryParams::Named(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_positional_passthrough() {
        let params = QueryParams::Positional(vec![Value::Int(1)]);
        let (sql, values) = bind_params("SELECT $1", Some(&params), PlaceholderStyle::Dollar);
        assert_eq!(sql, "SELECT $1");
        assert_eq!(values, vec![Value::Int(1)]);
    }

    #[test]
    fn test_named_to_question() {
        let params = named(&[("id", Value::Int(7)), ("name", Value::from("a"))]);
        let (sql, values) = bind_params(
            "SELECT * FROM t WHERE id = :id OR parent = :id AND name = :name",
            Some(&params),
            PlaceholderStyle::Question,
        );
        assert_eq!(sql, "SELECT * FROM t WHERE id = ? OR parent = ? AND name = ?");
        assert_eq!(values, vec![Value::Int(7), Value::Int(7), Value::from("a")]);
    }

    #[test]
    fn test_named_to_dollar_reuses_slots() {
        let params = named(&[("id", Value::Int(7)), ("name", Value::from("a"))]);
        let (sql, values) = bind_params(
            "SELECT :name, :id, :name",
            Some(&params),
            PlaceholderStyle::Dollar,
        );
        assert_eq!(sql, "SELECT $1, $2, $1");
        assert_eq!(values, vec![Value::from("a"), Value::Int(7)]);
    }

    #[test]
    fn test_named_skips_casts_and_literals() {
        let params = named(&[("id", Value::Int(1))]);
        let (sql, values) = bind_params(
            "SELECT ':id', id::text FROM t -- :id\nWHERE id = :id",
            Some(&params),
            PlaceholderStyle::Dollar,
        );
        assert_eq!(sql, "SELECT ':id', id::text FROM t -- :id\nWHERE id = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_pyformat_positional() {
        let params = QueryParams::Positional(vec![Value::Int(1), Value::from("x")]);
        let (sql, values) = bind_pyformat(
            "SELECT * FROM t WHERE a = %s AND b LIKE 'x%s' AND c = %s AND d LIKE '50%%'",
            Some(&params),
        );
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE a = ? AND b LIKE 'x%s' AND c = ? AND d LIKE '50%%'"
        );
        assert_eq!(values, vec![Value::Int(1), Value::from("x")]);
    }

    #[test]
    fn test_pyformat_named() {
        let params = named(&[("id", Value::Int(3))]);
        let (sql, values) = bind_pyformat("SELECT %(id)s, %(id)s", Some(&params));
        assert_eq!(sql, "SELECT ?, ?");
        assert_eq!(values, vec![Value::Int(3), Value::Int(3)]);
    }

    #[test]
    fn test_pyformat_leaves_question_marks() {
        let params = QueryParams::Positional(vec![Value::Int(3)]);
        let (sql, values) = bind_pyformat("SELECT ?", Some(&params));
        assert_eq!(sql, "SELECT ?");
        assert_eq!(values, vec![Value::Int(3)]);
    }
}
