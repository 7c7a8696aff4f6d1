//! DynamoDB attribute conversion.
//!
//! Items are maps of `AttributeValue`s with no fixed shape, so result columns
//! are the union of attribute names over the returned items.

use std::collections::{BTreeSet, HashMap};

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Number, Value as JsonValue};

use crate::services::database::traits::{ColumnInfo, QueryResult, Row, Value};

/// Column type for scan results, where one attribute may hold several types.
pub const VARIANT_TYPE: &str = "variant";

/// An item as returned by the SDK
pub type Item = HashMap<String, AttributeValue>;

/// Converter between DynamoDB attributes and the unified `Value` type.
pub struct DynamoValueConverter;

impl DynamoValueConverter {
    /// Convert one attribute value.
    pub fn to_value(attr: &AttributeValue) -> Value {
        match attr {
            AttributeValue::S(s) => Value::Text(s.clone()),
            AttributeValue::N(n) => Self::parse_number(n),
            AttributeValue::B(blob) => Value::Bytes(blob.as_ref().to_vec()),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::L(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            AttributeValue::M(_) => Value::Json(Self::to_json(attr)),
            AttributeValue::Ss(items) => {
                Value::Array(items.iter().cloned().map(Value::Text).collect())
            }
            AttributeValue::Ns(items) => {
                Value::Array(items.iter().map(|n| Self::parse_number(n)).collect())
            }
            AttributeValue::Bs(items) => Value::Array(
                items
                    .iter()
                    .map(|blob| Value::Bytes(blob.as_ref().to_vec()))
                    .collect(),
            ),
            other => Value::Other {
                type_name: "unknown".to_string(),
                display: format!("{:?}", other),
            },
        }
    }

    /// Numbers without a fraction or exponent are integers; anything else is a float.
    fn parse_number(n: &str) -> Value {
        let integral = !n.contains(['.', 'e', 'E']);
        if integral {
            if let Ok(i) = n.parse::<i64>() {
                return Value::Int(i);
            }
        }
        match n.parse::<rust_decimal::Decimal>() {
            Ok(d) if integral => Value::Decimal(d),
            _ => n
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(n.to_string())),
        }
    }

    /// Render an attribute as JSON; used for maps so nesting survives export.
    pub fn to_json(attr: &AttributeValue) -> JsonValue {
        match attr {
            AttributeValue::S(s) => JsonValue::String(s.clone()),
            AttributeValue::N(n) => n
                .parse::<i64>()
                .map(JsonValue::from)
                .ok()
                .or_else(|| n.parse::<f64>().ok().and_then(Number::from_f64).map(JsonValue::Number))
                .unwrap_or_else(|| JsonValue::String(n.clone())),
            AttributeValue::B(blob) => JsonValue::String(hex::encode(blob.as_ref())),
            AttributeValue::Bool(b) => JsonValue::Bool(*b),
            AttributeValue::Null(_) => JsonValue::Null,
            AttributeValue::L(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            AttributeValue::M(map) => {
                let mut object = Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    object.insert(key.clone(), Self::to_json(&map[key]));
                }
                JsonValue::Object(object)
            }
            AttributeValue::Ss(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
            }
            AttributeValue::Ns(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|n| Self::to_json(&AttributeValue::N(n.clone())))
                    .collect(),
            ),
            AttributeValue::Bs(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|blob| JsonValue::String(hex::encode(blob.as_ref())))
                    .collect(),
            ),
            other => JsonValue::String(format!("{:?}", other)),
        }
    }

    /// Convert a bound query parameter into an attribute.
    pub fn to_attribute(value: Value) -> AttributeValue {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(b),
            v @ (Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Decimal(_)) => {
                AttributeValue::N(v.to_plain_string())
            }
            Value::Text(s) => AttributeValue::S(s),
            Value::Bytes(b) => AttributeValue::B(Blob::new(b)),
            Value::Array(items) => {
                AttributeValue::L(items.into_iter().map(Self::to_attribute).collect())
            }
            Value::Json(json) => Self::json_to_attribute(json),
            other => AttributeValue::S(other.to_plain_string()),
        }
    }

    fn json_to_attribute(json: JsonValue) -> AttributeValue {
        match json {
            JsonValue::Null => AttributeValue::Null(true),
            JsonValue::Bool(b) => AttributeValue::Bool(b),
            JsonValue::Number(n) => AttributeValue::N(n.to_string()),
            JsonValue::String(s) => AttributeValue::S(s),
            JsonValue::Array(items) => {
                AttributeValue::L(items.into_iter().map(Self::json_to_attribute).collect())
            }
            JsonValue::Object(map) => AttributeValue::M(
                map.into_iter()
                    .map(|(k, v)| (k, Self::json_to_attribute(v)))
                    .collect(),
            ),
        }
    }

    /// Readable name for a DynamoDB attribute type code.
    pub fn type_name(code: &str) -> &str {
        match code {
            "S" => "String",
            "N" => "Number",
            "B" => "Binary",
            "SS" => "String Set",
            "NS" => "Number Set",
            "BS" => "Binary Set",
            "M" => "Map",
            "L" => "List",
            "BOOL" => "Boolean",
            "NULL" => "Null",
            other => other,
        }
    }

    /// Turn a page of items into a result grid.
    ///
    /// Columns are the sorted union of attribute names. With `typed`, each
    /// column takes the type of the first value seen for it; otherwise every
    /// column is a variant. Missing attributes become NULL.
    pub fn items_to_result(items: &[Item], typed: bool) -> QueryResult {
        let names: BTreeSet<&str> = items
            .iter()
            .flat_map(|item| item.keys().map(String::as_str))
            .collect();

        let columns = names
            .iter()
            .map(|name| {
                let type_name = if typed {
                    items
                        .iter()
                        .find_map(|item| item.get(*name))
                        .map(|attr| Self::to_value(attr).type_name())
                        .unwrap_or(VARIANT_TYPE)
                } else {
                    VARIANT_TYPE
                };
                ColumnInfo::new(*name, type_name)
            })
            .collect();

        let rows = items
            .iter()
            .map(|item| {
                Row::new(
                    names
                        .iter()
                        .map(|name| item.get(*name).map(Self::to_value).unwrap_or_default())
                        .collect(),
                )
            })
            .collect();

        QueryResult::new(columns, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_scalar_attributes() {
        assert_eq!(
            DynamoValueConverter::to_value(&AttributeValue::S("ada".into())),
            Value::from("ada")
        );
        assert_eq!(
            DynamoValueConverter::to_value(&AttributeValue::N("42".into())),
            Value::Int(42)
        );
        assert_eq!(
            DynamoValueConverter::to_value(&AttributeValue::N("2.5".into())),
            Value::Float(2.5)
        );
        assert_eq!(
            DynamoValueConverter::to_value(&AttributeValue::Null(true)),
            Value::Null
        );
        assert_eq!(
            DynamoValueConverter::to_value(&AttributeValue::B(Blob::new(vec![1, 2]))),
            Value::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn test_huge_integer_keeps_precision() {
        let value = DynamoValueConverter::to_value(&AttributeValue::N(
            "123456789012345678901234567890".into(),
        ));
        assert!(matches!(value, Value::Decimal(_)));
    }

    #[test]
    fn test_collections() {
        let list = AttributeValue::L(vec![AttributeValue::N("1".into()), AttributeValue::Bool(true)]);
        assert_eq!(
            DynamoValueConverter::to_value(&list),
            Value::Array(vec![Value::Int(1), Value::Bool(true)])
        );

        let set = AttributeValue::Ss(vec!["a".into(), "b".into()]);
        assert_eq!(
            DynamoValueConverter::to_value(&set),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );

        let map = AttributeValue::M(item(&[
            ("name", AttributeValue::S("ada".into())),
            ("age", AttributeValue::N("36".into())),
        ]));
        assert_eq!(
            DynamoValueConverter::to_value(&map),
            Value::Json(serde_json::json!({"age": 36, "name": "ada"}))
        );
    }

    #[test]
    fn test_parameters_to_attributes() {
        assert_eq!(
            DynamoValueConverter::to_attribute(Value::Int(7)),
            AttributeValue::N("7".into())
        );
        assert_eq!(
            DynamoValueConverter::to_attribute(Value::Null),
            AttributeValue::Null(true)
        );
        assert_eq!(
            DynamoValueConverter::to_attribute(Value::Json(serde_json::json!({"k": [1]}))),
            AttributeValue::M(item(&[(
                "k",
                AttributeValue::L(vec![AttributeValue::N("1".into())])
            )]))
        );
    }

    #[test]
    fn test_items_to_result_unions_attributes() {
        let items = vec![
            item(&[("pk", AttributeValue::S("a".into()))]),
            item(&[
                ("pk", AttributeValue::S("b".into())),
                ("count", AttributeValue::N("3".into())),
            ]),
        ];

        let result = DynamoValueConverter::items_to_result(&items, false);
        let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["count", "pk"]);
        assert_eq!(result.columns[0].type_name, VARIANT_TYPE);
        assert_eq!(result.rows[0].get(0), Some(&Value::Null));
        assert_eq!(result.rows[1].get(0), Some(&Value::Int(3)));

        let typed = DynamoValueConverter::items_to_result(&items, true);
        assert_eq!(typed.columns[0].type_name, "int");
        assert_eq!(typed.columns[1].type_name, "str");
    }

    #[test]
    fn test_no_items_is_empty_result() {
        let result = DynamoValueConverter::items_to_result(&[], true);
        assert!(result.is_success());
        assert_eq!(result.row_count, 0);
        assert!(result.columns.is_empty());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(DynamoValueConverter::type_name("S"), "String");
        assert_eq!(DynamoValueConverter::type_name("NS"), "Number Set");
        assert_eq!(DynamoValueConverter::type_name("X"), "X");
    }
}
