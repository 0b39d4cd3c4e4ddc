//! Value extraction from runtime descriptors.
//!
//! Queries use JSONPath (RFC 9535). The `{NETWORK_ID}` token is replaced
//! by the quoted network name before the query is parsed, so a query such
//! as `$.NetworkSettings.Networks[{NETWORK_ID}].IPAddress` addresses the
//! sibling's address on the stack network.

use brewdock_common::constants::NETWORK_ID_TOKEN;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_compose::tree::ConfigValue;
use serde_json::Value;
use serde_json_path::JsonPath;

/// Replaces every `{NETWORK_ID}` token with `network` as a quoted string literal.
#[must_use]
pub fn substitute_network(query: &str, network: &str) -> String {
    query.replace(NETWORK_ID_TOKEN, &format!("\"{network}\""))
}

/// Extracts the first node matched by `query` and normalizes it.
///
/// Returns `Ok(None)` when the node has a type that cannot be written into
/// a config file (objects and nulls).
///
/// # Errors
///
/// Returns [`BrewdockError::Extraction`] if the query is malformed or
/// matches nothing.
pub fn extract(descriptor: &Value, query: &str) -> Result<Option<ConfigValue>> {
    let path = JsonPath::parse(query).map_err(|e| BrewdockError::Extraction {
        query: query.to_string(),
        reason: e.to_string(),
    })?;
    let node = path
        .query(descriptor)
        .first()
        .ok_or_else(|| BrewdockError::Extraction {
            query: query.to_string(),
            reason: "no node matched".into(),
        })?;
    Ok(normalize(node))
}

/// Converts a descriptor node into a config value.
///
/// Integral numbers become [`ConfigValue::Integer`] (or
/// [`ConfigValue::Unsigned`] above `i64::MAX`); strings, booleans,
/// other numbers, and arrays pass through; objects and nulls are absent.
#[must_use]
pub fn normalize(node: &Value) -> Option<ConfigValue> {
    match node {
        Value::String(s) => Some(ConfigValue::String(s.clone())),
        Value::Bool(b) => Some(ConfigValue::Bool(*b)),
        Value::Number(n) => Some(normalize_number(n)),
        Value::Array(items) => Some(ConfigValue::Array(items.iter().map(element).collect())),
        Value::Object(_) | Value::Null => None,
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn normalize_number(n: &serde_json::Number) -> ConfigValue {
    if let Some(i) = n.as_i64() {
        return ConfigValue::Integer(i);
    }
    if let Some(u) = n.as_u64() {
        return ConfigValue::Unsigned(u);
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        ConfigValue::Integer(f as i64)
    } else {
        ConfigValue::Float(f)
    }
}

fn element(node: &Value) -> ConfigValue {
    match node {
        Value::Null => ConfigValue::Null,
        Value::Object(map) => ConfigValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), element(v)))
                .collect(),
        ),
        other => normalize(other).unwrap_or(ConfigValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn descriptor() -> Value {
        json!({
            "levelOne": {
                "stringValue": "localhost",
                "intValue": 5432,
                "floatValue": 10.32,
                "wholeFloat": 8080.0,
                "boolValue": true,
                "arrayValue": ["one", "two", "three"],
                "mapValue": { "key1": "value1" }
            },
            "NetworkSettings": {
                "Networks": { "brewdock-abc": { "IPAddress": "172.18.0.3" } }
            }
        })
    }

    #[test]
    fn extracts_scalars_with_normalized_numbers() {
        let d = descriptor();
        let cases = [
            ("$.levelOne.stringValue", Some(ConfigValue::from("localhost"))),
            ("$.levelOne.intValue", Some(ConfigValue::Integer(5432))),
            ("$.levelOne.floatValue", Some(ConfigValue::Float(10.32))),
            ("$.levelOne.wholeFloat", Some(ConfigValue::Integer(8080))),
            ("$.levelOne.boolValue", Some(ConfigValue::Bool(true))),
            ("$.levelOne.arrayValue[0]", Some(ConfigValue::from("one"))),
            ("$.levelOne.mapValue[\"key1\"]", Some(ConfigValue::from("value1"))),
        ];
        for (query, expected) in cases {
            assert_eq!(extract(&d, query).expect(query), expected, "{query}");
        }
    }

    #[test]
    fn arrays_pass_through() {
        let value = extract(&descriptor(), "$.levelOne.arrayValue").expect("array");
        assert_eq!(
            value,
            Some(ConfigValue::Array(vec!["one".into(), "two".into(), "three".into()]))
        );
    }

    #[test]
    fn objects_resolve_to_absent() {
        assert_eq!(extract(&descriptor(), "$.levelOne.mapValue").expect("object"), None);
    }

    #[test]
    fn unmatched_query_is_an_error() {
        let err = extract(&descriptor(), "$.levelOne.nope").expect_err("no match");
        assert!(matches!(err, BrewdockError::Extraction { .. }));
    }

    #[test]
    fn malformed_query_is_an_error() {
        assert!(extract(&descriptor(), "$.[[").is_err());
    }

    #[test]
    fn network_token_is_replaced_with_quoted_name() {
        let query = substitute_network(
            "$.NetworkSettings.Networks[{NETWORK_ID}].IPAddress",
            "brewdock-abc",
        );
        assert_eq!(query, "$.NetworkSettings.Networks[\"brewdock-abc\"].IPAddress");
        assert_eq!(
            extract(&descriptor(), &query).expect("ip"),
            Some(ConfigValue::from("172.18.0.3"))
        );
    }
}
