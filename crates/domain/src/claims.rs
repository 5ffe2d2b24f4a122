use serde_json::{Map, Value};

/// Reduces an incoming claim map to serialization-safe values.
///
/// Providers occasionally attach rich or null-valued claims; persisting
/// those into the identity attribute map must never fail, so every value is
/// rebuilt from primitives. Strings, numbers, and booleans pass through,
/// lists and maps are sanitized recursively, and nulls are dropped.
#[must_use]
pub fn sanitize_claims(claims: &Map<String, Value>) -> Map<String, Value> {
    claims
        .iter()
        .filter_map(|(key, value)| sanitize_value(value).map(|safe| (key.clone(), safe)))
        .collect()
}

fn sanitize_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(value.clone()),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(sanitize_value).collect(),
        )),
        Value::Object(entries) => Some(Value::Object(sanitize_claims(entries))),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{Map, Value, json};

    use super::sanitize_claims;

    fn contains_null(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => items.iter().any(contains_null),
            Value::Object(entries) => entries.values().any(contains_null),
            _ => false,
        }
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(entries) => entries,
            _ => Map::new(),
        }
    }

    #[test]
    fn primitives_pass_through() {
        let claims = as_map(json!({
            "sub": "abc",
            "email_verified": true,
            "auth_time": 1_700_000_000,
        }));

        assert_eq!(sanitize_claims(&claims), claims);
    }

    #[test]
    fn nulls_are_dropped_recursively() {
        let claims = as_map(json!({
            "middle_name": null,
            "address": { "street": null, "city": "Leiden" },
            "groups": ["pathology", null],
        }));

        let sanitized = sanitize_claims(&claims);

        assert!(!sanitized.contains_key("middle_name"));
        assert_eq!(
            sanitized.get("address"),
            Some(&json!({ "city": "Leiden" }))
        );
        assert_eq!(sanitized.get("groups"), Some(&json!(["pathology"])));
    }

    fn arbitrary_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|number| json!(number)),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn sanitized_output_is_null_free_and_idempotent(
            claims in prop::collection::btree_map("[a-z_]{1,12}", arbitrary_value(), 0..6)
        ) {
            let claims: Map<String, Value> = claims.into_iter().collect();
            let sanitized = sanitize_claims(&claims);

            prop_assert!(!sanitized.values().any(contains_null));
            prop_assert_eq!(sanitize_claims(&sanitized), sanitized.clone());
        }
    }
}
