//! Tool-schema sanitization for the consuming agent.
//!
//! MCP servers describe tool parameters with a JSON-Schema subset, but
//! function-calling dialects do not support every keyword. This strips
//! the unsupported ones before a schema is handed to the agent.

use serde_json::Value;

/// Keywords not universally supported by function-calling dialects.
const STRIPPED_KEYWORDS: &[&str] = &["const", "default", "additionalProperties"];

/// Produce an agent-compatible copy of a tool schema.
///
/// Recursively removes the stripped keywords, descending into
/// `properties` values, `items` (object or tuple form), and
/// `anyOf`/`allOf`/`oneOf` arrays. Pure: the cached original is never
/// mutated.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if STRIPPED_KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                let cleaned = match key.as_str() {
                    "properties" => match value {
                        Value::Object(props) => Value::Object(
                            props
                                .iter()
                                .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                    "items" => match value {
                        Value::Array(items) => {
                            Value::Array(items.iter().map(sanitize_schema).collect())
                        }
                        other => sanitize_schema(other),
                    },
                    "anyOf" | "allOf" | "oneOf" => match value {
                        Value::Array(variants) => {
                            Value::Array(variants.iter().map(sanitize_schema).collect())
                        }
                        other => other.clone(),
                    },
                    _ => value.clone(),
                };
                out.insert(key.clone(), cleaned);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_keywords_at_every_nesting_level() {
        let schema = json!({
            "type": "object",
            "properties": {
                "x": { "type": "string", "const": "a", "default": "a" }
            },
            "additionalProperties": false
        });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(
            sanitized,
            json!({
                "type": "object",
                "properties": { "x": { "type": "string" } }
            })
        );
    }

    #[test]
    fn recurses_into_items_and_union_arrays() {
        let schema = json!({
            "type": "object",
            "properties": {
                "list": {
                    "type": "array",
                    "items": { "type": "integer", "default": 0 }
                },
                "choice": {
                    "anyOf": [
                        { "type": "string", "const": "yes" },
                        { "type": "null" }
                    ]
                }
            }
        });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["properties"]["list"]["items"], json!({ "type": "integer" }));
        assert_eq!(
            sanitized["properties"]["choice"]["anyOf"][0],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn tuple_items_form_is_handled() {
        let schema = json!({
            "type": "array",
            "items": [
                { "type": "string", "default": "x" },
                { "type": "number" }
            ]
        });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["items"][0], json!({ "type": "string" }));
        assert_eq!(sanitized["items"][1], json!({ "type": "number" }));
    }

    #[test]
    fn preserves_supported_keywords() {
        let schema = json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string", "description": "File path" }
            }
        });
        assert_eq!(sanitize_schema(&schema), schema);
    }

    #[test]
    fn does_not_mutate_the_original() {
        let schema = json!({ "type": "object", "additionalProperties": false });
        let _ = sanitize_schema(&schema);
        assert!(schema.get("additionalProperties").is_some());
    }

    #[test]
    fn non_object_values_pass_through() {
        assert_eq!(sanitize_schema(&json!(true)), json!(true));
        assert_eq!(sanitize_schema(&json!("string")), json!("string"));
    }
}
