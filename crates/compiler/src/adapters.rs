//! Provider schema adapters.
//!
//! Pure functions from one canonical parameter schema to each provider's
//! function-declaration shape. Selected at build time; the runtime only reads
//! the stored output.

use palaver_core::Provider;
use serde_json::{json, Map, Value};

/// Keywords a canonical schema may use. Anything else is rejected by the
/// validator so that every adapter can carry the whole schema across.
pub const SUPPORTED_KEYWORDS: &[&str] = &[
    "type",
    "description",
    "properties",
    "required",
    "additionalProperties",
    "items",
    "enum",
    "format",
    "default",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "pattern",
];

/// Build the function declaration for `provider`.
pub fn adapt(provider: Provider, tool_id: &str, summary: &str, parameters: &Value) -> Value {
    match provider {
        Provider::OpenAi => json!({
            "type": "function",
            "function": {
                "name": tool_id,
                "description": summary,
                "parameters": json_schema(parameters),
            }
        }),
        Provider::OpenAiRealtime => json!({
            "type": "function",
            "name": tool_id,
            "description": summary,
            "parameters": json_schema(parameters),
        }),
        Provider::Anthropic => json!({
            "name": tool_id,
            "description": summary,
            "input_schema": json_schema(parameters),
        }),
        Provider::Gemini => json!({
            "name": tool_id,
            "description": summary,
            "parameters": gemini_schema(parameters),
        }),
    }
}

/// JSON-Schema based providers: copy supported keywords, recursing into
/// `properties` and `items`.
fn json_schema(node: &Value) -> Value {
    map_schema(node, &|key: &str, value: &Value| Some((key.to_string(), value.clone())))
}

/// Gemini takes an OpenAPI subset: upper-case type names and no
/// `additionalProperties`.
fn gemini_schema(node: &Value) -> Value {
    map_schema(node, &|key: &str, value: &Value| match key {
        "additionalProperties" => None,
        "type" => Some((
            key.to_string(),
            value
                .as_str()
                .map(|t| Value::String(t.to_ascii_uppercase()))
                .unwrap_or_else(|| value.clone()),
        )),
        _ => Some((key.to_string(), value.clone())),
    })
}

type KeywordFn<'a> = dyn Fn(&str, &Value) -> Option<(String, Value)> + 'a;

fn map_schema(node: &Value, keyword: &KeywordFn<'_>) -> Value {
    let Some(obj) = node.as_object() else {
        return node.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        match key.as_str() {
            "properties" => {
                let props = value
                    .as_object()
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, child)| (name.clone(), map_schema(child, keyword)))
                            .collect::<Map<String, Value>>()
                    })
                    .unwrap_or_default();
                out.insert(key.clone(), Value::Object(props));
            }
            "items" => {
                out.insert(key.clone(), map_schema(value, keyword));
            }
            k if SUPPORTED_KEYWORDS.contains(&k) => {
                if let Some((k, v)) = keyword(k, value) {
                    out.insert(k, v);
                }
            }
            _ => {}
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["contact", "topics"],
            "properties": {
                "contact": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["email"],
                    "properties": {
                        "email": {"type": "string", "format": "email"},
                        "callback_at": {"type": "string", "format": "date-time"},
                        "address": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "country": {"type": "string", "enum": ["DE", "FR", "US"]}
                            }
                        }
                    }
                },
                "topics": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "tag": {"type": "string", "enum": ["billing", "support"]},
                            "weight": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.5}
                        }
                    }
                },
                "limit": {"type": "integer", "default": 5}
            }
        })
    }

    /// Undo a provider's shape back to the canonical schema.
    fn to_canonical(provider: Provider, declared: &Value) -> Value {
        let params = match provider {
            Provider::OpenAi => declared["function"]["parameters"].clone(),
            Provider::OpenAiRealtime | Provider::Gemini => declared["parameters"].clone(),
            Provider::Anthropic => declared["input_schema"].clone(),
        };
        if provider == Provider::Gemini {
            ungemini(&params)
        } else {
            params
        }
    }

    fn ungemini(node: &Value) -> Value {
        let mut obj = node.as_object().cloned().unwrap_or_default();
        if let Some(t) = obj.get("type").and_then(Value::as_str).map(str::to_ascii_lowercase) {
            if t == "object" {
                obj.insert("additionalProperties".into(), Value::Bool(false));
            }
            obj.insert("type".into(), Value::String(t));
        }
        if let Some(Value::Object(props)) = obj.get_mut("properties") {
            for child in props.values_mut() {
                *child = ungemini(child);
            }
        }
        if let Some(items) = obj.get_mut("items") {
            *items = ungemini(items);
        }
        Value::Object(obj)
    }

    #[test]
    fn every_provider_round_trips_nested_structure() {
        let schema = nested_schema();
        for provider in Provider::ALL {
            let declared = adapt(provider, "contact_request", "Send a request.", &schema);
            assert_eq!(
                to_canonical(provider, &declared),
                schema,
                "provider {provider} lost structure"
            );
        }
    }

    #[test]
    fn openai_shape() {
        let declared = adapt(Provider::OpenAi, "search", "Search things.", &nested_schema());
        assert_eq!(declared["type"], "function");
        assert_eq!(declared["function"]["name"], "search");
        assert_eq!(
            declared["function"]["parameters"]["properties"]["contact"]["properties"]["email"]["format"],
            "email"
        );
    }

    #[test]
    fn gemini_uppercases_types_at_every_depth() {
        let declared = adapt(Provider::Gemini, "search", "Search things.", &nested_schema());
        let params = &declared["parameters"];
        assert_eq!(params["type"], "OBJECT");
        assert!(params.get("additionalProperties").is_none());
        assert_eq!(params["properties"]["topics"]["type"], "ARRAY");
        assert_eq!(params["properties"]["topics"]["items"]["type"], "OBJECT");
        assert_eq!(
            params["properties"]["contact"]["properties"]["address"]["properties"]["country"]["enum"],
            json!(["DE", "FR", "US"])
        );
    }

    #[test]
    fn property_named_like_a_keyword_survives() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "format": {"type": "string"},
                "title": {"type": "string"}
            }
        });
        let declared = adapt(Provider::Anthropic, "t", "s", &schema);
        assert_eq!(declared["input_schema"], schema);
    }
}
