use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};
use tracing::debug;

/// Compiled parameter schema for one tool.
///
/// Declared defaults are filled in first, then the arguments are validated.
/// The pre- and post-default forms are logged at debug level when they differ.
pub struct ArgumentValidator {
    schema: Value,
    compiled: JSONSchema,
}

impl ArgumentValidator {
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            schema: schema.clone(),
            compiled,
        })
    }

    /// The arguments with declared defaults filled in, without validating.
    pub fn with_defaults(&self, args: &Value) -> Value {
        let mut args = if args.is_null() { json!({}) } else { args.clone() };
        apply_defaults(&self.schema, &mut args);
        args
    }

    /// Returns the arguments with defaults applied, or every violation found.
    pub fn validate(&self, tool_id: &str, args: Value) -> Result<Value, Vec<String>> {
        let mut args = if args.is_null() { json!({}) } else { args };
        let before = args.clone();
        apply_defaults(&self.schema, &mut args);
        if args != before {
            debug!(tool_id, before = %before, after = %args, "applied argument defaults");
        }

        let errors: Vec<String> = match self.compiled.validate(&args) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect(),
        };
        if errors.is_empty() {
            Ok(args)
        } else {
            Err(errors)
        }
    }
}

fn apply_defaults(schema: &Value, value: &mut Value) {
    match value {
        Value::Object(obj) => {
            let Some(props) = schema.get("properties").and_then(Value::as_object) else {
                return;
            };
            for (name, prop) in props {
                match obj.get_mut(name) {
                    Some(child) => apply_defaults(prop, child),
                    None => {
                        if let Some(default) = prop.get("default") {
                            obj.insert(name.clone(), default.clone());
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    apply_defaults(item_schema, item);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ArgumentValidator {
        ArgumentValidator::compile(&json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["query"],
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "top_k": {"type": "integer", "minimum": 1, "maximum": 10, "default": 3},
                "filters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "field": {"type": "string"},
                            "exact": {"type": "boolean", "default": false}
                        }
                    }
                },
                "contact": {"type": "string", "format": "email"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn defaults_fill_missing_fields_at_every_depth() {
        let args = validator()
            .validate("search", json!({"query": "pricing", "filters": [{"field": "a"}]}))
            .unwrap();
        assert_eq!(args["top_k"], 3);
        assert_eq!(args["filters"][0]["exact"], false);
    }

    #[test]
    fn explicit_values_are_kept() {
        let args = validator()
            .validate("search", json!({"query": "pricing", "top_k": 7}))
            .unwrap();
        assert_eq!(args["top_k"], 7);
    }

    #[test]
    fn violations_are_all_reported() {
        let errors = validator()
            .validate("search", json!({"top_k": 50, "extra": true}))
            .unwrap_err();
        assert!(errors.len() >= 3, "{errors:?}");
    }

    #[test]
    fn format_is_enforced() {
        let errors = validator()
            .validate("search", json!({"query": "x", "contact": "not-an-email"}))
            .unwrap_err();
        assert!(errors[0].contains("/contact"));
    }

    #[test]
    fn null_arguments_mean_empty_object() {
        let errors = validator().validate("search", Value::Null).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("query")));
    }
}
