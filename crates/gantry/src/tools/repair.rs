//! Schema-driven repair of tool-call arguments before dispatch.
//!
//! Models routinely hand back a JSON string where the schema wants an
//! object, or use a synonym for a parameter name. Repair is shape-level
//! only: strings are re-interpreted or wrapped under the schema's single
//! required key, known aliases are renamed, and that is all. Primitive
//! type coercion is deliberately not performed; a mismatch is rejected
//! so the model sees a precise error to correct.

use serde_json::{Map, Value};

fn schema_properties(parameters: &Value) -> Option<&Map<String, Value>> {
    parameters.get("properties")?.as_object()
}

fn schema_required(parameters: &Value) -> Vec<String> {
    parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn looks_path_like(raw: &str) -> bool {
    if raw.contains('/') || raw.contains('\\') {
        return true;
    }
    if raw.starts_with('.') || raw.starts_with('~') {
        return true;
    }
    let mut chars = raw.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), Some(':')) if c.is_ascii_alphabetic()
    )
}

/// Pick the key a bare string value should be wrapped under:
/// the single required name, else the single property, else a path
/// property when the value looks like a path, else a generic input key.
fn single_wrap_key(parameters: &Value, raw: &str) -> Option<String> {
    let required = schema_required(parameters);
    if required.len() == 1 {
        return Some(required[0].clone());
    }
    let props = schema_properties(parameters)?;
    if props.len() == 1 {
        return props.keys().next().cloned();
    }
    if looks_path_like(raw) {
        for key in ["filePath", "path", "uri"] {
            if props.contains_key(key) {
                return Some(key.to_string());
            }
        }
    }
    for key in ["command", "text", "input", "content"] {
        if props.contains_key(key) {
            return Some(key.to_string());
        }
    }
    None
}

const ALIAS_GROUPS: &[(&str, &[&str])] = &[
    ("filePath", &["path", "filepath", "file_path", "file", "filename", "uri"]),
    ("oldString", &["old", "from", "pattern", "search", "oldText"]),
    ("newString", &["new", "to", "replacement", "replace", "newText"]),
    ("replaceAll", &["all", "global"]),
    ("content", &["text", "data", "body", "contents"]),
];

/// Rename aliased keys toward the name the schema defines. When the
/// schema defines an alias instead of the canonical name, the mapping
/// also runs in reverse (`filePath` provided, `path` expected).
fn normalize_aliases(args: &mut Map<String, Value>, parameters: &Value) {
    let Some(props) = schema_properties(parameters) else {
        return;
    };
    for (canonical, aliases) in ALIAS_GROUPS {
        if props.contains_key(*canonical) && !args.contains_key(*canonical) {
            for alias in *aliases {
                if let Some(v) = args.remove(*alias) {
                    args.insert(canonical.to_string(), v);
                    break;
                }
            }
        } else if !props.contains_key(*canonical) {
            if let Some(v) = args.remove(*canonical) {
                let target = aliases
                    .iter()
                    .find(|alias| props.contains_key(**alias) && !args.contains_key(**alias));
                match target {
                    Some(alias) => {
                        args.insert(alias.to_string(), v);
                    }
                    None => {
                        args.insert(canonical.to_string(), v);
                    }
                }
            }
        }
    }
}

/// Repair arguments against a tool's parameter schema. Returns the
/// repaired arguments or a rejection message. Repairing already-valid
/// arguments is a no-op.
pub fn repair_arguments(parameters: &Value, arguments: Value) -> Result<Value, String> {
    let expects_object = parameters
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t == "object")
        .unwrap_or(true);

    let mut value = arguments;
    if expects_object {
        if let Value::String(raw) = &value {
            // a JSON string may itself be JSON text for the object
            match serde_json::from_str::<Value>(raw) {
                Ok(parsed) if parsed.is_object() => value = parsed,
                _ => match single_wrap_key(parameters, raw) {
                    Some(key) => {
                        let mut obj = Map::new();
                        obj.insert(key, Value::String(raw.clone()));
                        value = Value::Object(obj);
                    }
                    None => return Err("arguments type mismatch".to_string()),
                },
            }
        }
    }

    if let Value::Object(obj) = &mut value {
        normalize_aliases(obj, parameters);
        if let Some(props) = schema_properties(parameters) {
            for (key, prop) in props {
                let Some(v) = obj.get(key) else { continue };
                let Some(expected) = prop.get("type").and_then(Value::as_str) else {
                    continue;
                };
                if !type_matches(expected, v) {
                    return Err(format!("field type mismatch: {}", key));
                }
            }
        }
    }
    Ok(value)
}

pub fn type_matches(expected: &str, v: &Value) -> bool {
    match expected {
        "string" => v.is_string(),
        "integer" => v.is_i64() || v.is_u64(),
        "number" => v.is_number(),
        "boolean" => v.is_boolean(),
        "object" => v.is_object(),
        "array" => v.is_array(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" },
            },
            "required": ["filePath"],
        })
    }

    #[test]
    fn valid_arguments_pass_through_unchanged() {
        let args = json!({ "filePath": "src/main.rs", "offset": 2 });
        let repaired = repair_arguments(&read_schema(), args.clone()).unwrap();
        assert_eq!(repaired, args);
    }

    #[test]
    fn repair_is_idempotent() {
        let args = json!({ "filePath": "src/main.rs" });
        let once = repair_arguments(&read_schema(), args).unwrap();
        let twice = repair_arguments(&read_schema(), once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn json_string_is_reinterpreted_as_object() {
        let args = json!(r#"{"filePath": "a.txt"}"#);
        let repaired = repair_arguments(&read_schema(), args).unwrap();
        assert_eq!(repaired, json!({ "filePath": "a.txt" }));
    }

    #[test]
    fn bare_string_wraps_under_single_required_key() {
        let repaired = repair_arguments(&read_schema(), json!("notes.txt")).unwrap();
        assert_eq!(repaired, json!({ "filePath": "notes.txt" }));
    }

    #[test]
    fn path_like_string_prefers_path_property() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "limit": { "type": "integer" },
            },
            "required": ["filePath", "limit"],
        });
        let repaired = repair_arguments(&schema, json!("./src/lib.rs")).unwrap();
        assert_eq!(repaired, json!({ "filePath": "./src/lib.rs" }));
    }

    #[test]
    fn fallback_wrap_keys_in_order() {
        let schema = json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout": { "type": "integer" },
            },
            "required": ["command", "timeout"],
        });
        let repaired = repair_arguments(&schema, json!("ls -la")).unwrap();
        assert_eq!(repaired, json!({ "command": "ls -la" }));
    }

    #[test]
    fn aliases_normalize_toward_schema() {
        let args = json!({ "path": "a.txt", "old": "x", "new": "y", "global": true });
        let schema = json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "oldString": { "type": "string" },
                "newString": { "type": "string" },
                "replaceAll": { "type": "boolean" },
            },
            "required": ["filePath", "oldString", "newString"],
        });
        let repaired = repair_arguments(&schema, args).unwrap();
        assert_eq!(
            repaired,
            json!({ "filePath": "a.txt", "oldString": "x", "newString": "y", "replaceAll": true })
        );
    }

    #[test]
    fn reverse_alias_when_schema_wants_path() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        });
        let repaired = repair_arguments(&schema, json!({ "filePath": "a.txt" })).unwrap();
        assert_eq!(repaired, json!({ "path": "a.txt" }));
    }

    #[test]
    fn no_primitive_coercion() {
        let err = repair_arguments(&read_schema(), json!({ "filePath": "a", "offset": "3" }))
            .unwrap_err();
        assert_eq!(err, "field type mismatch: offset");
    }

    #[test]
    fn content_alias_group() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "content": { "type": "string" },
            },
            "required": ["filePath", "content"],
        });
        let repaired =
            repair_arguments(&schema, json!({ "file": "a.txt", "text": "hello" })).unwrap();
        assert_eq!(repaired, json!({ "filePath": "a.txt", "content": "hello" }));
    }
}
