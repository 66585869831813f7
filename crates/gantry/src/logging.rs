//! Log sanitation helpers: credentials never reach the log stream, and
//! tool payloads are truncated to keep lines readable.

use serde_json::Value;

const REDACTED_KEYS: &[&str] = &["api_key", "api-key", "apiKey", "authorization", "x-api-key"];

pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...(truncated)";
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= SUFFIX.len() {
        return SUFFIX.chars().take(max_chars).collect();
    }
    let mut out: String = s.chars().take(max_chars - SUFFIX.len()).collect();
    out.push_str(SUFFIX);
    out
}

pub fn sanitize_json_for_log(body: &Value) -> String {
    let mut v = body.clone();
    if let Some(obj) = v.as_object_mut() {
        for key in REDACTED_KEYS {
            obj.remove(*key);
        }
        if let Some(headers) = obj.get_mut("headers").and_then(Value::as_object_mut) {
            let keys: Vec<String> = headers
                .keys()
                .filter(|k| {
                    let k = k.to_ascii_lowercase();
                    k.contains("authorization") || k.contains("api-key") || k.contains("api_key")
                })
                .cloned()
                .collect();
            for k in keys {
                headers.remove(&k);
            }
        }
    }
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncation_appends_marker() {
        let s = "x".repeat(50);
        let t = truncate_for_log(&s, 20);
        assert!(t.ends_with("...(truncated)"));
        assert_eq!(t.chars().count(), 20);
        assert_eq!(truncate_for_log("short", 20), "short");
    }

    #[test]
    fn api_keys_are_removed() {
        let body = json!({
            "model": "m",
            "api_key": "secret",
            "headers": { "Authorization": "Bearer x", "accept": "json" },
        });
        let s = sanitize_json_for_log(&body);
        assert!(!s.contains("secret"));
        assert!(!s.contains("Bearer"));
        assert!(s.contains("accept"));
    }
}
