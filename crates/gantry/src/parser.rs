//! Recover structured tool calls from free-form assistant text.
//!
//! Strategies run in order; the first that yields a non-empty list wins:
//! strict/loose JSON, balanced embedded object, `<tool_call>` tagged
//! blocks, `todowrite key=value` command text, and bare `cat <path>`
//! commands. Every produced call carries valid JSON in
//! `arguments_json`, never raw free text.

use crate::new_id;
use crate::tools::ToolCall;
use serde_json::{json, Map, Value};

/// Parse text as JSON, falling back to the first balanced `{...}`
/// substring when the whole text does not parse.
pub fn parse_json_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    let obj = extract_first_json_object(trimmed)?;
    serde_json::from_str(&obj).ok()
}

fn extract_first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    extract_balanced(text.as_bytes(), start).map(|s| String::from_utf8_lossy(&s).into_owned())
}

fn extract_balanced(bytes: &[u8], start: usize) -> Option<Vec<u8>> {
    let open = *bytes.get(start)?;
    let close = match open {
        b'{' => b'}',
        b'[' => b']',
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &c) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if c == b'\\' {
                escape = true;
            } else if c == b'"' {
                in_string = false;
            }
            continue;
        }
        match c {
            b'"' => in_string = true,
            _ if c == open => depth += 1,
            _ if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[start..=i].to_vec());
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// strategy 1/2: JSON shapes

fn arguments_to_json(a: &Value) -> String {
    match a {
        Value::String(s) => {
            if parse_json_loose(s).is_some() {
                s.clone()
            } else {
                Value::String(s.clone()).to_string()
            }
        }
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

fn make_call(item: &Value) -> Option<ToolCall> {
    let obj = item.as_object()?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| new_id("call"));

    let mut name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    for alt in ["tool", "toolName"] {
        if name.is_empty() {
            if let Some(n) = obj.get(alt).and_then(Value::as_str) {
                name = n.to_string();
            }
        }
    }
    if name.is_empty() {
        if let Some(n) = obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
        {
            name = n.to_string();
        }
    }

    let args = ["arguments", "args", "input"]
        .iter()
        .find_map(|k| obj.get(*k))
        .or_else(|| obj.get("function").and_then(|f| f.get("arguments")))?;

    if name.is_empty() {
        return None;
    }
    let mut arguments_json = arguments_to_json(args);
    if arguments_json.is_empty() {
        arguments_json = "{}".to_string();
    }
    Some(ToolCall {
        id,
        name,
        arguments_json,
    })
}

fn extract_from_json(original: &Value) -> Option<Vec<ToolCall>> {
    let mut root = original.as_object()?;
    if let Some(inner) = root.get("opencode").and_then(Value::as_object) {
        root = inner;
    }

    for key in ["tool_call", "toolCall", "toolcall"] {
        if let Some(item) = root.get(key).filter(|v| v.is_object()) {
            if let Some(call) = make_call(item) {
                return Some(vec![call]);
            }
        }
    }

    if let Some(call) = make_call(&Value::Object(root.clone())) {
        return Some(vec![call]);
    }

    let array = ["tool_calls", "toolCalls", "toolcalls"]
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_array))?;
    let calls: Vec<ToolCall> = array.iter().filter_map(make_call).collect();
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

// ---------------------------------------------------------------------------
// strategy 3: tagged text

fn is_tool_name_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.' | b':' | b'/')
}

fn find_sub(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn find_name_attr(tag: &[u8], tag_lower: &[u8]) -> Option<String> {
    let p = find_sub(tag_lower, b"name", 0)?;
    let mut i = p + 4;
    while i < tag.len() && tag[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= tag.len() || tag[i] != b'=' {
        return None;
    }
    i += 1;
    while i < tag.len() && tag[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= tag.len() {
        return None;
    }
    if tag[i] == b'"' || tag[i] == b'\'' {
        let quote = tag[i];
        i += 1;
        let end = tag[i..].iter().position(|&c| c == quote)? + i;
        return Some(lossy(&tag[i..end]).trim().to_string());
    }
    let start = i;
    while i < tag.len() && !tag[i].is_ascii_whitespace() && tag[i] != b'>' {
        i += 1;
    }
    (i > start).then(|| lossy(&tag[start..i]).trim().to_string())
}

fn clean_cat_path(raw: &str) -> String {
    let mut path = raw.trim().to_string();
    if let Some(lt) = path.find('<') {
        path.truncate(lt);
        path = path.trim().to_string();
    }
    if let Some(rest) = path.strip_prefix('`') {
        path = rest.trim().to_string();
    }
    while path.ends_with('`') || path.ends_with(';') || path.ends_with(',') {
        path.pop();
    }
    path.trim().to_string()
}

fn extract_from_tagged_text(text: &str) -> Option<Vec<ToolCall>> {
    let bytes = text.as_bytes();
    let lower_owned = text.to_ascii_lowercase();
    let lower = lower_owned.as_bytes();

    const TOOL_TAG: &[u8] = b"<tool_call";
    const TOOL_TAG2: &[u8] = b"<toolcall";
    const ARG_TAG: &[u8] = b"<arg_value>";
    const ARG_END: &[u8] = b"</arg_value>";
    const ARG_KEY_END: &[u8] = b"</arg_key>";

    let mut calls = Vec::new();
    let mut pos = 0usize;
    while pos < lower.len() {
        let start = match (find_sub(lower, TOOL_TAG, pos), find_sub(lower, TOOL_TAG2, pos)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => break,
        };
        let Some(tag_close) = find_sub(lower, b">", start) else {
            break;
        };

        let tag = &bytes[start..=tag_close];
        let tag_lower = &lower[start..=tag_close];
        let mut name = find_name_attr(tag, tag_lower).unwrap_or_default();
        let mut after_name = tag_close + 1;
        if name.is_empty() {
            let mut i = tag_close + 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let name_start = i;
            while i < bytes.len() && is_tool_name_byte(bytes[i]) {
                i += 1;
            }
            name = lossy(&bytes[name_start..i]).trim().to_string();
            after_name = i;
        }
        if name.is_empty() {
            pos = tag_close + 1;
            continue;
        }

        let block_start = tag_close + 1;
        let next_tool = match (
            find_sub(lower, TOOL_TAG, block_start),
            find_sub(lower, TOOL_TAG2, block_start),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let block_end = next_tool.unwrap_or(bytes.len());

        let mut args_text = String::new();
        if let Some(astart) = find_sub(lower, ARG_TAG, after_name).filter(|p| *p < block_end) {
            let astart = astart + ARG_TAG.len();
            let aend = find_sub(lower, ARG_END, astart)
                .filter(|p| *p <= block_end)
                .unwrap_or(block_end);
            args_text = lossy(&bytes[astart..aend]).trim().to_string();
        } else if let Some(close) = find_sub(lower, ARG_END, after_name).filter(|p| *p < block_end)
        {
            let mut raw_start = after_name;
            if let Some(key_close) = find_sub(lower, ARG_KEY_END, after_name).filter(|p| *p < close)
            {
                raw_start = key_close + ARG_KEY_END.len();
            }
            if raw_start <= close {
                args_text = lossy(&bytes[raw_start..close]).trim().to_string();
            }
            if args_text.is_empty() {
                let raw2 = close + ARG_END.len();
                if raw2 < block_end {
                    args_text = lossy(&bytes[raw2..block_end]).trim().to_string();
                }
            }
        } else {
            args_text = lossy(&bytes[after_name..block_end]).trim().to_string();
        }

        if !args_text.is_empty() {
            if let Some(first) = extract_first_json_object(&args_text) {
                args_text = first.trim().to_string();
            }
        }

        let mut call = ToolCall {
            id: new_id("call"),
            name: name.clone(),
            arguments_json: "{}".to_string(),
        };
        if !args_text.is_empty() {
            match parse_json_loose(&args_text) {
                Some(v) => call.arguments_json = v.to_string(),
                None => {
                    let mut raw = args_text.trim().to_string();
                    if let Some(lt) = raw.find('<') {
                        raw.truncate(lt);
                        raw = raw.trim().to_string();
                    }
                    if !raw.is_empty() && name == "cat" {
                        let raw_lower = raw.to_ascii_lowercase();
                        if raw_lower.starts_with("cat") {
                            raw = raw[3..].trim_start().to_string();
                        }
                        raw = clean_cat_path(&raw);
                    }
                    call.arguments_json = Value::String(raw).to_string();
                }
            }
        }
        if call.name == "cat" {
            call.name = "read".to_string();
        }
        calls.push(call);

        pos = block_end;
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

// ---------------------------------------------------------------------------
// strategy 4: todowrite command text

fn extract_from_command_text(text: &str) -> Option<Vec<ToolCall>> {
    let bytes = text.as_bytes();
    let lower_owned = text.to_ascii_lowercase();
    let lower = lower_owned.as_bytes();
    const TOOL: &[u8] = b"todowrite";

    let mut calls: Vec<ToolCall> = Vec::new();
    let mut pos = 0usize;
    while pos < lower.len() {
        let Some(start) = find_sub(lower, TOOL, pos) else {
            break;
        };
        let left_ok = start == 0
            || lower[start - 1].is_ascii_whitespace()
            || lower[start - 1] == b'`';
        let after = start + TOOL.len();
        let right_ok = after >= lower.len()
            || lower[after].is_ascii_whitespace()
            || lower[after] == b':'
            || lower[after] == b'(';
        if !left_ok || !right_ok {
            pos = after;
            continue;
        }
        if !calls.is_empty() {
            pos = after;
            continue;
        }

        let mut args_start = after;
        if args_start < bytes.len() && bytes[args_start] == b':' {
            args_start += 1;
        }

        let mut args = Map::new();
        let mut p = args_start;
        'fields: while p < bytes.len() {
            while p < bytes.len()
                && (bytes[p].is_ascii_whitespace() || bytes[p] == b',' || bytes[p] == b';')
            {
                p += 1;
            }
            if p >= bytes.len() {
                break;
            }
            if bytes[p] == b'{' {
                if let Some(obj) = extract_balanced(bytes, p) {
                    if let Ok(parsed @ Value::Object(_)) = serde_json::from_slice::<Value>(&obj) {
                        calls.push(ToolCall {
                            id: new_id("call"),
                            name: "todowrite".to_string(),
                            arguments_json: parsed.to_string(),
                        });
                    }
                }
                break 'fields;
            }

            let key_start = p;
            while p < bytes.len() && (bytes[p].is_ascii_alphanumeric() || bytes[p] == b'_') {
                p += 1;
            }
            if p <= key_start {
                break;
            }
            let key = lossy(&bytes[key_start..p]);

            while p < bytes.len() && bytes[p].is_ascii_whitespace() {
                p += 1;
            }
            if p >= bytes.len() || bytes[p] != b'=' {
                break;
            }
            p += 1;
            while p < bytes.len() && bytes[p].is_ascii_whitespace() {
                p += 1;
            }
            if p >= bytes.len() {
                break;
            }

            let raw_value: String;
            if bytes[p] == b'"' || bytes[p] == b'\'' {
                let quote = bytes[p];
                p += 1;
                let vstart = p;
                let mut esc = false;
                while p < bytes.len() {
                    let c = bytes[p];
                    if esc {
                        esc = false;
                    } else if c == b'\\' {
                        esc = true;
                    } else if c == quote {
                        break;
                    }
                    p += 1;
                }
                raw_value = lossy(&bytes[vstart..p.min(bytes.len())]);
                if p < bytes.len() && bytes[p] == quote {
                    p += 1;
                }
            } else if bytes[p] == b'{' || bytes[p] == b'[' {
                match extract_balanced(bytes, p) {
                    Some(b) => {
                        raw_value = lossy(&b);
                        p += b.len();
                    }
                    None => break,
                }
            } else {
                let vstart = p;
                while p < bytes.len()
                    && !bytes[p].is_ascii_whitespace()
                    && bytes[p] != b','
                    && bytes[p] != b';'
                {
                    p += 1;
                }
                raw_value = lossy(&bytes[vstart..p]);
            }

            let trimmed = raw_value.trim().to_string();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(&trimmed) {
                    Ok(v) => {
                        args.insert(key, v);
                    }
                    Err(_) => {
                        args.insert(key, Value::String(trimmed));
                    }
                }
            } else {
                args.insert(key, Value::String(trimmed));
            }
        }

        if calls.is_empty() && !args.is_empty() {
            calls.push(ToolCall {
                id: new_id("call"),
                name: "todowrite".to_string(),
                arguments_json: Value::Object(args).to_string(),
            });
        }
        pos = after;
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

// ---------------------------------------------------------------------------
// strategy 5: cat command text

fn extract_from_cat_command(text: &str) -> Option<Vec<ToolCall>> {
    let bytes = text.as_bytes();
    let lower_owned = text.to_ascii_lowercase();
    let lower = lower_owned.as_bytes();
    const CMD: &[u8] = b"cat";

    let mut calls = Vec::new();
    let mut pos = 0usize;
    while pos < lower.len() {
        let Some(start) = find_sub(lower, CMD, pos) else {
            break;
        };
        let left_ok = start == 0
            || lower[start - 1].is_ascii_whitespace()
            || lower[start - 1] == b'`'
            || lower[start - 1] == b':';
        let after = start + CMD.len();
        let right_ok =
            after >= lower.len() || lower[after].is_ascii_whitespace() || lower[after] == b'`';
        if !left_ok || !right_ok {
            pos = after;
            continue;
        }

        let mut p = after;
        while p < bytes.len() && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        if p >= bytes.len() {
            pos = after;
            continue;
        }

        let raw_path: String;
        if bytes[p] == b'"' || bytes[p] == b'\'' {
            let quote = bytes[p];
            p += 1;
            let vstart = p;
            let mut esc = false;
            while p < bytes.len() {
                let c = bytes[p];
                if esc {
                    esc = false;
                } else if c == b'\\' {
                    esc = true;
                } else if c == quote {
                    break;
                }
                p += 1;
            }
            raw_path = lossy(&bytes[vstart..p.min(bytes.len())]);
        } else {
            let vstart = p;
            while p < bytes.len()
                && !bytes[p].is_ascii_whitespace()
                && bytes[p] != b';'
                && bytes[p] != b','
                && bytes[p] != b'<'
                && bytes[p] != b'`'
            {
                p += 1;
            }
            raw_path = lossy(&bytes[vstart..p]);
        }

        let path = clean_cat_path(&raw_path);
        if !path.is_empty() {
            calls.push(ToolCall {
                id: new_id("call"),
                name: "read".to_string(),
                arguments_json: json!({ "filePath": path }).to_string(),
            });
        }
        pos = after;
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

// ---------------------------------------------------------------------------

pub fn parse_tool_calls(assistant_text: &str) -> Option<Vec<ToolCall>> {
    if let Some(j) = parse_json_loose(assistant_text) {
        if let Some(calls) = extract_from_json(&j) {
            return Some(calls);
        }
    }
    if let Some(calls) = extract_from_tagged_text(assistant_text) {
        return Some(calls);
    }
    if let Some(calls) = extract_from_command_text(assistant_text) {
        return Some(calls);
    }
    extract_from_cat_command(assistant_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(call: &ToolCall) -> Value {
        serde_json::from_str(&call.arguments_json).unwrap()
    }

    #[test]
    fn round_trip_tool_calls_array() {
        let text = r#"{"tool_calls":[{"id":"x","name":"t","arguments":{"k":1}}]}"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "x");
        assert_eq!(calls[0].name, "t");
        assert_eq!(args_of(&calls[0]), json!({ "k": 1 }));
    }

    #[test]
    fn every_call_has_valid_arguments_json() {
        let samples = [
            r#"{"tool_calls":[{"name":"a","arguments":"raw text"}]}"#,
            r#"{"name":"b","arguments":null}"#,
            "<tool_call name=\"read\">not json</tool_call>",
            "run `cat src/main.rs` please",
        ];
        for text in samples {
            let calls = parse_tool_calls(text).unwrap();
            assert!(!calls.is_empty());
            for call in calls {
                assert!(!call.name.is_empty());
                assert!(serde_json::from_str::<Value>(&call.arguments_json).is_ok());
            }
        }
    }

    #[test]
    fn non_tool_text_yields_none() {
        assert!(parse_tool_calls("just a plain answer with no calls").is_none());
        assert!(parse_tool_calls("").is_none());
        assert!(parse_tool_calls(r#"{"final":"done"}"#).is_none());
    }

    #[test]
    fn bare_name_arguments_object() {
        let calls = parse_tool_calls(r#"{"name":"runtime.add","arguments":{"a":1,"b":2}}"#).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "runtime.add");
        assert!(calls[0].id.starts_with("call-"));
    }

    #[test]
    fn opencode_wrapper_unwraps() {
        let text = r#"{"opencode":{"tool_calls":[{"name":"read","arguments":{"filePath":"a"}}]}}"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "read");
    }

    #[test]
    fn singleton_keys() {
        for key in ["tool_call", "toolCall", "toolcall"] {
            let text = format!(r#"{{"{}":{{"name":"glob","input":{{"pattern":"*.rs"}}}}}}"#, key);
            let calls = parse_tool_calls(&text).unwrap();
            assert_eq!(calls[0].name, "glob");
            assert_eq!(args_of(&calls[0]), json!({ "pattern": "*.rs" }));
        }
    }

    #[test]
    fn function_shape_and_string_arguments() {
        let text = r#"{"tool_calls":[{"id":"c1","type":"function","function":{"name":"read","arguments":"{\"filePath\":\"x\"}"}}]}"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "read");
        assert_eq!(args_of(&calls[0]), json!({ "filePath": "x" }));
    }

    #[test]
    fn non_json_string_arguments_become_quoted() {
        let calls = parse_tool_calls(r#"{"name":"echo","arguments":"hello there"}"#).unwrap();
        assert_eq!(args_of(&calls[0]), json!("hello there"));
    }

    #[test]
    fn embedded_object_in_prose() {
        let text = r#"Sure, I'll call a tool: {"tool_calls":[{"name":"list","arguments":{}}]} hope that helps"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "list");
    }

    #[test]
    fn tagged_with_name_attribute_and_json_args() {
        let text = r#"<tool_call name="grep"><arg_value>{"pattern":"fn main"}</arg_value></tool_call>"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "grep");
        assert_eq!(args_of(&calls[0]), json!({ "pattern": "fn main" }));
    }

    #[test]
    fn tagged_with_leading_identifier() {
        let text = "<toolcall> runtime.time </toolcall>";
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "runtime.time");
    }

    #[test]
    fn tagged_cat_becomes_read() {
        let text = "<tool_call>cat src/lib.rs</tool_call>";
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "read");
    }

    #[test]
    fn multiple_tagged_blocks() {
        let text = r#"<tool_call name="a">{"x":1}<tool_call name="b">{"y":2}"#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn todowrite_assignments() {
        let text = r#"todowrite: title="ship parser", status="pending""#;
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "todowrite");
        let args = args_of(&calls[0]);
        assert_eq!(args["title"], json!("ship parser"));
        assert_eq!(args["status"], json!("pending"));
    }

    #[test]
    fn todowrite_with_json_list_value() {
        let text = r#"todowrite items=[{"text":"a"},{"text":"b"}]"#;
        let calls = parse_tool_calls(text).unwrap();
        let args = args_of(&calls[0]);
        assert_eq!(args["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn cat_in_backticks() {
        let calls = parse_tool_calls("please run `cat README.md` now").unwrap();
        assert_eq!(calls[0].name, "read");
        assert_eq!(args_of(&calls[0]), json!({ "filePath": "README.md" }));
    }

    #[test]
    fn bare_cat_with_quoted_path() {
        let calls = parse_tool_calls("cat \"dir with space/file.txt\"").unwrap();
        assert_eq!(args_of(&calls[0])["filePath"], json!("dir with space/file.txt"));
    }

    #[test]
    fn cat_inside_longer_word_is_not_a_command() {
        assert!(parse_tool_calls("the category of concatenation").is_none());
    }

    #[test]
    fn loose_json_recovers_fenced_output() {
        let text = "```json\n{\"tool_calls\":[{\"name\":\"read\",\"arguments\":{\"filePath\":\"a\"}}]}\n```";
        let calls = parse_tool_calls(text).unwrap();
        assert_eq!(calls[0].name, "read");
    }
}
