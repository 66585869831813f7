//! The `fake-tool` scripted model: deterministic responses keyed on the
//! conversation so the loop, the planner, and the HTTP surface can be
//! exercised end to end without an inference backend.

use crate::session::ChatMessage;
use serde_json::json;

pub const FAKE_MODEL: &str = "fake-tool";

fn quoted_final(text: &str) -> String {
    json!({ "final": text }).to_string()
}

pub fn fake_model_once(messages: &[ChatMessage]) -> String {
    let mut last_user = String::new();
    let mut last_system = String::new();
    let mut has_tool_result = false;
    let mut any_user_bad_args = false;
    for m in messages {
        match m.role.as_str() {
            "user" => {
                if m.content.contains("TOOL_RESULT") {
                    has_tool_result = true;
                }
                if m.content.contains("bad_args") {
                    any_user_bad_args = true;
                }
                last_user = m.content.clone();
            }
            "system" => last_system = m.content.clone(),
            _ => {}
        }
    }

    if last_system.contains("You are a planner.") {
        if any_user_bad_args {
            return json!({
                "plan": [{ "name": "runtime.add", "arguments": { "a": "x", "b": 2 } }]
            })
            .to_string();
        }
        if last_user.contains("ide.read_file") || last_user.contains("read") {
            return json!({
                "plan": [{ "name": "read", "arguments": { "filePath": "demo.txt" } }]
            })
            .to_string();
        }
        if last_user.contains("runtime.echo") {
            return json!({
                "plan": [{ "name": "runtime.echo", "arguments": { "text": "hello" } }]
            })
            .to_string();
        }
        return json!({
            "plan": [{ "name": "runtime.add", "arguments": { "a": 2, "b": 3 } }]
        })
        .to_string();
    }

    if last_system.contains("tool result summarizer") {
        if last_user.contains("TOOL_RESULT") {
            return quoted_final(&last_user);
        }
        return json!({ "final": "done" }).to_string();
    }

    if !has_tool_result {
        if last_user.contains("mcp2.mcp.echo") {
            return json!({
                "tool_calls": [{ "id": "call_1", "name": "mcp2.mcp.echo", "arguments": { "text": "hello2" } }]
            })
            .to_string();
        }
        if last_user.contains("mcp.echo") {
            return json!({
                "tool_calls": [{ "id": "call_1", "name": "mcp.echo", "arguments": { "text": "hello" } }]
            })
            .to_string();
        }
        if last_user.contains("ide.read_file") || last_user.contains("read") {
            return json!({
                "tool_calls": [{ "id": "call_1", "name": "read", "arguments": { "filePath": "demo.txt" } }]
            })
            .to_string();
        }
        if last_user.contains("runtime.echo") {
            return json!({
                "tool_calls": [{ "id": "call_1", "name": "runtime.echo", "arguments": { "text": "hello" } }]
            })
            .to_string();
        }
        if last_user.contains("forbidden.tool") {
            return json!({
                "tool_calls": [{ "id": "call_1", "name": "forbidden.tool", "arguments": {} }]
            })
            .to_string();
        }
        return json!({
            "tool_calls": [{ "id": "call_1", "name": "runtime.add", "arguments": { "a": 2, "b": 3 } }]
        })
        .to_string();
    }

    let recognized = ["mcp.echo", "mcp2.mcp.echo", "read", "runtime.echo", "ide."];
    if recognized.iter().any(|n| last_user.contains(n)) {
        return quoted_final(&last_user);
    }
    json!({ "final": "2 + 3 = 5" }).to_string()
}

pub fn is_fake_model(model: &str) -> bool {
    model == FAKE_MODEL
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn first_turn_emits_tool_calls() {
        let out = fake_model_once(&[ChatMessage::new("user", "please runtime.echo something")]);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["tool_calls"][0]["name"], json!("runtime.echo"));
    }

    #[test]
    fn tool_result_turn_emits_final() {
        let out = fake_model_once(&[
            ChatMessage::new("user", "runtime.echo"),
            ChatMessage::new("user", r#"TOOL_RESULT runtime.echo {"ok":true,"text":"hello"}"#),
        ]);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v["final"].as_str().unwrap().contains("TOOL_RESULT"));
    }

    #[test]
    fn planner_system_prompt_yields_plan() {
        let out = fake_model_once(&[
            ChatMessage::new("system", "You are a planner.\n..."),
            ChatMessage::new("user", "read the demo file"),
        ]);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["plan"][0]["name"], json!("read"));
    }

    #[test]
    fn summarizer_prompt_yields_final() {
        let out = fake_model_once(&[
            ChatMessage::new("system", "You are a tool result summarizer.\n..."),
            ChatMessage::new("user", r#"TOOL_RESULT read {"ok":true}"#),
        ]);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v["final"].is_string());
    }
}
