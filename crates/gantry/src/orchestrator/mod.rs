//! Server-side tool-use orchestration: the direct loop and the
//! two-phase planner, shared by the non-streaming and streaming paths.
//!
//! Both algorithms drive a provider through `ChatBackend`, parse each
//! assistant turn for tool calls, repair and dispatch arguments through
//! the registry, and feed `TOOL_RESULT` messages back until the model
//! produces a final answer or a budget runs out.

pub mod fake;
pub mod grammar;
pub mod stream;

use crate::config::StreamGuards;
use crate::parser::{parse_json_loose, parse_tool_calls};
use crate::providers::{ChatRequest, Provider, ProviderError};
use crate::request_scope;
use crate::session::ChatMessage;
use crate::tools::repair::{repair_arguments, type_matches};
use crate::tools::{ToolCall, ToolRegistry, ToolResult, ToolSchema};
use indoc::indoc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use stream::{await_task, AwaitOutcome, StreamEvents};

pub use fake::{fake_model_once, is_fake_model, FAKE_MODEL};

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub max_steps: usize,
    pub max_tool_calls: usize,
    pub planner: bool,
    pub max_plan_steps: usize,
    pub max_plan_rewrites: usize,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_steps: 6,
            max_tool_calls: 16,
            planner: false,
            max_plan_steps: 6,
            max_plan_rewrites: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub final_text: String,
    pub executed_calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
    pub steps: usize,
    pub plan_steps: usize,
    pub plan_rewrites: usize,
    pub hit_step_limit: bool,
    pub hit_tool_limit: bool,
    pub used_planner: bool,
    pub planner_failed: bool,
    pub plan: Value,
    /// Upstream failure before any final text was produced.
    pub provider_error: Option<String>,
    /// Client hung up mid-stream; writes stopped, persistence skipped.
    pub aborted: bool,
}

impl LoopState {
    pub fn trace_json(&self) -> Value {
        json!({
            "steps": self.steps,
            "hit_step_limit": self.hit_step_limit,
            "hit_tool_limit": self.hit_tool_limit,
            "used_planner": self.used_planner,
            "planner_failed": self.planner_failed,
            "plan_steps": self.plan_steps,
            "plan_rewrites": self.plan_rewrites,
            "plan": if self.plan.is_null() { json!([]) } else { self.plan.clone() },
            "tool_calls": self.executed_calls.iter().map(|c| json!({
                "id": c.id, "name": c.name, "arguments": c.arguments_json,
            })).collect::<Vec<_>>(),
            "tool_results": self.results.iter().map(|r| json!({
                "tool_call_id": r.tool_call_id, "name": r.name, "ok": r.ok, "result": r.result,
            })).collect::<Vec<_>>(),
        })
    }
}

/// One resolved model target the loop generates against.
#[derive(Clone)]
pub struct ChatBackend {
    pub provider: Option<Arc<dyn Provider>>,
    pub model: String,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub min_p: Option<f64>,
    pub grammar: Option<String>,
}

impl ChatBackend {
    pub fn fake() -> Self {
        Self {
            provider: None,
            model: FAKE_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            min_p: None,
            grammar: None,
        }
    }

    pub fn for_provider(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            min_p: None,
            grammar: None,
        }
    }

    pub fn request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            min_p: self.min_p,
            grammar: self.grammar.clone(),
        }
    }

    pub async fn chat_once_text(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        if is_fake_model(&self.model) {
            return Ok(fake_model_once(&messages));
        }
        let Some(provider) = &self.provider else {
            return Err(ProviderError::Execution("no provider bound".to_string()));
        };
        let resp = provider.chat_once(&self.request(messages)).await?;
        Ok(resp.content)
    }
}

// ---------------------------------------------------------------------------
// prompts and plan handling

fn tool_spec_json(tools: &[ToolSchema]) -> Value {
    json!({
        "tools": tools.iter().map(|t| json!({
            "name": t.name,
            "description": t.description,
            "parameters": t.parameters,
        })).collect::<Vec<_>>(),
    })
}

pub fn build_tool_system_prompt(tools: &[ToolSchema]) -> String {
    let header = indoc! {r#"
        You are a tool-using assistant.
        If you need to call tools, respond ONLY with a single JSON object:
        {"tool_calls":[{"id":"call_1","name":"tool_name","arguments":{...}}]}
        If you can answer without tools, respond ONLY with:
        {"final":"..."}
        Never include any extra text outside the JSON.
        Available tools spec:
    "#};
    format!("{}{}", header, tool_spec_json(tools))
}

pub fn build_planner_system_prompt(tools: &[ToolSchema], max_plan_steps: usize) -> String {
    let header = indoc! {r#"
        You are a planner.
        Return ONLY a single JSON object and no extra text.
        If tools are needed, output:
        {"plan":[{"name":"tool_name","arguments":{...}}]}
    "#};
    format!(
        "{}The plan length MUST be <= {}.\nIf no tools are needed, output:\n{{\"final\":\"...\"}}\nAvailable tools spec:\n{}",
        header,
        max_plan_steps,
        tool_spec_json(tools)
    )
}

pub const PLANNER_FINAL_PROMPT: &str = indoc! {r#"
    You are a tool result summarizer.
    You have been given TOOL_RESULT messages.
    Return ONLY a single JSON object and no extra text:
    {"final":"..."}
"#};

pub fn extract_final(text: &str) -> Option<String> {
    let v = parse_json_loose(text)?;
    v.get("final")?.as_str().map(str::to_string)
}

#[derive(Debug, Clone)]
struct PlanStep {
    name: String,
    arguments: Value,
}

fn parse_plan(text: &str) -> Option<Vec<PlanStep>> {
    let v = parse_json_loose(text)?;
    let plan = v.get("plan")?.as_array()?;
    let mut out = Vec::new();
    for step in plan {
        let Some(name) = step.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let arguments = step
            .get("arguments")
            .filter(|a| a.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        out.push(PlanStep {
            name: name.to_string(),
            arguments,
        });
    }
    Some(out)
}

/// Shallow validation against a parameter schema: top-level `type`,
/// `required`, and per-property types only.
pub fn validate_schema_loose(schema: &Value, args: &Value) -> Result<(), String> {
    if !schema.is_object() {
        return Ok(());
    }
    if let Some(t) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(t, args) {
            return Err("arguments type mismatch".to_string());
        }
    }
    if let (Some(required), Some(obj)) = (
        schema.get("required").and_then(Value::as_array),
        args.as_object(),
    ) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(format!("missing required field: {}", key));
            }
        }
    }
    if let (Some(props), Some(obj)) = (
        schema.get("properties").and_then(Value::as_object),
        args.as_object(),
    ) {
        for (key, prop) in props {
            let Some(v) = obj.get(key) else { continue };
            if let Some(t) = prop.get("type").and_then(Value::as_str) {
                if !type_matches(t, v) {
                    return Err(format!("field type mismatch: {}", key));
                }
            }
        }
    }
    Ok(())
}

fn tool_result_message(result: &ToolResult) -> ChatMessage {
    ChatMessage::new(
        "user",
        format!("TOOL_RESULT {} {}", result.name, result.result),
    )
}

// ---------------------------------------------------------------------------
// the loop driver

enum ModelStep {
    Text(String),
    TimedOut,
    Error(String),
}

enum CallStep {
    Done(ToolResult),
    TimedOut(ToolResult),
}

pub struct ToolLoopRun<'a> {
    pub backend: ChatBackend,
    pub registry: &'a ToolRegistry,
    pub messages: Vec<ChatMessage>,
    pub allowed_tools: Vec<ToolSchema>,
    pub opts: LoopOptions,
    pub guards: StreamGuards,
}

impl ToolLoopRun<'_> {
    fn allowed_names(&self) -> HashSet<String> {
        self.allowed_tools.iter().map(|t| t.name.clone()).collect()
    }

    /// Tools shown to the model: the allow-set, or every registered
    /// tool when the allow-set is empty (empty means "all").
    async fn prompt_tools(&self) -> Vec<ToolSchema> {
        if self.allowed_tools.is_empty() {
            self.registry.list_schemas().await
        } else {
            self.allowed_tools.clone()
        }
    }

    async fn prepared_backend(&self) -> ChatBackend {
        let mut backend = self.backend.clone();
        if let Some(provider) = &backend.provider {
            if provider.name() == crate::providers::llama_cpp::PROVIDER_NAME {
                let names: Vec<String> = self
                    .prompt_tools()
                    .await
                    .iter()
                    .map(|t| t.name.clone())
                    .collect();
                backend.grammar = Some(grammar::tool_loop_grammar(&names));
            }
        }
        backend
    }

    async fn model_step(
        &self,
        backend: &ChatBackend,
        messages: Vec<ChatMessage>,
        events: &mut dyn StreamEvents,
    ) -> ModelStep {
        let backend = backend.clone();
        let auth = request_scope::current_auth_headers();
        let handle = tokio::spawn(request_scope::with_auth_headers(auth, async move {
            backend.chat_once_text(messages).await
        }));
        match await_task(
            events,
            handle,
            Duration::from_secs(self.guards.model_timeout_s),
        )
        .await
        {
            AwaitOutcome::Done(Ok(text)) => ModelStep::Text(text),
            AwaitOutcome::Done(Err(e)) => ModelStep::Error(e.to_string()),
            AwaitOutcome::TimedOut => ModelStep::TimedOut,
            AwaitOutcome::Failed => ModelStep::Error("model task failed".to_string()),
        }
    }

    async fn invoke_handler(
        &self,
        call: &ToolCall,
        arguments: Value,
        events: &mut dyn StreamEvents,
    ) -> CallStep {
        let Some(handler) = self.registry.get_handler(&call.name).await else {
            return CallStep::Done(ToolResult::failure(&call.id, &call.name, "tool not found"));
        };
        let auth = request_scope::current_auth_headers();
        let id = call.id.clone();
        let handle = tokio::spawn(request_scope::with_auth_headers(auth, async move {
            handler(id, arguments).await
        }));
        match await_task(
            events,
            handle,
            Duration::from_secs(self.guards.tool_timeout_s),
        )
        .await
        {
            AwaitOutcome::Done(r) => CallStep::Done(r),
            AwaitOutcome::TimedOut => CallStep::TimedOut(ToolResult::failure(
                &call.id,
                &call.name,
                "tool execution timed out",
            )),
            AwaitOutcome::Failed => {
                CallStep::Done(ToolResult::failure(&call.id, &call.name, "tool task failed"))
            }
        }
    }

    /// Run one parsed call through the allow/exists/repair gates and its
    /// handler, emitting call and result events.
    async fn execute_call(
        &self,
        index: usize,
        call: &ToolCall,
        allowed_names: &HashSet<String>,
        events: &mut dyn StreamEvents,
        aborted: &mut bool,
        timed_out: &mut bool,
    ) -> ToolResult {
        if !events.tool_call(index, call).await {
            *aborted = true;
        }
        let result = if !allowed_names.is_empty() && !allowed_names.contains(&call.name) {
            ToolResult::failure(&call.id, &call.name, "tool not allowed")
        } else if !self.registry.has_tool(&call.name).await {
            ToolResult::failure(&call.id, &call.name, "tool not found")
        } else {
            match parse_json_loose(&call.arguments_json) {
                None => ToolResult::failure(&call.id, &call.name, "invalid tool arguments json"),
                Some(raw_args) => {
                    let schema = self.registry.get_schema(&call.name).await;
                    let parameters = schema.map(|s| s.parameters).unwrap_or(Value::Null);
                    match repair_arguments(&parameters, raw_args) {
                        Err(e) => ToolResult::failure(&call.id, &call.name, e),
                        Ok(arguments) => match self.invoke_handler(call, arguments, events).await {
                            CallStep::Done(r) => r,
                            CallStep::TimedOut(r) => {
                                *timed_out = true;
                                r
                            }
                        },
                    }
                }
            }
        };
        tracing::info!(
            id = %result.tool_call_id,
            name = %result.name,
            ok = result.ok,
            "tool call executed"
        );
        if !events.tool_result(&result).await {
            *aborted = true;
        }
        result
    }

    pub async fn run(&self, events: &mut dyn StreamEvents) -> LoopState {
        let backend = self.prepared_backend().await;
        if self.opts.planner {
            let state = self.run_planner(&backend, events).await;
            if !state.planner_failed {
                return state;
            }
            return self.run_direct(&backend, events).await;
        }
        self.run_direct(&backend, events).await
    }

    pub async fn run_direct(
        &self,
        backend: &ChatBackend,
        events: &mut dyn StreamEvents,
    ) -> LoopState {
        let mut out = LoopState::default();
        let allowed_names = self.allowed_names();
        let prompt_tools = self.prompt_tools().await;

        let mut msgs = Vec::with_capacity(self.messages.len() + 8);
        if !prompt_tools.is_empty() {
            msgs.push(ChatMessage::new(
                "system",
                build_tool_system_prompt(&prompt_tools),
            ));
        }
        msgs.extend(self.messages.iter().cloned());

        let max_steps = self.opts.max_steps.max(1);
        let mut tool_calls_used = 0usize;

        for step in 0..max_steps {
            out.steps = step + 1;
            let text = match self.model_step(backend, msgs.clone(), events).await {
                ModelStep::Text(t) => t,
                ModelStep::TimedOut => {
                    out.final_text = "model generation timed out".to_string();
                    return out;
                }
                ModelStep::Error(e) => {
                    out.provider_error = Some(e);
                    return out;
                }
            };

            if let Some(calls) = parse_tool_calls(&text) {
                let mut aborted = false;
                let mut timed_out = false;
                for call in calls {
                    if tool_calls_used >= self.opts.max_tool_calls {
                        out.hit_tool_limit = true;
                        out.final_text = "tool call limit exceeded".to_string();
                        return out;
                    }
                    let index = out.executed_calls.len();
                    let result = self
                        .execute_call(index, &call, &allowed_names, events, &mut aborted, &mut timed_out)
                        .await;
                    tool_calls_used += 1;
                    msgs.push(tool_result_message(&result));
                    out.executed_calls.push(call);
                    out.results.push(result);
                    if timed_out {
                        out.final_text = "tool execution timed out".to_string();
                        return out;
                    }
                    if aborted {
                        out.aborted = true;
                        return out;
                    }
                }
                continue;
            }

            if let Some(final_text) = extract_final(&text) {
                out.final_text = final_text;
                return out;
            }
            out.final_text = text;
            return out;
        }

        out.hit_step_limit = true;
        out.final_text = "tool loop exceeded max steps".to_string();
        out
    }

    pub async fn run_planner(
        &self,
        backend: &ChatBackend,
        events: &mut dyn StreamEvents,
    ) -> LoopState {
        let mut out = LoopState {
            used_planner: true,
            ..Default::default()
        };
        let allowed_names = self.allowed_names();
        let prompt_tools = self.prompt_tools().await;
        let max_plan_steps = self.opts.max_plan_steps.max(1);

        let mut plan_msgs = Vec::with_capacity(self.messages.len() + 2);
        plan_msgs.push(ChatMessage::new(
            "system",
            build_planner_system_prompt(&prompt_tools, max_plan_steps),
        ));
        plan_msgs.extend(self.messages.iter().cloned());

        let mut plan: Option<Vec<PlanStep>> = None;
        let mut plan_text = String::new();
        let mut rewrites = 0usize;
        for attempt in 0..=self.opts.max_plan_rewrites {
            plan_text = match self.model_step(backend, plan_msgs.clone(), events).await {
                ModelStep::Text(t) => t,
                ModelStep::TimedOut => {
                    out.planner_failed = true;
                    return out;
                }
                ModelStep::Error(e) => {
                    out.provider_error = Some(e);
                    out.planner_failed = true;
                    return out;
                }
            };
            if let Some(final_text) = extract_final(&plan_text) {
                out.final_text = final_text;
                out.steps = 1;
                return out;
            }
            let Some(candidate) = parse_plan(&plan_text) else {
                if attempt == self.opts.max_plan_rewrites {
                    out.planner_failed = true;
                    out.final_text = plan_text;
                    out.steps = 1;
                    return out;
                }
                plan_msgs.push(ChatMessage::new(
                    "user",
                    "Plan invalid JSON. Return a corrected plan JSON only.",
                ));
                continue;
            };

            let mut rejection = None;
            for step in &candidate {
                if !allowed_names.is_empty() && !allowed_names.contains(&step.name) {
                    rejection = Some(format!("tool not allowed: {}", step.name));
                    break;
                }
                let Some(schema) = self.registry.get_schema(&step.name).await else {
                    rejection = Some(format!("tool not found: {}", step.name));
                    break;
                };
                if let Err(e) = validate_schema_loose(&schema.parameters, &step.arguments) {
                    rejection = Some(format!("invalid arguments for {}: {}", step.name, e));
                    break;
                }
            }
            match rejection {
                None => {
                    plan = Some(candidate);
                    break;
                }
                Some(why) => {
                    if attempt == self.opts.max_plan_rewrites {
                        out.planner_failed = true;
                        out.final_text = why;
                        out.steps = 1;
                        return out;
                    }
                    plan_msgs.push(ChatMessage::new(
                        "user",
                        format!("Plan rejected: {}. Return a corrected plan JSON only.", why),
                    ));
                    rewrites = attempt + 1;
                }
            }
        }

        let Some(mut plan) = plan else {
            out.planner_failed = true;
            out.final_text = plan_text;
            out.steps = 1;
            return out;
        };
        plan.truncate(max_plan_steps);
        out.plan_steps = plan.len();
        out.plan_rewrites = rewrites;
        out.plan = Value::Array(
            plan.iter()
                .map(|s| json!({ "name": s.name, "arguments": s.arguments }))
                .collect(),
        );

        let mut exec_msgs = self.messages.clone();
        let mut tool_calls_used = 0usize;
        for (i, step) in plan.iter().enumerate() {
            if tool_calls_used >= self.opts.max_tool_calls {
                out.hit_tool_limit = true;
                out.final_text = "tool call limit exceeded".to_string();
                out.steps = i + 1;
                return out;
            }
            let call = ToolCall {
                id: format!("plan_{}", i + 1),
                name: step.name.clone(),
                arguments_json: step.arguments.to_string(),
            };
            let mut aborted = false;
            let mut timed_out = false;
            let result = self
                .execute_call(i, &call, &allowed_names, events, &mut aborted, &mut timed_out)
                .await;
            tool_calls_used += 1;
            exec_msgs.push(tool_result_message(&result));
            out.executed_calls.push(call);
            out.results.push(result);
            if timed_out {
                out.final_text = "tool execution timed out".to_string();
                out.steps = 2;
                return out;
            }
            if aborted {
                out.aborted = true;
                out.steps = 2;
                return out;
            }
        }

        let mut final_msgs = Vec::with_capacity(exec_msgs.len() + 1);
        final_msgs.push(ChatMessage::new("system", PLANNER_FINAL_PROMPT));
        final_msgs.extend(exec_msgs);
        out.steps = 2;
        match self.model_step(backend, final_msgs, events).await {
            ModelStep::Text(text) => {
                out.final_text = extract_final(&text).unwrap_or(text);
            }
            ModelStep::TimedOut => {
                out.final_text = "model generation timed out".to_string();
            }
            ModelStep::Error(e) => {
                out.provider_error = Some(e);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{ChatResponse, DeltaSender, ModelInfo};
    use crate::tools::builtin::register_default_tools;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use stream::NullEvents;

    /// Provider that replays a queue of scripted responses.
    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
            Ok(vec![])
        }
        async fn embeddings(&self, _: &str, _: &str) -> Result<Vec<f64>, ProviderError> {
            Err(ProviderError::NotImplemented("embeddings".into()))
        }
        async fn chat_once(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| r#"{"final":"script exhausted"}"#.to_string());
            Ok(ChatResponse {
                model: req.model.clone(),
                content,
                done: true,
                finish_reason: "stop".into(),
            })
        }
        async fn chat_stream(
            &self,
            req: &ChatRequest,
            deltas: DeltaSender,
        ) -> Result<String, ProviderError> {
            crate::providers::base::stream_via_chat_once(self, req, deltas).await
        }
    }

    async fn default_registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        register_default_tools(&registry, "").await;
        registry
    }

    fn run_for<'a>(registry: &'a ToolRegistry, backend: ChatBackend, user: &str) -> ToolLoopRun<'a> {
        ToolLoopRun {
            backend,
            registry,
            messages: vec![ChatMessage::new("user", user)],
            allowed_tools: vec![],
            opts: LoopOptions::default(),
            guards: StreamGuards::default(),
        }
    }

    #[tokio::test]
    async fn direct_loop_executes_and_finishes() {
        let registry = default_registry().await;
        let run = run_for(&registry, ChatBackend::fake(), "please runtime.echo hello");
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.executed_calls.len(), 1);
        assert_eq!(state.executed_calls[0].name, "runtime.echo");
        assert!(state.results[0].ok);
        assert!(state.final_text.contains("TOOL_RESULT"));
        assert_eq!(state.steps, 2);
        assert!(!state.hit_step_limit && !state.hit_tool_limit);
    }

    #[tokio::test]
    async fn tool_budget_is_enforced() {
        let registry = default_registry().await;
        let mut run = run_for(&registry, ChatBackend::fake(), "add the numbers");
        run.opts.max_tool_calls = 0;
        let state = run.run(&mut NullEvents).await;
        assert!(state.hit_tool_limit);
        assert_eq!(state.final_text, "tool call limit exceeded");
        assert!(state.executed_calls.len() <= run.opts.max_tool_calls);
    }

    #[tokio::test]
    async fn step_budget_is_enforced() {
        let registry = default_registry().await;
        let mut run = run_for(&registry, ChatBackend::fake(), "add the numbers");
        run.opts.max_steps = 1;
        let state = run.run(&mut NullEvents).await;
        assert!(state.hit_step_limit);
        assert_eq!(state.final_text, "tool loop exceeded max steps");
        assert_eq!(state.steps, 1);
    }

    #[tokio::test]
    async fn disallowed_tool_yields_failure_result() {
        let registry = default_registry().await;
        let mut run = run_for(&registry, ChatBackend::fake(), "use forbidden.tool now");
        run.allowed_tools = vec![registry.get_schema("runtime.echo").await.unwrap()];
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.results[0].error, "tool not allowed");
        assert!(!state.results[0].ok);
    }

    #[tokio::test]
    async fn unknown_tool_yields_not_found() {
        let registry = ToolRegistry::new();
        let run = run_for(&registry, ChatBackend::fake(), "please runtime.echo hello");
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.results[0].error, "tool not found");
    }

    #[tokio::test]
    async fn string_arguments_are_repaired_before_dispatch() {
        let registry = default_registry().await;
        let provider = ScriptedProvider::new(vec![
            r#"{"tool_calls":[{"id":"c1","name":"runtime.echo","arguments":"hello"}]}"#,
            r#"{"final":"ok"}"#,
        ]);
        let backend = ChatBackend::for_provider(provider, "scripted-model");
        let run = run_for(&registry, backend, "echo something");
        let state = run.run(&mut NullEvents).await;
        assert!(state.results[0].ok, "repair should wrap the bare string");
        assert_eq!(state.results[0].result["text"], json!("hello"));
        assert_eq!(state.final_text, "ok");
    }

    #[tokio::test]
    async fn type_mismatch_is_rejected_not_coerced() {
        let registry = default_registry().await;
        let provider = ScriptedProvider::new(vec![
            r#"{"tool_calls":[{"id":"c1","name":"read","arguments":{"filePath":"a","offset":"2"}}]}"#,
            r#"{"final":"ok"}"#,
        ]);
        let backend = ChatBackend::for_provider(provider, "scripted-model");
        let run = run_for(&registry, backend, "read a file");
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.results[0].error, "field type mismatch: offset");
    }

    #[tokio::test]
    async fn raw_text_without_calls_or_final_is_returned() {
        let registry = default_registry().await;
        let provider = ScriptedProvider::new(vec!["just a plain answer"]);
        let backend = ChatBackend::for_provider(provider, "scripted-model");
        let run = run_for(&registry, backend, "hi");
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.final_text, "just a plain answer");
        assert!(state.executed_calls.is_empty());
    }

    #[tokio::test]
    async fn planner_executes_plan_then_summarizes() {
        let registry = default_registry().await;
        let mut run = run_for(&registry, ChatBackend::fake(), "runtime.echo please");
        run.opts.planner = true;
        let state = run.run(&mut NullEvents).await;
        assert!(state.used_planner);
        assert!(!state.planner_failed);
        assert_eq!(state.plan_steps, 1);
        assert_eq!(state.executed_calls[0].id, "plan_1");
        assert_eq!(state.steps, 2);
        assert!(state.final_text.contains("TOOL_RESULT"));
    }

    #[tokio::test]
    async fn planner_rejects_bad_plan_then_falls_back() {
        let registry = default_registry().await;
        let mut run = run_for(&registry, ChatBackend::fake(), "bad_args request");
        run.opts.planner = true;
        let state = run.run(&mut NullEvents).await;
        // the planner keeps producing a type-mismatched plan, so the
        // direct loop takes over and completes with runtime.add
        assert!(!state.used_planner);
        assert_eq!(state.final_text, "2 + 3 = 5");
    }

    #[tokio::test]
    async fn planner_rewrite_accepts_corrected_plan() {
        let registry = default_registry().await;
        let provider = ScriptedProvider::new(vec![
            r#"{"plan":[{"name":"runtime.add","arguments":{"a":"x","b":2}}]}"#,
            r#"{"plan":[{"name":"runtime.add","arguments":{"a":1,"b":2}}]}"#,
            r#"{"final":"sum computed"}"#,
        ]);
        let backend = ChatBackend::for_provider(provider, "scripted-model");
        let mut run = run_for(&registry, backend, "add");
        run.opts.planner = true;
        let state = run.run(&mut NullEvents).await;
        assert!(!state.planner_failed);
        assert_eq!(state.plan_rewrites, 1);
        assert_eq!(state.final_text, "sum computed");
        assert!(state.results[0].ok);
    }

    #[tokio::test]
    async fn planner_final_short_circuits() {
        let registry = default_registry().await;
        let provider = ScriptedProvider::new(vec![r#"{"final":"no tools needed"}"#]);
        let backend = ChatBackend::for_provider(provider, "scripted-model");
        let mut run = run_for(&registry, backend, "hi");
        run.opts.planner = true;
        let state = run.run(&mut NullEvents).await;
        assert_eq!(state.final_text, "no tools needed");
        assert_eq!(state.steps, 1);
        assert_eq!(state.plan_steps, 0);
    }

    #[tokio::test]
    async fn trace_json_shape() {
        let registry = default_registry().await;
        let run = run_for(&registry, ChatBackend::fake(), "please runtime.echo hello");
        let state = run.run(&mut NullEvents).await;
        let trace = state.trace_json();
        assert_eq!(trace["steps"], json!(2));
        assert_eq!(trace["tool_calls"][0]["name"], json!("runtime.echo"));
        assert_eq!(trace["tool_results"][0]["ok"], json!(true));
    }
}
