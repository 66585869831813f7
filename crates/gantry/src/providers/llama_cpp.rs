//! In-process GGUF runner on candle's quantized llama family.
//!
//! The provider owns a model index (id → .gguf path) built by scanning a
//! root directory, a lazily loaded model guarded by one mutex (all
//! generation is effectively sequential), a metadata-override retry
//! chain for known-broken GGUF metadata, and a one-shot CPU fallback
//! when the backend reports CUDA memory exhaustion.

use super::base::{ChatRequest, ChatResponse, DeltaSender, ModelInfo, Provider};
use super::errors::ProviderError;
use crate::config::parse_bool;
use crate::session::ChatMessage;
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

pub const PROVIDER_NAME: &str = "llama_cpp";

const DEFAULT_MAX_NEW_TOKENS: i64 = 2048;
const DEFAULT_PENALTY_LAST_N: usize = 64;
const DEFAULT_REPEAT_PENALTY: f32 = 1.1;
const DEFAULT_SEED: u64 = 299792458;

// ---------------------------------------------------------------------------
// backend log ring

static BACKEND_LOG: Lazy<StdMutex<VecDeque<String>>> = Lazy::new(|| StdMutex::new(VecDeque::new()));

fn log_backend_line(line: impl Into<String>) {
    let line = line.into();
    tracing::debug!(target: "gantry::llama_cpp", "{}", line);
    if let Ok(mut ring) = BACKEND_LOG.lock() {
        ring.push_back(line);
        while ring.len() > 200 {
            ring.pop_front();
        }
    }
}

fn recent_logs_contain(needle: &str) -> bool {
    BACKEND_LOG
        .lock()
        .map(|ring| ring.iter().rev().any(|l| l.contains(needle)))
        .unwrap_or(false)
}

fn last_log_containing(needle: &str) -> Option<String> {
    BACKEND_LOG.lock().ok().and_then(|ring| {
        ring.iter()
            .rev()
            .find(|l| l.contains(needle))
            .map(|l| l.trim().to_string())
    })
}

// ---------------------------------------------------------------------------
// env knobs

#[derive(Debug, Clone, Default)]
struct LlamaKnobs {
    n_gpu_layers: i64,
    n_ctx: Option<usize>,
    max_new_tokens: Option<i64>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    seed: Option<u64>,
    penalty_last_n: Option<usize>,
    repeat_penalty: Option<f32>,
    unload_after_chat: bool,
}

/// llama.cpp context/batch knobs the candle backend has no control for.
/// They stay part of the accepted configuration surface; setting one is
/// reported once per load so operators are not silently ignored.
const INERT_KNOBS: &[&str] = &[
    "LLAMA_CPP_N_BATCH",
    "LLAMA_CPP_N_UBATCH",
    "LLAMA_CPP_N_THREADS",
    "LLAMA_CPP_N_THREADS_BATCH",
    "LLAMA_CPP_SPLIT_MODE",
    "LLAMA_CPP_MAIN_GPU",
    "LLAMA_CPP_OFFLOAD_KQV",
    "LLAMA_CPP_FLASH_ATTN",
];

fn log_inert_knobs() {
    for name in INERT_KNOBS {
        if env_trimmed(name).is_some() {
            log_backend_line(format!("{} set but has no effect on this backend", name));
        }
    }
}

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LlamaKnobs {
    fn from_env() -> Self {
        let mut k = LlamaKnobs::default();
        k.n_gpu_layers = env_trimmed("LLAMA_CPP_N_GPU_LAYERS")
            .or_else(|| env_trimmed("LLAMA_CPP_GPU_LAYERS"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        k.n_ctx = env_trimmed("LLAMA_CPP_N_CTX")
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0);
        k.max_new_tokens = env_trimmed("LLAMA_CPP_MAX_NEW_TOKENS")
            .or_else(|| env_trimmed("LLAMA_CPP_MAX_TOKENS"))
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0);
        k.temperature = env_trimmed("LLAMA_CPP_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .filter(|v| *v >= 0.0);
        k.top_p = env_trimmed("LLAMA_CPP_TOP_P")
            .and_then(|v| v.parse().ok())
            .filter(|v| *v >= 0.0 && *v <= 1.0);
        k.seed = env_trimmed("LLAMA_CPP_SEED").and_then(|v| v.parse().ok());
        k.penalty_last_n = env_trimmed("LLAMA_CPP_PENALTY_LAST_N").and_then(|v| v.parse().ok());
        k.repeat_penalty = env_trimmed("LLAMA_CPP_REPEAT_PENALTY")
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0.0);
        k.unload_after_chat = env_trimmed("LLAMA_CPP_UNLOAD_AFTER_CHAT")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        k
    }
}

// ---------------------------------------------------------------------------
// chat templates

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    Llama3,
    ChatMl,
    Mistral,
    Plain,
}

fn template_for_model(model_id: &str) -> ChatTemplate {
    let id = model_id.to_ascii_lowercase();
    if id.contains("llama") {
        ChatTemplate::Llama3
    } else if id.contains("qwen") || id.contains("glm") || id.contains("hermes") {
        ChatTemplate::ChatMl
    } else if id.contains("mistral") {
        ChatTemplate::Mistral
    } else {
        ChatTemplate::Plain
    }
}

fn format_llama3(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for m in messages {
        prompt.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            m.role, m.content
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

fn format_chatml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for m in messages {
        prompt.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", m.role, m.content));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_mistral(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    let mut pending_system = String::new();
    for m in messages {
        match m.role.as_str() {
            "system" => {
                pending_system.push_str(&m.content);
                pending_system.push_str("\n\n");
            }
            "assistant" => {
                prompt.push(' ');
                prompt.push_str(&m.content);
                prompt.push_str("</s>");
            }
            _ => {
                prompt.push_str("[INST] ");
                if !pending_system.is_empty() {
                    prompt.push_str(&std::mem::take(&mut pending_system));
                }
                prompt.push_str(&m.content);
                prompt.push_str(" [/INST]");
            }
        }
    }
    prompt
}

fn format_plain(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for m in messages {
        prompt.push_str(&m.role.to_ascii_uppercase());
        prompt.push_str(": ");
        prompt.push_str(&m.content);
        prompt.push('\n');
    }
    prompt.push_str("ASSISTANT: ");
    prompt
}

fn build_prompt(template: ChatTemplate, messages: &[ChatMessage]) -> String {
    match template {
        ChatTemplate::Llama3 => format_llama3(messages),
        ChatTemplate::ChatMl => format_chatml(messages),
        ChatTemplate::Mistral => format_mistral(messages),
        ChatTemplate::Plain => format_plain(messages),
    }
}

fn eos_strings(template: ChatTemplate) -> &'static [&'static str] {
    match template {
        ChatTemplate::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
        ChatTemplate::ChatMl => &["<|im_end|>"],
        ChatTemplate::Mistral => &["</s>"],
        ChatTemplate::Plain => &[],
    }
}

// ---------------------------------------------------------------------------
// model index

fn is_first_shard(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.contains("-00001-of-"))
        .unwrap_or(false)
}

fn prefer_model_file(candidate: &Path, current: &Path) -> bool {
    let c1 = is_first_shard(candidate);
    let c2 = is_first_shard(current);
    if c1 != c2 {
        return c1;
    }
    candidate.file_name() < current.file_name()
}

fn basename_no_ext(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn build_model_index(root: &str) -> (BTreeMap<String, PathBuf>, bool) {
    let mut index = BTreeMap::new();
    if root.is_empty() {
        return (index, false);
    }
    let root_path = PathBuf::from(root);
    if root_path.is_dir() {
        let mut stack = vec![root_path.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let is_gguf = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("gguf"))
                    .unwrap_or(false);
                if !is_gguf {
                    continue;
                }
                let rel_dir = path
                    .parent()
                    .and_then(|p| p.strip_prefix(&root_path).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                let id = if rel_dir.is_empty() {
                    let dir_name = basename_no_ext(&root_path);
                    if dir_name.is_empty() {
                        basename_no_ext(&path)
                    } else {
                        dir_name
                    }
                } else {
                    rel_dir
                };
                if id.is_empty() {
                    continue;
                }
                match index.get(&id) {
                    Some(current) if !prefer_model_file(&path, current) => {}
                    _ => {
                        index.insert(id, path);
                    }
                }
            }
        }
        (index, true)
    } else if root_path.is_file() {
        let id = basename_no_ext(&root_path);
        if !id.is_empty() {
            index.insert(id, root_path);
        }
        (index, false)
    } else {
        (index, false)
    }
}

// ---------------------------------------------------------------------------
// loaded model

struct LoadedModel {
    weights: quantized_llama::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: Option<u32>,
    path: PathBuf,
}

/// Metadata keys known to be broken in circulating GGUF exports, forced
/// before retrying a failed load. Which overrides fire is decided by
/// substrings observed in the backend log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MetadataOverrides {
    force_yarn: bool,
    force_glm4_pre: bool,
}

impl MetadataOverrides {
    fn apply(&self, content: &mut gguf_file::Content) {
        if self.force_yarn {
            content.metadata.insert(
                "deepseek2.rope.scaling.yarn_log_multiplier".to_string(),
                gguf_file::Value::F32(0.0),
            );
        }
        if self.force_glm4_pre {
            content.metadata.insert(
                "tokenizer.ggml.pre".to_string(),
                gguf_file::Value::String("chatglm-bpe".to_string()),
            );
        }
    }
}

fn tokenizer_path_for(model_path: &Path) -> PathBuf {
    model_path
        .parent()
        .map(|p| p.join("tokenizer.json"))
        .unwrap_or_else(|| PathBuf::from("tokenizer.json"))
}

fn pick_device(knobs: &LlamaKnobs) -> Device {
    if knobs.n_gpu_layers != 0 {
        if let Ok(d) = Device::new_cuda(0) {
            log_backend_line("using CUDA device 0");
            return d;
        }
        if let Ok(d) = Device::new_metal(0) {
            log_backend_line("using Metal device 0");
            return d;
        }
        log_backend_line("gpu offload requested but no accelerator available, using CPU");
    }
    Device::Cpu
}

fn load_once(
    model_path: &Path,
    device: &Device,
    overrides: MetadataOverrides,
) -> Result<(quantized_llama::ModelWeights, Option<u32>), String> {
    let mut file = std::fs::File::open(model_path)
        .map_err(|e| format!("failed to open model file: {}", e))?;
    let mut content =
        gguf_file::Content::read(&mut file).map_err(|e| format!("failed to read gguf: {}", e))?;
    overrides.apply(&mut content);
    let eos_token_id = content
        .metadata
        .get("tokenizer.ggml.eos_token_id")
        .and_then(|v| v.to_u32().ok());
    let weights = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)
        .map_err(|e| e.to_string())?;
    Ok((weights, eos_token_id))
}

fn load_model(model_path: &Path, knobs: &LlamaKnobs) -> Result<LoadedModel, ProviderError> {
    if !model_path.exists() {
        return Err(ProviderError::Execution(
            "llama_cpp: model file not found".to_string(),
        ));
    }
    log_inert_knobs();
    let mut device = pick_device(knobs);
    let mut overrides = MetadataOverrides::default();
    let mut cpu_fallback_done = false;
    let mut last_error = String::new();

    for _attempt in 0..4 {
        match load_once(model_path, &device, overrides) {
            Ok((weights, eos_token_id)) => {
                let tokenizer_path = tokenizer_path_for(model_path);
                let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
                    ProviderError::Execution(format!(
                        "llama_cpp: failed to load tokenizer at {}: {}",
                        tokenizer_path.display(),
                        e
                    ))
                })?;
                log_backend_line(format!("model loaded: {}", model_path.display()));
                return Ok(LoadedModel {
                    weights,
                    tokenizer,
                    device,
                    eos_token_id,
                    path: model_path.to_path_buf(),
                });
            }
            Err(e) => {
                log_backend_line(e.clone());
                last_error = e;
            }
        }

        let next = MetadataOverrides {
            force_yarn: overrides.force_yarn
                || recent_logs_contain("deepseek2.rope.scaling.yarn_log_multiplier"),
            force_glm4_pre: overrides.force_glm4_pre
                || recent_logs_contain("unknown pre-tokenizer type: 'glm4'")
                || (recent_logs_contain("unknown pre-tokenizer type")
                    && recent_logs_contain("glm4")),
        };
        if next != overrides {
            overrides = next;
            continue;
        }

        let cuda_oom = recent_logs_contain("out of memory")
            || recent_logs_contain("cudaMalloc failed")
            || recent_logs_contain("CUDA_ERROR_OUT_OF_MEMORY");
        if cuda_oom && knobs.n_gpu_layers != 0 && !cpu_fallback_done {
            log_backend_line("cuda oom, falling back to cpu");
            device = Device::Cpu;
            cpu_fallback_done = true;
            continue;
        }
        break;
    }

    let root = last_log_containing("failed to read gguf")
        .or_else(|| last_log_containing("error"))
        .unwrap_or(last_error);
    Err(ProviderError::Execution(format!(
        "llama_cpp: failed to load model: {}",
        root
    )))
}

// ---------------------------------------------------------------------------
// provider

pub struct LlamaCppProvider {
    model_root: String,
    index: StdMutex<(BTreeMap<String, PathBuf>, bool)>,
    loaded: Mutex<Option<LoadedModel>>,
}

impl LlamaCppProvider {
    pub fn new(model_root: impl Into<String>) -> Self {
        let mut model_root = model_root.into();
        if model_root.is_empty() && Path::new("models").is_dir() {
            model_root = "models".to_string();
        }
        let index = build_model_index(&model_root);
        Self {
            model_root,
            index: StdMutex::new(index),
            loaded: Mutex::new(None),
        }
    }

    fn resolve_model_path(&self, requested: &str) -> Result<PathBuf, ProviderError> {
        let guard = self
            .index
            .lock()
            .map_err(|_| ProviderError::Execution("llama_cpp: index poisoned".into()))?;
        let (index, root_is_dir) = &*guard;
        if index.is_empty() {
            return Err(ProviderError::Execution(
                "llama_cpp: missing model path".to_string(),
            ));
        }
        if requested == "any" && index.len() == 1 {
            return Ok(index.values().next().unwrap().clone());
        }
        if !*root_is_dir {
            let (only_id, only_path) = index.iter().next().unwrap();
            if !requested.is_empty() && requested != only_id {
                return Err(ProviderError::UnknownModel(requested.to_string()));
            }
            return Ok(only_path.clone());
        }
        index
            .get(requested)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownModel(requested.to_string()))
    }

    async fn generate(
        &self,
        req: &ChatRequest,
        deltas: Option<&DeltaSender>,
    ) -> Result<(String, String), ProviderError> {
        let knobs = LlamaKnobs::from_env();
        let model_path = self.resolve_model_path(&req.model)?;

        let mut guard = self.loaded.lock().await;
        let reload = match guard.as_ref() {
            Some(loaded) => loaded.path != model_path,
            None => true,
        };
        if reload {
            *guard = None;
            *guard = Some(load_model(&model_path, &knobs)?);
        }
        let loaded = guard.as_mut().expect("model loaded above");

        let template = template_for_model(&req.model);
        let prompt = build_prompt(template, &req.messages);

        let mut prompt_tokens: Vec<u32> = loaded
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(|e| ProviderError::Execution(format!("llama_cpp: tokenize failed: {}", e)))?
            .get_ids()
            .to_vec();
        if prompt_tokens.is_empty() {
            return Err(ProviderError::Execution(
                "llama_cpp: tokenize failed".to_string(),
            ));
        }

        let n_ctx = knobs.n_ctx.unwrap_or(4096);
        let mut max_new_tokens = knobs.max_new_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS);
        if let Some(req_max) = req.max_tokens.filter(|v| *v > 0) {
            max_new_tokens = req_max;
        }

        // drop the oldest prompt tokens so the generation budget fits
        let reserve = (max_new_tokens.max(0) as usize).min(n_ctx.saturating_sub(1));
        let keep = (n_ctx - reserve).max(1);
        if prompt_tokens.len() > keep {
            let drop = prompt_tokens.len() - keep;
            prompt_tokens.drain(..drop);
        }
        let avail = n_ctx.saturating_sub(prompt_tokens.len());
        let max_new_tokens = (max_new_tokens.max(0) as usize).min(avail);

        let temperature = req.temperature.or(knobs.temperature).unwrap_or(0.0);
        let top_p = req.top_p.or(knobs.top_p).unwrap_or(0.0);
        let seed = knobs.seed.unwrap_or(DEFAULT_SEED);
        let penalty_last_n = knobs.penalty_last_n.unwrap_or(DEFAULT_PENALTY_LAST_N);
        let repeat_penalty = knobs.repeat_penalty.unwrap_or(DEFAULT_REPEAT_PENALTY);

        let mut sampler = if temperature > 0.0 {
            let top_p = (top_p > 0.0 && top_p < 1.0).then_some(top_p);
            LogitsProcessor::new(seed, Some(temperature), top_p)
        } else {
            LogitsProcessor::new(seed, None, None)
        };

        let exec = |e: candle_core::Error| {
            let msg = format!("llama_cpp: decode failed: {}", e);
            log_backend_line(msg.clone());
            ProviderError::Execution(msg)
        };

        // prefill the whole prompt at position 0; the kv state resets on
        // a position-0 pass, which also clears the previous turn
        let input = Tensor::new(prompt_tokens.as_slice(), &loaded.device)
            .map_err(exec)?
            .unsqueeze(0)
            .map_err(exec)?;
        let logits = loaded.weights.forward(&input, 0).map_err(exec)?;
        let mut logits = logits.squeeze(0).map_err(exec)?;

        let mut all_tokens = prompt_tokens.clone();
        let mut out_acc = String::new();
        let mut finish_reason = "stop".to_string();
        let mut last_tok: Option<u32> = None;
        let mut last_tok_run = 0usize;
        let mut gen_count = 0usize;

        'outer: while gen_count < max_new_tokens {
            let sampled = if repeat_penalty != 1.0 {
                let start = all_tokens.len().saturating_sub(penalty_last_n);
                let penalized = candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    repeat_penalty,
                    &all_tokens[start..],
                )
                .map_err(exec)?;
                sampler.sample(&penalized).map_err(exec)?
            } else {
                sampler.sample(&logits).map_err(exec)?
            };

            if Some(sampled) == loaded.eos_token_id {
                break;
            }
            all_tokens.push(sampled);
            gen_count += 1;

            if last_tok == Some(sampled) {
                last_tok_run += 1;
                if last_tok_run >= 32 {
                    break;
                }
            } else {
                last_tok = Some(sampled);
                last_tok_run = 1;
            }
            // repeated tail window means the model is looping
            let gen = &all_tokens[prompt_tokens.len()..];
            if gen.len() >= 64 {
                for w in [4usize, 8, 16, 32] {
                    if gen.len() >= w * 2 && gen[gen.len() - w..] == gen[gen.len() - 2 * w..gen.len() - w] {
                        break 'outer;
                    }
                }
            }

            let mut piece = loaded
                .tokenizer
                .decode(&[sampled], false)
                .map_err(|e| ProviderError::Execution(format!("llama_cpp: decode failed: {}", e)))?;
            for eos in eos_strings(template) {
                if piece.contains(eos) {
                    piece = piece.replace(eos, "");
                }
            }
            if !piece.is_empty() {
                out_acc.push_str(&piece);
                let role_echo = ["\nUser:", "\nUSER:", "\nAssistant:", "\nASSISTANT:", "USER:", "ASSISTANT:"]
                    .iter()
                    .any(|s| out_acc.ends_with(s));
                if role_echo {
                    break;
                }
                if let Some(tx) = deltas {
                    let _ = tx.send(piece);
                }
            }

            if prompt_tokens.len() + gen_count >= n_ctx {
                finish_reason = "length".to_string();
                break;
            }

            let input = Tensor::new(&[sampled][..], &loaded.device)
                .map_err(exec)?
                .unsqueeze(0)
                .map_err(exec)?;
            let next = loaded
                .weights
                .forward(&input, prompt_tokens.len() + gen_count - 1)
                .map_err(exec)?;
            logits = next.squeeze(0).map_err(exec)?;
        }

        if finish_reason == "stop" && max_new_tokens > 0 && gen_count >= max_new_tokens {
            finish_reason = "length".to_string();
        }
        log_backend_line(format!(
            "finish_reason={} prompt_tokens={} gen_tokens={} n_ctx={}",
            finish_reason,
            prompt_tokens.len(),
            gen_count,
            n_ctx
        ));

        if knobs.unload_after_chat {
            *guard = None;
        }
        Ok((out_acc, finish_reason))
    }
}

#[async_trait]
impl Provider for LlamaCppProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) {
        if let Ok(mut guard) = self.index.lock() {
            if guard.0.is_empty() {
                *guard = build_model_index(&self.model_root);
            }
        }
    }

    async fn stop(&self) {
        let mut guard = self.loaded.lock().await;
        *guard = None;
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let guard = self
            .index
            .lock()
            .map_err(|_| ProviderError::Execution("llama_cpp: index poisoned".into()))?;
        if guard.0.is_empty() {
            return Err(ProviderError::Execution(
                "llama_cpp: missing model path".to_string(),
            ));
        }
        Ok(guard
            .0
            .keys()
            .map(|id| ModelInfo {
                id: id.clone(),
                owned_by: PROVIDER_NAME.to_string(),
            })
            .collect())
    }

    async fn embeddings(&self, _model: &str, _input: &str) -> Result<Vec<f64>, ProviderError> {
        Err(ProviderError::NotImplemented(
            "llama_cpp: embeddings not supported".to_string(),
        ))
    }

    async fn chat_once(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let (mut content, finish_reason) = self.generate(req, None).await?;
        // trim trailing role echoes the stop heuristic let through
        for stop in ["\nUser:", "\nUser", "\nUSER:", "\nUSER"] {
            if let Some(stripped) = content.strip_suffix(stop) {
                content = stripped.trim_end().to_string();
            }
        }
        content = content.trim_end().to_string();
        Ok(ChatResponse {
            model: req.model.clone(),
            content,
            done: true,
            finish_reason,
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        deltas: DeltaSender,
    ) -> Result<String, ProviderError> {
        let (_content, finish_reason) = self.generate(req, Some(&deltas)).await?;
        Ok(finish_reason)
    }
}
