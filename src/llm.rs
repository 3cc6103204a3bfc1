//! Language model adapters.
//!
//! Two model shapes sit behind [`LanguageModel`]: a chat model with native
//! tool calling (retried once on the same provider's text-generation
//! endpoint) and a text-generation-only model. Provider responses are
//! classified into closed unions before any text is extracted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{GenerationMode, ModelConfig, ProviderKind, ResolvedProvider};
use crate::error::{Result, TaskmateError};
use crate::message::{Message, ToolCall};
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// Reply used when a provider answers with nothing but whitespace.
pub const DEFAULT_REPLY: &str = "I'm here to help with your tasks!";

/// Normalized output of one model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn new(content: impl AsRef<str>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: Self::user_facing(content.as_ref()),
            tool_calls,
        }
    }

    /// Trimmed text, or [`DEFAULT_REPLY`] when nothing is left.
    pub fn user_facing(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            DEFAULT_REPLY.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn text(content: impl AsRef<str>) -> Self {
        Self::new(content, Vec::new())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt, tools: &[ToolDefinition]) -> Result<ModelReply>;
}

/// Transport for structured chat calls.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> &str;

    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse>;
}

/// Transport for plain text generation from a flattened prompt.
#[async_trait]
pub trait TextGenerationBackend: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<GenerationResponse>;
}

/// Assistant turn pulled out of a chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// `None` when the value carries neither text nor tool calls.
    fn parse(value: &Value) -> Option<Self> {
        let parsed = match value {
            Value::String(text) => Self {
                text: Some(text.clone()),
                tool_calls: Vec::new(),
            },
            Value::Object(map) => Self {
                text: map
                    .get("content")
                    .and_then(content_text)
                    .or_else(|| map.get("text").and_then(content_text)),
                tool_calls: map.get("tool_calls").map(parse_tool_calls).unwrap_or_default(),
            },
            _ => return None,
        };
        if parsed.text.is_none() && parsed.tool_calls.is_empty() {
            return None;
        }
        Some(parsed)
    }
}

/// Recognized chat response shapes, checked in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    /// `{"choices": [{"message": ...}]}`
    Choices(ChatMessage),
    /// `{"message": ...}`
    Message(ChatMessage),
    /// A body that is just text.
    Bare(String),
    Unrecognized(Value),
}

impl ChatResponse {
    pub fn classify(body: Value) -> Self {
        if let Some(message) = body.pointer("/choices/0/message").and_then(ChatMessage::parse) {
            return ChatResponse::Choices(message);
        }
        if let Some(message) = body.get("message").and_then(ChatMessage::parse) {
            return ChatResponse::Message(message);
        }
        match body {
            Value::String(text) => ChatResponse::Bare(text),
            other => ChatResponse::Unrecognized(other),
        }
    }

    pub fn into_reply(self) -> ModelReply {
        match self {
            ChatResponse::Choices(message) | ChatResponse::Message(message) => {
                ModelReply::new(message.text.unwrap_or_default(), message.tool_calls)
            }
            ChatResponse::Bare(text) => ModelReply::text(text),
            ChatResponse::Unrecognized(body) => ModelReply::text(body.to_string()),
        }
    }
}

/// Recognized text-generation response shapes, checked in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResponse {
    /// `{"generations": [{"text": ...}]}`
    Generations(String),
    /// `{"choices": [{"text": ...}]}`
    Choices(String),
    /// `{"text": ...}`
    Text(String),
    Bare(String),
    Unrecognized(Value),
}

impl GenerationResponse {
    pub fn classify(body: Value) -> Self {
        let text_at = |pointer: &str| body.pointer(pointer).and_then(Value::as_str).map(str::to_string);

        if let Some(text) = text_at("/generations/0/text") {
            return GenerationResponse::Generations(text);
        }
        if let Some(text) = text_at("/choices/0/text") {
            return GenerationResponse::Choices(text);
        }
        if let Some(text) = text_at("/text") {
            return GenerationResponse::Text(text);
        }
        match body {
            Value::String(text) => GenerationResponse::Bare(text),
            other => GenerationResponse::Unrecognized(other),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            GenerationResponse::Generations(text)
            | GenerationResponse::Choices(text)
            | GenerationResponse::Text(text)
            | GenerationResponse::Bare(text) => text,
            GenerationResponse::Unrecognized(body) => body.to_string(),
        }
    }
}

/// Content may be a string or a list of `{"text": ...}` blocks.
fn content_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let joined: String = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

fn parse_tool_calls(value: &Value) -> Vec<ToolCall> {
    let Some(calls) = value.as_array() else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let function = call.get("function").unwrap_or(call);
            let name = function.get("name")?.as_str()?.to_string();
            Some(ToolCall {
                id: call.get("id").and_then(Value::as_str).map(str::to_string),
                name,
                arguments: function
                    .get("arguments")
                    .or_else(|| function.get("parameters"))
                    .cloned()
                    .unwrap_or(Value::Null),
            })
        })
        .collect()
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> TaskmateError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return TaskmateError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    TaskmateError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
        .collect()
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Authenticated JSON-over-HTTP access shared by the provider clients.
#[derive(Clone)]
struct HttpTransport {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    provider: &'static str,
}

impl HttpTransport {
    fn new(resolved: &ResolvedProvider, timeout_secs: u64) -> Result<Self> {
        let provider = resolved.kind.as_str();
        let api_key = resolved.api_key.clone().ok_or_else(|| {
            TaskmateError::LanguageModel(format!("missing {provider} API key in model config"))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|err| TaskmateError::LanguageModel(format!("http client error: {err}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: resolved.base_url.clone(),
            provider,
        })
    }

    /// POST a JSON payload. Bodies that are not JSON come back as a string value.
    async fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = self.provider, %url, "sending provider request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                TaskmateError::LanguageModel(format!("{} request error: {err}", self.provider))
            })?;

        let status = resp.status();
        let raw = resp.text().await.map_err(|err| {
            TaskmateError::LanguageModel(format!("{} response read error: {err}", self.provider))
        })?;
        if !status.is_success() {
            return Err(coalesce_error(status, &raw, self.provider));
        }
        Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }
}

/// Cohere v2 chat and v1 generate.
#[derive(Clone)]
pub struct CohereClient {
    transport: HttpTransport,
    model: String,
    max_tokens: u32,
}

impl CohereClient {
    pub fn new(resolved: &ResolvedProvider, cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(resolved, cfg.timeout_secs)?,
            model: resolved.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for CohereClient {
    fn provider(&self) -> &str {
        "cohere"
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse> {
        let mut payload = json!({
            "model": self.model,
            "messages": to_wire_messages(messages),
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(to_wire_tools(tools));
        }
        let body = self.transport.post("/v2/chat", &payload).await?;
        Ok(ChatResponse::classify(body))
    }
}

#[async_trait]
impl TextGenerationBackend for CohereClient {
    fn provider(&self) -> &str {
        "cohere"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationResponse> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": self.max_tokens,
        });
        let body = self.transport.post("/v1/generate", &payload).await?;
        Ok(GenerationResponse::classify(body))
    }
}

/// OpenAI-compatible chat completions and legacy completions.
#[derive(Clone)]
pub struct OpenAIClient {
    transport: HttpTransport,
    model: String,
    max_tokens: u32,
}

impl OpenAIClient {
    pub fn new(resolved: &ResolvedProvider, cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(resolved, cfg.timeout_secs)?,
            model: resolved.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse> {
        let mut payload = json!({
            "model": self.model,
            "messages": to_wire_messages(messages),
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(to_wire_tools(tools));
            payload["tool_choice"] = json!("auto");
        }
        let body = self.transport.post("/chat/completions", &payload).await?;
        Ok(ChatResponse::classify(body))
    }
}

#[async_trait]
impl TextGenerationBackend for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationResponse> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": self.max_tokens,
        });
        let body = self.transport.post("/completions", &payload).await?;
        Ok(GenerationResponse::classify(body))
    }
}

/// Chat model with native tool calling and an optional single retry through
/// the same provider's text-generation endpoint.
pub struct ChatCompletionModel {
    chat: Arc<dyn ChatBackend>,
    retry: Option<Arc<dyn TextGenerationBackend>>,
}

impl ChatCompletionModel {
    pub fn new(chat: Arc<dyn ChatBackend>) -> Self {
        Self { chat, retry: None }
    }

    pub fn with_completion_retry(mut self, backend: Arc<dyn TextGenerationBackend>) -> Self {
        self.retry = Some(backend);
        self
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    fn name(&self) -> &str {
        self.chat.provider()
    }

    async fn generate(&self, prompt: &Prompt, tools: &[ToolDefinition]) -> Result<ModelReply> {
        let err = match self.chat.chat(&prompt.messages(), tools).await {
            Ok(response) => return Ok(response.into_reply()),
            Err(err) => err,
        };
        let Some(retry) = &self.retry else {
            return Err(err);
        };

        warn!(
            provider = self.chat.provider(),
            error = %err,
            "chat call failed, retrying with text generation"
        );
        let response = retry.generate(&prompt.linear()).await?;
        Ok(ModelReply::text(response.into_text()))
    }
}

/// Text generation only. Tools are never advertised and no tool calls are returned.
pub struct TextGenerationModel {
    backend: Arc<dyn TextGenerationBackend>,
}

impl TextGenerationModel {
    pub fn new(backend: Arc<dyn TextGenerationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl LanguageModel for TextGenerationModel {
    fn name(&self) -> &str {
        self.backend.provider()
    }

    async fn generate(&self, prompt: &Prompt, _tools: &[ToolDefinition]) -> Result<ModelReply> {
        let response = self.backend.generate(&prompt.linear()).await?;
        Ok(ModelReply::text(response.into_text()))
    }
}

/// Build the configured model, or `None` when no usable client can be made.
pub fn build_model(cfg: &ModelConfig) -> Option<Arc<dyn LanguageModel>> {
    let resolved = cfg.resolve();
    let built = match resolved.kind {
        ProviderKind::Cohere => CohereClient::new(&resolved, cfg).map(|c| wire(Arc::new(c), cfg.mode)),
        ProviderKind::OpenAi => OpenAIClient::new(&resolved, cfg).map(|c| wire(Arc::new(c), cfg.mode)),
    };

    match built {
        Ok(model) => {
            info!(
                provider = resolved.kind.as_str(),
                model = %resolved.model,
                mode = ?cfg.mode,
                "language model configured"
            );
            Some(model)
        }
        Err(err) => {
            warn!(
                provider = resolved.kind.as_str(),
                error = %err,
                "no language model client, requests will use the rule-based interpreter"
            );
            None
        }
    }
}

fn wire<C>(client: Arc<C>, mode: GenerationMode) -> Arc<dyn LanguageModel>
where
    C: ChatBackend + TextGenerationBackend + 'static,
{
    match mode {
        GenerationMode::Chat => {
            Arc::new(ChatCompletionModel::new(client.clone()).with_completion_retry(client))
        }
        GenerationMode::Completion => Arc::new(TextGenerationModel::new(client)),
    }
}

/// A deterministic model used for tests and demos.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    repeat: Option<String>,
}

impl StubModel {
    /// Plays back `responses` in order, then fails.
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
        })
    }

    /// Answers every call with the same scripted response.
    pub fn always(response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(response.into()),
        })
    }

    fn next_response(&self) -> Result<String> {
        let mut locked = self
            .responses
            .lock()
            .map_err(|_| TaskmateError::LanguageModel("stub model lock poisoned".into()))?;
        locked
            .pop_front()
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| TaskmateError::LanguageModel("StubModel ran out of scripted responses".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond {
        content: String,
    },
    CallTool {
        name: String,
        arguments: Value,
        #[serde(default)]
        content: String,
    },
    Fail {
        error: String,
    },
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _prompt: &Prompt, _tools: &[ToolDefinition]) -> Result<ModelReply> {
        let raw = self.next_response()?;
        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelReply::text(content)),
            Ok(StubDirective::CallTool {
                name,
                arguments,
                content,
            }) => Ok(ModelReply::new(
                content,
                vec![ToolCall {
                    id: None,
                    name,
                    arguments,
                }],
            )),
            Ok(StubDirective::Fail { error }) => Err(TaskmateError::LanguageModel(error)),
            Err(_) => Ok(ModelReply::text(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingChat;

    #[async_trait]
    impl ChatBackend for FailingChat {
        fn provider(&self) -> &str {
            "fake"
        }

        async fn chat(&self, _: &[Message], _: &[ToolDefinition]) -> Result<ChatResponse> {
            Err(TaskmateError::LanguageModel("chat down".into()))
        }
    }

    struct CannedGeneration {
        body: Value,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl CannedGeneration {
        fn new(body: Value) -> Arc<Self> {
            Arc::new(Self {
                body,
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerationBackend for CannedGeneration {
        fn provider(&self) -> &str {
            "fake"
        }

        async fn generate(&self, prompt: &str) -> Result<GenerationResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(GenerationResponse::classify(self.body.clone()))
        }
    }

    fn prompt() -> Prompt {
        Prompt::assemble("sys", &[Message::assistant("earlier")], "add milk")
    }

    #[test]
    fn classifies_chat_shapes_in_order() {
        let choices = ChatResponse::classify(json!({
            "choices": [{"message": {"content": "  from choices  "}}],
            "message": {"content": "ignored"}
        }));
        assert_eq!(choices.into_reply().content, "from choices");

        let cohere = ChatResponse::classify(json!({
            "message": {"role": "assistant", "content": [{"type": "text", "text": "Hello "}, {"text": "there"}]}
        }));
        assert!(matches!(cohere, ChatResponse::Message(_)));
        assert_eq!(cohere.into_reply().content, "Hello there");

        let bare = ChatResponse::classify(json!("just text"));
        assert_eq!(bare, ChatResponse::Bare("just text".into()));

        let odd = ChatResponse::classify(json!({"output": 42}));
        assert_eq!(odd.into_reply().content, r#"{"output":42}"#);
    }

    #[test]
    fn chat_tool_calls_survive_empty_content() {
        let reply = ChatResponse::classify(json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "add_task", "arguments": "{\"title\":\"Buy milk\"}"}
                }]
            }}]
        }))
        .into_reply();

        assert_eq!(reply.content, DEFAULT_REPLY);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(reply.tool_calls[0].parameters()["title"], json!("Buy milk"));
    }

    #[test]
    fn empty_choice_falls_back_to_stringified_body() {
        let body = json!({"choices": [{"message": {"content": null}}]});
        let reply = ChatResponse::classify(body.clone()).into_reply();
        assert_eq!(reply.content, body.to_string());
    }

    #[test]
    fn classifies_generation_shapes_in_order() {
        assert_eq!(
            GenerationResponse::classify(json!({"generations": [{"text": "gen"}], "text": "no"})),
            GenerationResponse::Generations("gen".into())
        );
        assert_eq!(
            GenerationResponse::classify(json!({"choices": [{"text": "legacy"}]})),
            GenerationResponse::Choices("legacy".into())
        );
        assert_eq!(
            GenerationResponse::classify(json!({"generations": [], "text": "flat"})),
            GenerationResponse::Text("flat".into())
        );
        assert_eq!(
            GenerationResponse::classify(json!({"id": "x"})).into_text(),
            r#"{"id":"x"}"#
        );
    }

    #[test]
    fn blank_replies_use_the_default() {
        assert_eq!(ModelReply::text("   \n").content, DEFAULT_REPLY);
        assert_eq!(ModelReply::text(" ok ").content, "ok");
    }

    #[tokio::test]
    async fn chat_failure_retries_once_with_linear_prompt() {
        let generation = CannedGeneration::new(json!({"generations": [{"text": " Added it. "}]}));
        let model = ChatCompletionModel::new(Arc::new(FailingChat))
            .with_completion_retry(generation.clone());

        let reply = model.generate(&prompt(), &[]).await.unwrap();

        assert_eq!(reply.content, "Added it.");
        assert!(reply.tool_calls.is_empty());
        assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            generation.prompts.lock().unwrap()[0],
            "sys\n\nAssistant: earlier\n\nUser: add milk"
        );
    }

    #[tokio::test]
    async fn chat_failure_without_retry_surfaces_error() {
        let model = ChatCompletionModel::new(Arc::new(FailingChat));
        let err = model.generate(&prompt(), &[]).await.unwrap_err();
        assert!(matches!(err, TaskmateError::LanguageModel(_)));
    }

    #[tokio::test]
    async fn text_generation_never_returns_tool_calls() {
        let model = TextGenerationModel::new(CannedGeneration::new(json!("call add_task now")));
        let reply = model
            .generate(&prompt(), &crate::toolkit::task_tools())
            .await
            .unwrap();

        assert_eq!(reply.content, "call add_task now");
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn stub_model_plays_its_script() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"list_tasks","arguments":{}}"#.into(),
            r#"{"action":"fail","error":"offline"}"#.into(),
        ]);

        let first = model.generate(&prompt(), &[]).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "list_tasks");
        assert!(model.generate(&prompt(), &[]).await.is_err());
        assert!(model.generate(&prompt(), &[]).await.is_err());
    }

    #[test]
    fn missing_key_builds_no_model() {
        let cfg = ModelConfig {
            provider: crate::config::ProviderSelection::OpenAi,
            ..ModelConfig::default()
        };
        assert!(build_model(&cfg).is_none());
    }
}
