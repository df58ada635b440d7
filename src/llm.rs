//! LLM chat access behind a trait, so tasks never know which provider
//! (or test fake) is answering.

use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;

use crate::prelude::*;

/// One chat completion request. Messages are already in OpenAI wire shape
/// (`role` + `content`, where `content` may be multi-part vision input).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    /// When set, the provider is asked for strict JSON matching this
    /// schema, and the response content is parsed as JSON.
    pub response_schema: Option<ResponseSchema>,
    pub temperature: Option<f32>,
}

/// A named JSON Schema for structured output.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl CompletionRequest {
    pub fn new(model: &str, messages: Vec<Value>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            response_schema: None,
            temperature: None,
        }
    }

    pub fn with_schema(mut self, name: &str, schema: Value) -> Self {
        self.response_schema = Some(ResponseSchema {
            name: name.to_string(),
            schema,
        });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Anything that can answer a chat completion request.
///
/// Returns the message content: parsed JSON when a schema was requested,
/// otherwise a JSON string with the raw text.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Value>;
}

/// Create an OpenAI-compatible client from the standard environment
/// variables. Also works against LiteLLM and other compatible gateways.
pub fn create_llm_client() -> Client<OpenAIConfig> {
    let mut client_config = OpenAIConfig::new();
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        client_config = client_config.with_api_key(api_key);
    }
    if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
        client_config = client_config.with_api_base(api_base);
    }
    Client::with_config(client_config)
}

/// The production completer, speaking the OpenAI chat API.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
}

impl OpenAiChat {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    pub fn from_env() -> Self {
        Self::new(create_llm_client())
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, request: CompletionRequest) -> Result<Value> {
        // Build the request body by hand so vision content parts and
        // strict schema output go over the wire exactly as intended.
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "store": false,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        let wants_json = request.response_schema.is_some();
        if let Some(schema) = request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                },
            });
        }
        trace!(?body, "chat request");

        let response: Value = self
            .client
            .chat()
            .create_byot(body)
            .await
            .context("chat completion request failed")?;
        debug!(%response, "chat response");

        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("no content in chat response"))?;
        if wants_json {
            serde_json::from_str(content)
                .with_context(|| format!("response content is not JSON: {content:?}"))
        } else {
            Ok(Value::String(content.to_string()))
        }
    }
}

/// A scripted completer: pops canned responses in order, recording each
/// request it sees. Used by tests and by `--dry-run` style local checks.
pub struct ScriptedChat {
    responses: std::sync::Mutex<Vec<Result<Value>>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl ScriptedChat {
    /// Responses are handed out front-to-back.
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ChatCompleter for ScriptedChat {
    async fn complete(&self, request: CompletionRequest) -> Result<Value> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| anyhow!("lock poisoned"))?;
        responses
            .pop()
            .unwrap_or_else(|| Err(anyhow!("scripted chat ran out of responses")))
    }
}
