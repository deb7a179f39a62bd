//! OpenAI-compatible chat-completions client (§6 "Remote model API").

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{LlmError, LlmResult};
use crate::provider::{LlmProvider, ProviderConfig};
use crate::types::{
    CompletionResponse, Message, MessageContent, MessageRole, StopReason, ToolCall,
    ToolDefinition, Usage,
};

/// Chat-completions client speaking the OpenAI wire format (§6), usable
/// against `OpenAI` itself or any compatible endpoint (LM Studio, vLLM,
/// Ollama's compatibility layer, ...).
pub struct OpenAiCompatProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiCompatProvider {
    /// Build a provider from a fully-specified configuration.
    ///
    /// # Errors
    /// Returns [`LlmError::RequestFailed`] if the underlying HTTP client
    /// could not be constructed (e.g. an invalid TLS configuration).
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let openai_messages: Vec<Value> = messages.iter().map(convert_message).collect();

        let mut request = serde_json::json!({
            "model": self.config.model,
            "messages": openai_messages,
            "max_tokens": self.config.max_tokens,
        });

        if !tools.is_empty() {
            let openai_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            request["tools"] = Value::Array(openai_tools);
            request["tool_choice"] = Value::String("auto".to_owned());
        }

        request
    }
}

/// Convert one otus [`Message`] into an OpenAI chat-completions message
/// object. An assistant turn with tool calls drops its narration from the
/// wire form: OpenAI-compatible endpoints expect `content: null` alongside
/// `tool_calls`.
fn convert_message(msg: &Message) -> Value {
    let role = match msg.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    match &msg.content {
        MessageContent::Text(text) => serde_json::json!({
            "role": role,
            "content": text,
        }),
        MessageContent::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
            let openai_tool_calls: Vec<Value> = tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": openai_tool_calls,
            })
        },
        MessageContent::Assistant { text, .. } => serde_json::json!({
            "role": "assistant",
            "content": text.clone().unwrap_or_default(),
        }),
        MessageContent::ToolResult(result) => serde_json::json!({
            "role": "tool",
            "tool_call_id": result.call_id,
            "content": result.content,
        }),
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<CompletionResponse> {
        if self.config.api_key.as_deref().unwrap_or_default().is_empty()
            && !is_local_url(&self.config.base_url)
        {
            return Err(LlmError::ApiKeyNotConfigured {
                base_url: self.config.base_url.clone(),
            });
        }

        let body = self.build_request(messages, tools);

        debug!(model = %self.config.model, base_url = %self.config.base_url, "calling remote model");

        let mut request = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::HttpStatus { status, body });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_owned()))?;

        let mut tool_calls = Vec::new();
        if let Some(raw_calls) = choice.message.tool_calls {
            for raw in raw_calls {
                let arguments: Value = serde_json::from_str(&raw.function.arguments)
                    .map_err(|e| LlmError::InvalidResponse(format!("bad tool arguments: {e}")))?;
                tool_calls.push(ToolCall {
                    id: raw.id,
                    name: raw.function.name,
                    arguments,
                });
            }
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("length") => StopReason::MaxTokens,
            Some("tool_calls") => StopReason::ToolUse,
            Some("content_filter") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(CompletionResponse {
            text: choice.message.content,
            tool_calls,
            stop_reason,
            usage: Usage {
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.completion_tokens,
            },
        })
    }
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether `url` points at a local endpoint where an API key is typically
/// not required (LM Studio, Ollama, a dev vLLM instance).
fn is_local_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("localhost") || lower.contains("127.0.0.1") || lower.contains("[::1]")
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            base_url: "http://localhost:1234/v1/chat/completions".to_owned(),
            api_key: None,
            model: "local-model".to_owned(),
            max_tokens: 4096,
            timeout: std::time::Duration::from_secs(30),
        }
    }

    #[test]
    fn message_conversion_drops_text_when_tool_calls_present() {
        let msg = Message::assistant_with_tools(
            Some("narration".to_owned()),
            vec![ToolCall {
                id: "t1".to_owned(),
                name: "wait".to_owned(),
                arguments: serde_json::json!({"duration": 1, "reason": "x"}),
            }],
        );
        let converted = convert_message(&msg);
        assert_eq!(converted["content"], Value::Null);
        assert_eq!(converted["tool_calls"][0]["function"]["name"], "wait");
    }

    #[test]
    fn user_message_conversion() {
        let converted = convert_message(&Message::user("hello"));
        assert_eq!(converted["role"], "user");
        assert_eq!(converted["content"], "hello");
    }

    #[test]
    fn tool_result_conversion() {
        let converted = convert_message(&Message::tool_result(crate::types::ToolCallResult {
            call_id: "t1".to_owned(),
            content: "ok".to_owned(),
            is_error: false,
        }));
        assert_eq!(converted["role"], "tool");
        assert_eq!(converted["tool_call_id"], "t1");
    }

    #[test]
    fn build_request_includes_tool_choice_auto_when_tools_present() {
        let provider = OpenAiCompatProvider::new(test_config()).unwrap();
        let tools = vec![ToolDefinition {
            name: "wait".to_owned(),
            description: "sleep".to_owned(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let request = provider.build_request(&[Message::user("hi")], &tools);
        assert_eq!(request["tool_choice"], "auto");
    }

    #[test]
    fn build_request_omits_tools_key_when_empty() {
        let provider = OpenAiCompatProvider::new(test_config()).unwrap();
        let request = provider.build_request(&[Message::user("hi")], &[]);
        assert!(request.get("tools").is_none());
    }

    #[tokio::test]
    async fn missing_api_key_against_remote_host_is_an_error() {
        let provider = OpenAiCompatProvider::new(ProviderConfig {
            base_url: "https://api.openai.com/v1/chat/completions".to_owned(),
            api_key: None,
            model: "gpt-4o-mini".to_owned(),
            max_tokens: 1024,
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap();

        let result = provider.complete(&[Message::user("hi")], &[]).await;
        assert!(matches!(result, Err(LlmError::ApiKeyNotConfigured { .. })));
    }

    #[test]
    fn is_local_url_recognizes_localhost_variants() {
        assert!(is_local_url("http://localhost:1234/v1/chat/completions"));
        assert!(is_local_url("http://127.0.0.1:8080"));
        assert!(!is_local_url("https://api.openai.com/v1/chat/completions"));
    }
}
