//! Language model client (OpenAI-compatible chat completions API).
//!
//! Two request paths:
//! - [`LlmClient::complete`]: one-shot JSON response, used when the
//!   orchestrator wants a cacheable answer or function calling.
//! - [`LlmClient::stream`]: SSE token stream bridged from blocking HTTP,
//!   accumulated into sentences for incremental synthesis. The caller's
//!   cancellation token is checked on every token so an interruption stops
//!   generation promptly.

pub mod cache;

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use crate::functions::{FunctionCall, FunctionSpec};
use crate::messages::SentenceChunk;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Minimum buffered text before splitting on clause punctuation.
const CLAUSE_MIN_LEN: usize = 48;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instruction turn; never trimmed from history.
    System,
    /// End-user turn.
    User,
    /// Agent turn.
    Assistant,
    /// Function-execution result turn.
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: ChatRole,
    /// Text content (or serialized function result for tool turns).
    pub content: String,
    /// Tool-call id this message responds to (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Raw tool-call block echoed back to the model (assistant turns that
    /// requested a function).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

impl ChatMessage {
    /// A system instruction turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Outcome of a non-streaming completion.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text. Empty when the model requested a function instead.
    pub text: String,
    /// Function the model asked to invoke, if any.
    pub tool_call: Option<FunctionCall>,
    /// Raw tool-call block for echoing into history.
    pub raw_tool_calls: Option<serde_json::Value>,
}

/// Outcome of a streaming completion.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Full generated text (all sentences concatenated).
    pub text: String,
    /// Whether generation stopped due to cancellation.
    pub interrupted: bool,
}

/// Cache key for a message sequence: the exact serialized conversation.
pub fn cache_key(model: &str, messages: &[ChatMessage]) -> String {
    let mut key = String::with_capacity(64 + messages.len() * 32);
    key.push_str(model);
    for m in messages {
        key.push('\u{1f}');
        key.push_str(match m.role {
            ChatRole::System => "s",
            ChatRole::User => "u",
            ChatRole::Assistant => "a",
            ChatRole::Tool => "t",
        });
        key.push(':');
        key.push_str(&m.content);
    }
    key
}

/// Stateless OpenAI-compatible chat client.
pub struct LlmClient {
    config: LlmConfig,
    agent: ureq::Agent,
}

impl LlmClient {
    /// Create a client from configuration.
    pub fn new(config: &LlmConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let agent = ureq::builder()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        info!(url = %config.api_url, model = %config.api_model, "LLM client configured");
        Self {
            config: config.clone(),
            agent,
        }
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.api_model
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[FunctionSpec]>,
        stream: bool,
    ) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let mut msg = serde_json::json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                        ChatRole::Tool => "tool",
                    },
                    "content": m.content,
                });
                if let Some(ref id) = m.tool_call_id {
                    msg["tool_call_id"] = serde_json::json!(id);
                }
                if let Some(ref calls) = m.tool_calls {
                    msg["tool_calls"] = calls.clone();
                }
                msg
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.api_model,
            "messages": wire_messages,
            "stream": stream,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens,
        });

        if let Some(specs) = tools {
            if !specs.is_empty() {
                let tools_json: Vec<serde_json::Value> = specs
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": s.name,
                                "description": s.description,
                                "parameters": s.parameters,
                            },
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!(tools_json);
                body["tool_choice"] = serde_json::json!("auto");
            }
        }

        body
    }

    /// Request a complete (non-streaming) response.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Llm`] on request, timeout, or decode failure.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[FunctionSpec]>,
    ) -> Result<LlmResponse> {
        let body = self.build_body(messages, tools, false);
        let body_str = serde_json::to_string(&body)
            .map_err(|e| EngineError::Llm(format!("JSON serialization failed: {e}")))?;

        let url = self.endpoint();
        let agent = self.agent.clone();
        let api_key = self.config.api_key.clone();

        let raw = tokio::task::spawn_blocking(move || -> std::result::Result<String, String> {
            let mut req = agent.post(&url).set("Content-Type", "application/json");
            if !api_key.is_empty() {
                let auth = format!("Bearer {api_key}");
                req = req.set("Authorization", &auth);
            }
            let response = req
                .send_string(&body_str)
                .map_err(|e| format!("API request failed: {e}"))?;
            response
                .into_string()
                .map_err(|e| format!("read error: {e}"))
        })
        .await
        .map_err(|e| EngineError::Llm(format!("HTTP task panicked: {e}")))?
        .map_err(EngineError::Llm)?;

        let parsed: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Llm(format!("JSON parse error: {e}")))?;
        let message = &parsed["choices"][0]["message"];

        let text = message["content"].as_str().unwrap_or_default().to_owned();
        let raw_tool_calls = if message["tool_calls"].is_array() {
            Some(message["tool_calls"].clone())
        } else {
            None
        };
        let tool_call = message["tool_calls"][0]["function"].as_object().map(|f| {
            let name = f
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            let arguments = f
                .get("arguments")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null);
            let id = parsed["choices"][0]["message"]["tool_calls"][0]["id"]
                .as_str()
                .unwrap_or_default()
                .to_owned();
            FunctionCall {
                id,
                name,
                arguments,
            }
        });

        debug!(
            chars = text.len(),
            has_tool_call = tool_call.is_some(),
            "LLM completion received"
        );
        Ok(LlmResponse {
            text,
            tool_call,
            raw_tool_calls,
        })
    }

    /// Stream a response, delivering sentence chunks as they form.
    ///
    /// The final sentence is sent with `is_final = true`; when the response
    /// ends exactly on a boundary an empty final chunk marks the end. The
    /// `cancel` token is observed per token; a cancelled stream returns with
    /// `interrupted = true` and no error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Llm`] on request or decode failure and
    /// [`EngineError::Channel`] when the sentence channel closes early.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<SentenceChunk>,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let body = self.build_body(messages, None, true);
        let body_str = serde_json::to_string(&body)
            .map_err(|e| EngineError::Llm(format!("JSON serialization failed: {e}")))?;

        let url = self.endpoint();
        let agent = self.agent.clone();
        let api_key = self.config.api_key.clone();
        let gen_start = Instant::now();

        // Bridge sync SSE reading to async through a token channel.
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let blocking_cancel = cancel.clone();

        let http_handle =
            tokio::task::spawn_blocking(move || -> std::result::Result<(), String> {
                let mut req = agent.post(&url).set("Content-Type", "application/json");
                if !api_key.is_empty() {
                    let auth = format!("Bearer {api_key}");
                    req = req.set("Authorization", &auth);
                }

                let response = req
                    .send_string(&body_str)
                    .map_err(|e| format!("API request failed: {e}"))?;

                let reader = std::io::BufReader::new(response.into_reader());
                for line in std::io::BufRead::lines(reader) {
                    if blocking_cancel.is_cancelled() {
                        break;
                    }

                    let line = line.map_err(|e| format!("read error: {e}"))?;
                    if line.is_empty() {
                        continue;
                    }
                    let data = match line.strip_prefix("data: ") {
                        Some(d) => d,
                        None => continue,
                    };
                    if data == "[DONE]" {
                        break;
                    }

                    let chunk: serde_json::Value = serde_json::from_str(data)
                        .map_err(|e| format!("JSON parse error: {e}"))?;

                    if let Some(content) = chunk["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty()
                            && token_tx.blocking_send(content.to_owned()).is_err()
                        {
                            break;
                        }
                    }
                    if chunk["choices"][0]["finish_reason"].as_str() == Some("stop") {
                        break;
                    }
                }
                Ok(())
            });

        let mut generated = String::new();
        let mut sentence_buffer = String::new();
        let mut token_count: usize = 0;
        let mut interrupted = false;

        while let Some(token) = token_rx.recv().await {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            token_count += 1;
            generated.push_str(&token);
            sentence_buffer.push_str(&token);

            if let Some(pos) = find_clause_boundary(&sentence_buffer) {
                let sentence = sentence_buffer[..=pos].trim().to_owned();
                if !sentence.is_empty() {
                    tx.send(SentenceChunk {
                        text: sentence,
                        is_final: false,
                    })
                    .await
                    .map_err(|e| EngineError::Channel(format!("sentence channel closed: {e}")))?;
                }
                sentence_buffer = sentence_buffer[pos + 1..].to_owned();
            }
        }
        drop(token_rx);

        // The blocking reader may observe cancellation before forwarding a
        // single token; that is still an interrupted stream.
        if cancel.is_cancelled() {
            interrupted = true;
        }

        match http_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !interrupted {
                    return Err(EngineError::Llm(e));
                }
            }
            Err(e) => {
                if !interrupted {
                    return Err(EngineError::Llm(format!("HTTP task panicked: {e}")));
                }
            }
        }

        // Flush the remainder; an empty final chunk still marks the end.
        let remaining = sentence_buffer.trim().to_owned();
        tx.send(SentenceChunk {
            text: remaining,
            is_final: true,
        })
        .await
        .map_err(|e| EngineError::Channel(format!("sentence channel closed: {e}")))?;

        let elapsed = gen_start.elapsed();
        info!(
            tokens = token_count,
            elapsed_ms = elapsed.as_millis() as u64,
            interrupted,
            "LLM stream finished"
        );

        Ok(StreamOutcome {
            text: generated.trim().to_owned(),
            interrupted,
        })
    }
}

/// Find a sentence-ending character (`.`, `!`, `?`, newline) followed by
/// whitespace or end of text. Returns the byte index of the boundary.
fn find_sentence_boundary(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let rest = &text[i + c.len_utf8()..];
            if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\n') {
                return Some(i);
            }
        }
    }
    None
}

/// Find the best split point for incremental synthesis: a sentence boundary
/// if one exists, else the last clause-level punctuation once the buffer is
/// long enough to be worth splitting.
pub(crate) fn find_clause_boundary(text: &str) -> Option<usize> {
    if let Some(pos) = find_sentence_boundary(text) {
        return Some(pos);
    }

    if text.len() < CLAUSE_MIN_LEN {
        return None;
    }

    let mut last_clause: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if matches!(c, ',' | ';' | ':') {
            let rest = &text[i + c.len_utf8()..];
            if rest.is_empty() || rest.starts_with(' ') {
                last_clause = Some(i + c.len_utf8() - 1);
            }
        }
    }
    last_clause
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn sentence_boundary_found() {
        assert_eq!(find_sentence_boundary("Hello there. More"), Some(11));
        assert_eq!(find_sentence_boundary("Wait!"), Some(4));
        assert_eq!(find_sentence_boundary("no boundary here"), None);
    }

    #[test]
    fn decimal_point_is_not_a_boundary() {
        assert_eq!(find_sentence_boundary("pi is 3.14159 roughly"), None);
    }

    #[test]
    fn short_text_does_not_split_on_comma() {
        assert_eq!(find_clause_boundary("one, two"), None);
    }

    #[test]
    fn long_text_splits_on_last_clause_comma() {
        let text = "first clause here, second clause follows along, and then";
        let pos = find_clause_boundary(text).unwrap();
        assert_eq!(&text[pos..=pos], ",");
        assert_eq!(pos, text.rfind(',').unwrap());
    }

    #[test]
    fn cache_key_distinguishes_conversations() {
        let a = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let b = vec![ChatMessage::system("be brief"), ChatMessage::user("hi!")];
        assert_ne!(cache_key("m", &a), cache_key("m", &b));
        assert_eq!(cache_key("m", &a), cache_key("m", &a));
    }

    #[test]
    fn cache_key_distinguishes_roles() {
        let a = vec![ChatMessage::user("hi")];
        let b = vec![ChatMessage::assistant("hi")];
        assert_ne!(cache_key("m", &a), cache_key("m", &b));
    }

    #[test]
    fn build_body_includes_sampling_settings() {
        let client = LlmClient::new(&LlmConfig::default());
        let body = client.build_body(&[ChatMessage::user("hello")], None, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn build_body_attaches_tools() {
        let client = LlmClient::new(&LlmConfig::default());
        let specs = vec![FunctionSpec {
            name: "lookup_order".to_owned(),
            description: "Look up an order by id".to_owned(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "order_id": { "type": "string" } },
            }),
        }];
        let body = client.build_body(&[ChatMessage::user("where is my order")], Some(&specs), false);
        assert_eq!(body["tools"][0]["function"]["name"], "lookup_order");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn build_body_without_tools_omits_field() {
        let client = LlmClient::new(&LlmConfig::default());
        let body = client.build_body(&[ChatMessage::user("hi")], None, false);
        assert!(body.get("tools").is_none());
    }
}
