//! Inference client for an OpenAI-compatible chat-completions backend.
//!
//! All generation goes through the [`Generator`] trait so the objective,
//! content, quiz, and chat components can be tested against scripted
//! backends. The HTTP client retries timeouts with exponential backoff;
//! any other failure is returned immediately so callers never see text
//! from a failed call.

use serde::Deserialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::InferenceConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
    /// Ask the backend to skip its reasoning phase. Structured-output
    /// calls set this; reasoning tokens corrupt guided decoding.
    pub suppress_reasoning: bool,
    /// JSON schema for guided decoding, when the backend supports it.
    pub guided_json: Option<Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: usize, temperature: f64) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
            suppress_reasoning: false,
            guided_json: None,
        }
    }

    pub fn no_think(mut self) -> Self {
        self.suppress_reasoning = true;
        self
    }

    pub fn guided(mut self, schema: Value) -> Self {
        self.guided_json = Some(schema);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
}

#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Run one completion. An `Err` means no usable text was produced;
    /// callers must not attempt to parse anything out of a failure.
    async fn complete(&self, req: &CompletionRequest) -> Result<Completion>;

    /// Stream completion tokens as they arrive. Dropping the returned
    /// stream cancels the request.
    async fn stream(&self, req: &CompletionRequest) -> Result<ReceiverStream<String>>;
}

pub struct InferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Inference(format!("building HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send_with_retry(&self, body: &Value) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.request(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    // Non-timeout HTTP failures are not retried.
                    let text = resp.text().await.unwrap_or_default();
                    return Err(Error::Inference(format!(
                        "backend returned {}: {}",
                        status, text
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if attempt > self.config.max_retries {
                        return Err(Error::Inference(format!(
                            "request timed out after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    let backoff = std::time::Duration::from_secs(1 << (attempt - 1).min(5));
                    tracing::warn!(attempt, backoff_secs = backoff.as_secs(), "inference timeout, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(Error::Inference(format!("request failed: {}", e)));
                }
            }
        }
    }
}

/// Build the chat-completions request body. Kept separate from the HTTP
/// client so the wire shape is testable.
pub fn build_request_body(config: &InferenceConfig, req: &CompletionRequest, stream: bool) -> Value {
    let mut body = serde_json::json!({
        "model": config.model,
        "messages": [{"role": "user", "content": req.prompt}],
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "stream": stream,
    });
    if req.suppress_reasoning {
        body["chat_template_kwargs"] = serde_json::json!({"enable_thinking": false});
    }
    if let Some(schema) = &req.guided_json {
        body["guided_json"] = schema.clone();
    }
    body
}

#[async_trait::async_trait]
impl Generator for InferenceClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<Completion> {
        let body = build_request_body(&self.config, req, false);
        let resp = self.send_with_retry(&body).await?;
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(format!("malformed backend response: {}", e)))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Inference("backend response had no content".into()))?;
        Ok(Completion { text })
    }

    async fn stream(&self, req: &CompletionRequest) -> Result<ReceiverStream<String>> {
        use futures::StreamExt;

        let body = build_request_body(&self.config, req, true);
        let resp = self.send_with_retry(&body).await?;
        let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);

        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut pending = String::new();
            'outer: while let Some(item) = bytes.next().await {
                let Ok(data) = item else { break };
                pending.push_str(&String::from_utf8_lossy(&data));
                while let Some(nl) = pending.find('\n') {
                    let line = pending[..nl].trim_end_matches('\r').to_string();
                    pending.drain(..=nl);
                    match parse_sse_line(&line) {
                        Some(StreamEvent::Delta(token)) => {
                            // A closed receiver means the caller dropped
                            // the stream; stop reading.
                            if tx.send(token).await.is_err() {
                                break 'outer;
                            }
                        }
                        Some(StreamEvent::Done) => break 'outer,
                        None => {}
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

#[derive(Debug, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// Parse one server-sent-events line from a streaming completion.
pub fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    let value: Value = serde_json::from_str(payload).ok()?;
    let token = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if token.is_empty() {
        None
    } else {
        Some(StreamEvent::Delta(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;

    fn test_inference_config() -> InferenceConfig {
        InferenceConfig {
            base_url: "http://localhost:8000".into(),
            model: "test-model".into(),
            api_key: None,
            timeout_secs: 300,
            max_retries: 2,
            context_window: 8192,
        }
    }

    #[test]
    fn body_includes_guided_json_and_no_think() {
        let cfg = test_inference_config();
        let req = CompletionRequest::new("hello", 100, 0.2)
            .no_think()
            .guided(serde_json::json!({"type": "object"}));
        let body = build_request_body(&cfg, &req, false);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], false);
        assert_eq!(body["guided_json"]["type"], "object");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn body_omits_optional_fields_by_default() {
        let cfg = test_inference_config();
        let req = CompletionRequest::new("hi", 50, 0.7);
        let body = build_request_body(&cfg, &req, true);
        assert!(body.get("chat_template_kwargs").is_none());
        assert!(body.get("guided_json").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn sse_parsing_handles_deltas_and_done() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(StreamEvent::Delta("Hel".to_string()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(StreamEvent::Done));
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: {\"choices\":[]}"), None);
    }

    #[test]
    fn sse_parsing_skips_empty_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(parse_sse_line(line), None);
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only), None);
    }
}
