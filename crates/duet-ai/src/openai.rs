use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, parse_retry_after_ms, provider_retry_delay_ms,
        should_retry_status,
    },
    ChatRequest, ChatResponse, ChatUsage, DuetAiError, LlmClient,
};

#[derive(Debug, Clone)]
/// Connection settings for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

#[derive(Debug, Clone)]
/// OpenAI-compatible HTTP client implementing `LlmClient`.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, DuetAiError> {
        if config.api_key.trim().is_empty() {
            return Err(DuetAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| DuetAiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, DuetAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self.client.post(&url).json(&body).send().await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = provider_retry_delay_ms(attempt, retry_after_ms);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }

                    return Err(DuetAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms = provider_retry_delay_ms(attempt, None);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    return Err(DuetAiError::Http(error));
                }
            }
        }

        Err(DuetAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, DuetAiError> {
    let value: Value = serde_json::from_str(raw)?;
    let choice = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| DuetAiError::InvalidResponse("response has no choices".to_string()))?;

    let text = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    let usage = value
        .get("usage")
        .map(|usage| ChatUsage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
            total_tokens: usage
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        text,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_chat_request_body, parse_chat_response};
    use crate::{ChatRequest, Message};

    fn request_with_messages(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages,
            max_tokens: Some(256),
            temperature: None,
        }
    }

    #[test]
    fn unit_request_body_maps_roles_and_optional_fields() {
        let body = build_chat_request_body(&request_with_messages(vec![
            Message::system("stay terse"),
            Message::user("hello"),
        ]));

        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("hello"));
        assert_eq!(body["max_tokens"], json!(256));
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn unit_parse_chat_response_extracts_text_and_usage() {
        let raw = json!({
            "choices": [{
                "message": { "role": "assistant", "content": "two short lines" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 11, "completion_tokens": 4, "total_tokens": 15 },
        })
        .to_string();

        let parsed = parse_chat_response(&raw).expect("parse");
        assert_eq!(parsed.text, "two short lines");
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn regression_parse_chat_response_rejects_missing_choices() {
        let error = parse_chat_response("{}").expect_err("missing choices");
        assert!(error.to_string().contains("no choices"));
    }
}
