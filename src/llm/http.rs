//! OpenAI-compatible HTTP transport for the inference service
//!
//! Sends `POST {base_url}/chat/completions` with a bearer credential and
//! returns `choices[0].message.content`. Status codes are mapped onto
//! [`CallError`]: 429 is `RateLimited`, 5xx and network failures are
//! `Transient`, every other 4xx is `Fatal`.

use super::client::LLMClient;
use super::error::CallError;
use super::types::{ChatMessage, LLMRequest, LLMResponse};
use crate::config::{ConfigError, VantageConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// HTTP client for an OpenAI-compatible chat-completions endpoint
///
/// The underlying `reqwest::Client` pools connections and is safe to share
/// across tasks.
pub struct HttpChatClient {
    endpoint: String,
    api_key: String,
    http_client: Client,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl HttpChatClient {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            endpoint: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
            timeout,
        })
    }

    pub fn from_config(config: &VantageConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ConfigError::MissingCredentials)?;
        Self::new(
            config.api_base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn map_send_error(&self, e: reqwest::Error) -> CallError {
        if e.is_timeout() {
            warn!("Inference request timed out after {:?}", self.timeout);
            CallError::timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            warn!("Cannot connect to inference service at {}", self.endpoint);
            CallError::transient(format!("Connection failed: {}", e))
        } else {
            error!("Inference request error: {}", e);
            CallError::transient(format!("Request failed: {}", e))
        }
    }
}

/// Reads a `Retry-After` header given in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn extract_content(body: ChatCompletionResponse) -> Result<String, CallError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| CallError::fatal("No content in inference response"))
}

#[async_trait]
impl LLMClient for HttpChatClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, CallError> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            model = %request.model,
            prompt_chars = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Sending inference request"
        );

        let start = Instant::now();
        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), model = %request.model, "Inference service returned error status");
            return Err(CallError::from_status(status.as_u16(), &text, retry_after));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CallError::timeout(self.timeout.as_secs())
            } else {
                CallError::fatal(format!("Malformed inference response: {}", e))
            }
        })?;
        let content = extract_content(parsed)?;

        debug!(
            model = %request.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_chars = content.len(),
            "Inference request complete"
        );

        Ok(LLMResponse::text(content, start.elapsed()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl fmt::Debug for HttpChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChatClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_rejects_empty_credentials() {
        let result = HttpChatClient::new("https://example.test/v1", "  ", Duration::from_secs(5));
        assert!(matches!(result, Err(ConfigError::MissingCredentials)));
    }

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let client =
            HttpChatClient::new("https://example.test/v1/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.completions_url(),
            "https://example.test/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::user("Assess")];
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: Some(0.2),
            max_tokens: None,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Assess");
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_extract_content() {
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"a\": 1}"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_content_without_choices_is_fatal() {
        let body: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            extract_content(body),
            Err(CallError::Fatal { .. })
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(parse_retry_after(&headers), Some(17));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let client =
            HttpChatClient::new("http://127.0.0.1:9", "key", Duration::from_secs(2)).unwrap();
        let result = client.chat(LLMRequest::prompt("m", "hi")).await;
        assert!(matches!(result, Err(CallError::Transient { .. })));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client =
            HttpChatClient::new("https://example.test", "sk-secret", Duration::from_secs(5))
                .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
