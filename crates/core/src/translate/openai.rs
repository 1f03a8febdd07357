//! OpenAI-compatible chat-completions backend.
//!
//! Speaks the `/v1/chat/completions` dialect shared by LocalAI, OpenAI,
//! OpenRouter and most self-hosted gateways, which is why it serves as the
//! default `localai` service type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::{BatchContext, TranslationError, Translator};

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Chat-completions client implementing the [`Translator`] port.
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
    name: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiCompatBackend {
    pub fn new(name: impl Into<String>, config: OpenAiCompatConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            config,
            name: name.into(),
        }
    }

    async fn complete(&self, system: String, user: String) -> Result<String, TranslationError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
        };

        let mut builder = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TranslationError::ServiceFailure(format!("request timed out: {}", e))
            } else {
                TranslationError::ServiceFailure(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(TranslationError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::ServiceFailure(format!(
                "{}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::NonRetryable(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TranslationError::InvalidResponse("no choices in reply".to_string()))?;
        Ok(content)
    }
}

#[async_trait]
impl Translator for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn translate_line(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslationError> {
        let system = format!(
            "You are a subtitle translator. Translate the user's line from {} to {}. \
             Reply with the translated line only, no quotes, no commentary.",
            source, target
        );
        let reply = self.complete(system, text.to_string()).await?;
        let line = reply.trim().to_string();
        if line.is_empty() && !text.trim().is_empty() {
            return Err(TranslationError::InvalidResponse(
                "empty translation for non-empty line".to_string(),
            ));
        }
        Ok(line)
    }

    async fn translate_batch(
        &self,
        lines: &[String],
        context: &BatchContext,
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslationError> {
        let system = format!(
            "You are a subtitle translator. Translate each entry of the JSON array from {} to {}. \
             Reply with a JSON array of the same length, same order, translated entries only. \
             Entries under \"context_before\" and \"context_after\" are surrounding dialogue for \
             reference and must not appear in the reply.",
            source, target
        );
        let mut payload = serde_json::json!({ "lines": lines });
        if !context.is_empty() {
            payload["context_before"] = serde_json::json!(context.before);
            payload["context_after"] = serde_json::json!(context.after);
        }

        let reply = self.complete(system, payload.to_string()).await?;
        let translated = parse_json_array(&reply)?;

        if translated.len() != lines.len() {
            return Err(TranslationError::InvalidResponse(format!(
                "expected {} lines, got {}",
                lines.len(),
                translated.len()
            )));
        }
        for (input, output) in lines.iter().zip(&translated) {
            if output.trim().is_empty() && !input.trim().is_empty() {
                return Err(TranslationError::InvalidResponse(
                    "empty translation for non-empty line".to_string(),
                ));
            }
        }
        Ok(translated)
    }
}

/// Parse the model's reply as a JSON string array, tolerating markdown code
/// fences around the payload.
fn parse_json_array(reply: &str) -> Result<Vec<String>, TranslationError> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str::<Vec<String>>(body)
        .map_err(|e| TranslationError::InvalidResponse(format!("not a JSON array: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array_plain() {
        let out = parse_json_array(r#"["Bonjour", "Salut"]"#).unwrap();
        assert_eq!(out, vec!["Bonjour", "Salut"]);
    }

    #[test]
    fn test_parse_json_array_fenced() {
        let out = parse_json_array("```json\n[\"Bonjour\"]\n```").unwrap();
        assert_eq!(out, vec!["Bonjour"]);
        let out = parse_json_array("```\n[\"Hei\"]\n```").unwrap();
        assert_eq!(out, vec!["Hei"]);
    }

    #[test]
    fn test_parse_json_array_garbage() {
        assert!(matches!(
            parse_json_array("Sure! Here are the translations:"),
            Err(TranslationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_backend_reports_batch_capability() {
        let backend = OpenAiCompatBackend::new("localai", OpenAiCompatConfig::default());
        assert!(backend.supports_batch());
        assert_eq!(backend.name(), "localai");
    }
}
