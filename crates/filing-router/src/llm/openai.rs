//! OpenAI-compatible chat completions client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::CompletionService;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiCompatibleClient {
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let endpoint = endpoint.into();
        let model = model.into();
        tracing::info!(endpoint = %endpoint, model = %model, "[OpenAiCompatibleClient] Creating completion client");

        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            model,
            // Routing must be repeatable
            temperature: 0.0,
            client,
        })
    }

    /// Reads `OPENAI_API_KEY`, plus optional `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is not set"))?;
        let endpoint = std::env::var("OPENAI_BASE_URL")
            .map(|base| format!("{}/chat/completions", base.trim_end_matches('/')))
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(endpoint, api_key, model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, max_tokens: usize) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "stream": false
        })
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// answered with an HTML error page instead.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
        parse_body(&body, endpoint, status.as_u16())
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str, endpoint: &str, status: u16) -> Result<T> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
            endpoint,
            status,
            preview
        ));
    }

    serde_json::from_str::<T>(body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            max_tokens,
            prompt_len = prompt.len(),
            "[OpenAiCompatibleClient] Sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt, max_tokens))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request to {} timed out", self.endpoint)
                } else if e.is_connect() {
                    anyhow!("Failed to connect to {}: {}", self.endpoint, e)
                } else {
                    anyhow!("Request to {} failed: {}", self.endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            tracing::error!(endpoint = %self.endpoint, status = %status, error = %error, "[OpenAiCompatibleClient] API returned error");
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: ChatResponse = Self::parse_json_response(response, &self.endpoint).await?;
        first_content(result)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("No choices returned from API"))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new("http://localhost:9/v1/chat/completions", "test-key", DEFAULT_MODEL)
            .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = client().request_body("route this", 400);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 400);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "route this");
    }

    #[test]
    fn test_first_content() {
        let parsed: ChatResponse = parse_body(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"route\":\"rag\"}"}}]}"#,
            "test",
            200,
        )
        .unwrap();
        assert_eq!(first_content(parsed).unwrap(), r#"{"route":"rag"}"#);

        let empty: ChatResponse = parse_body(r#"{"choices":[]}"#, "test", 200).unwrap();
        assert!(first_content(empty).is_err());
    }

    #[test]
    fn test_html_error_page_is_reported() {
        let err = parse_body::<ChatResponse>("<!DOCTYPE html><html>502</html>", "test", 502)
            .err()
            .unwrap();
        assert!(err.to_string().contains("HTML"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_errors() {
        let result = client().complete("hello", 10).await;
        assert!(result.is_err());
    }
}
