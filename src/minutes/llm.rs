//! LLM Client
//!
//! Thin JSON client for the Gemini `generateContent` endpoint. The server
//! sends one structured prompt and expects a single JSON object back;
//! Markdown code fences around it are tolerated and stripped.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ApiError, ApiResult};

/// Request timeout. Minutes generation is the slowest call the server
/// makes; the HTTP "end meeting" flow budgets a full minute for it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation parameters for minutes extraction.
const TEMPERATURE: f64 = 0.3;
const TOP_K: u32 = 40;
const TOP_P: f64 = 0.95;
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Result of a generation call.
#[derive(Debug)]
pub struct LlmOutput {
    /// Raw model text (fences already stripped).
    pub text: String,
    /// Total tokens consumed, when the API reports usage.
    pub tokens_used: i64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: i64,
}

/// Gemini API client.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// Create a client for the given API key and model.
    pub fn new(api_key: String, model: String) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self {
            http,
            api_key,
            model,
        })
    }

    /// Model name used for `aiProcessing.model`.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one generation call and return the stripped text plus usage.
    ///
    /// Timeouts and connection failures surface as `Unavailable` so queue
    /// workers retry them; HTTP-level rejections are `Internal`.
    pub async fn generate(&self, prompt: &str) -> ApiResult<LlmOutput> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "topK": TOP_K,
                "topP": TOP_P,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ApiError::Unavailable("LLM request timed out".to_string())
                } else {
                    ApiError::internal(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::internal(anyhow::anyhow!(
                "LLM returned {status}: {text}"
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(ApiError::internal)?;
        let tokens_used = parsed
            .usage_metadata
            .as_ref()
            .map_or(0, |u| u.total_token_count);

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ApiError::internal(anyhow::anyhow!("LLM returned no candidates")))?;

        debug!(tokens_used, "LLM generation completed");
        Ok(LlmOutput {
            text: strip_code_fences(&text).to_string(),
            tokens_used,
        })
    }
}

/// Strip a surrounding Markdown code fence (```json … ``` or ``` … ```).
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let fenced = "```json\n{\"summary\": \"hello\"}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"summary\": \"hello\"}");
    }

    #[test]
    fn test_strip_bare_fence() {
        let fenced = "```\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\":1}");
    }

    #[test]
    fn test_unfenced_passes_through() {
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_response_shape_parses() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "{}"}]}}],
            "usageMetadata": {"totalTokenCount": 1234}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, 1234);
    }
}
