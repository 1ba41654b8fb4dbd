pub mod prompt;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use whodis_core::{CoreError, LlmError};

pub use prompt::{
    build_analysis_prompt, build_summary_prompt, PromptLimits, ANALYSIS_INSTRUCTIONS,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub trait LlmProvider {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Sends one prompt and returns the model's text.
    async fn complete(&self, prompt: &str) -> Result<String, CoreError>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

/// Joins the text parts of the first candidate. A blocked prompt or an
/// all-whitespace answer is an error, never an empty analysis.
pub fn extract_completion(provider: &str, response: GenerateContentResponse) -> Result<String, LlmError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::ContentFiltered { reason });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::EmptyCompletion {
            provider: provider.to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        if let Some(reason) = candidate.finish_reason.filter(|r| r == "SAFETY") {
            return Err(LlmError::ContentFiltered { reason });
        }
        return Err(LlmError::EmptyCompletion {
            provider: provider.to_string(),
        });
    }
    Ok(text)
}

pub fn status_error(
    provider: &str,
    model: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> LlmError {
    let provider = provider.to_string();
    match status.as_u16() {
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            LlmError::InvalidApiKey { provider }
        }
        400 => LlmError::InvalidPrompt {
            reason: body.chars().take(200).collect(),
        },
        401 | 403 => LlmError::AuthenticationFailed { provider },
        404 => LlmError::ModelNotAvailable {
            model: model.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider,
            retry_after: retry_after.unwrap_or(30),
        },
        code if status.is_server_error() => {
            debug!("{} returned {}", provider, code);
            LlmError::ServiceUnavailable { provider }
        }
        code => LlmError::RequestFailed {
            provider,
            status_code: code,
        },
    }
}

/// Google Gemini over the `generateContent` REST endpoint.
pub struct GeminiProvider {
    http_client: Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, api_base: String, timeout: Duration) -> Result<Self, CoreError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key,
            model,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, CoreError> {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        info!("Sending prompt to {} ({} chars)", self.model, prompt.chars().count());
        debug!("Prompt:\n{}", prompt);

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Request to {} failed: {}", self.name(), e);
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: self.name().to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let err = status_error(self.name(), &self.model, status, &body, retry_after);
            warn!("{} returned {}: {}", self.name(), status, err);
            return Err(err.into());
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            error!("Failed to parse {} response: {}", self.name(), e);
            CoreError::Llm(LlmError::InvalidResponseFormat {
                provider: self.name().to_string(),
            })
        })?;

        let text = extract_completion(self.name(), parsed)?;
        debug!("Received {} chars from {}", text.len(), self.model);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extracts_all_text_parts() {
        let parsed = response(
            r###"{"candidates": [{"content": {"role": "model", "parts": [
                {"text": "## Personality\n"}, {"text": "Curious."}
            ]}, "finishReason": "STOP"}]}"###,
        );
        assert_eq!(
            extract_completion("gemini", parsed).unwrap(),
            "## Personality\nCurious."
        );
    }

    #[test]
    fn test_blank_completion_is_an_error() {
        let parsed = response(r#"{"candidates": [{"content": {"parts": [{"text": "  \n"}]}}]}"#);
        assert!(matches!(
            extract_completion("gemini", parsed),
            Err(LlmError::EmptyCompletion { .. })
        ));

        let no_candidates = response(r#"{"candidates": []}"#);
        assert!(matches!(
            extract_completion("gemini", no_candidates),
            Err(LlmError::EmptyCompletion { .. })
        ));
    }

    #[test]
    fn test_blocked_prompt() {
        let parsed = response(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#);
        assert!(matches!(
            extract_completion("gemini", parsed),
            Err(LlmError::ContentFiltered { reason }) if reason == "SAFETY"
        ));
    }

    #[test]
    fn test_status_mapping() {
        let invalid_key = r#"{"error": {"code": 400, "status": "INVALID_ARGUMENT", "details": [{"reason": "API_KEY_INVALID"}]}}"#;
        assert!(matches!(
            status_error("gemini", "m", StatusCode::BAD_REQUEST, invalid_key, None),
            LlmError::InvalidApiKey { .. }
        ));
        assert!(matches!(
            status_error("gemini", "m", StatusCode::BAD_REQUEST, "bad request", None),
            LlmError::InvalidPrompt { .. }
        ));
        assert!(matches!(
            status_error("gemini", "gemini-9", StatusCode::NOT_FOUND, "", None),
            LlmError::ModelNotAvailable { model } if model == "gemini-9"
        ));
        assert!(matches!(
            status_error("gemini", "m", StatusCode::TOO_MANY_REQUESTS, "", Some(12)),
            LlmError::RateLimitExceeded { retry_after: 12, .. }
        ));
        assert!(matches!(
            status_error("gemini", "m", StatusCode::SERVICE_UNAVAILABLE, "", None),
            LlmError::ServiceUnavailable { .. }
        ));
    }

    #[test]
    fn test_endpoint() {
        let provider = GeminiProvider::new(
            "key".to_string(),
            GEMINI_DEFAULT_MODEL.to_string(),
            format!("{}/", GEMINI_API_BASE),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(provider.model(), "gemini-2.5-flash");
    }

    #[test]
    fn test_request_body_shape() {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: "<RedditAnalysisRequest/>" }],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "<RedditAnalysisRequest/>");
        assert_eq!(json["contents"][0]["role"], "user");
    }
}
