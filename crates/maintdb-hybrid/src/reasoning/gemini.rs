use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use maintdb_core::config::ReasoningSettings;

use super::{is_quota_message, ReasoningError, ReasoningService};

/// Blocking client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig<'a> {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "stopSequences")]
    stop_sequences: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(settings: &ReasoningSettings, api_key: String) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ReasoningError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

impl ReasoningService for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String, ReasoningError> {
        let body = GenerateRequest {
            contents: vec![RequestContent { role: "user", parts: vec![RequestPart { text: prompt }] }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                stop_sequences: stop,
            },
        };
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ReasoningError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().map_err(|e| ReasoningError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_failure(status, &text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| ReasoningError::InvalidResponse(e.to_string()))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::InvalidResponse("no candidates returned".into()))?;
        let out: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        tracing::debug!(model = %self.model, chars = out.len(), "reasoning completion");
        Ok(out)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> ReasoningError {
    let msg = format!("Gemini API error {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || is_quota_message(body) {
        ReasoningError::Quota(msg)
    } else if status.is_server_error() {
        ReasoningError::Unavailable(msg)
    } else {
        ReasoningError::Rejected(msg)
    }
}
