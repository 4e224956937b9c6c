//! Language-model fallback for bills the rule engine cannot read.
//!
//! [`LlmClient`] is the seam the extractor talks to; [`AnthropicClient`]
//! implements it against the Messages API. The model is asked for a bare
//! JSON object carrying the four policy fields plus affected institution
//! types.

use std::time::Duration;

use async_trait::async_trait;
use billscope_core::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ExternalServiceError;
use crate::normalize::sample;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Instructions sent ahead of the bill text.
const EXTRACTION_PROMPT: &str = r#"Extract policy parameters from this education bill text. Return ONLY valid JSON with these keys:
- funding_change_pct: number or null (percentage change in state funding, negative for cuts)
- min_wage_change: number or null (change in the minimum wage, dollars per hour)
- childcare_subsidy: number or null (childcare subsidy, dollars per year)
- tuition_cap_pct: number or null (cap on tuition increases, percent)
- affected_types: list of strings drawn from "public", "private", "community" (empty if the bill applies to all institutions)

Example output:
{"funding_change_pct": -10.0, "min_wage_change": 2.0, "childcare_subsidy": 3000.0, "tuition_cap_pct": 5.0, "affected_types": ["public", "community"]}

Return ONLY the JSON object, no markdown, no explanations.

Bill text:
"#;

/// Fields a language model returned. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmParameters {
    pub funding_change_pct: Option<f64>,
    pub min_wage_change: Option<f64>,
    pub childcare_subsidy: Option<f64>,
    pub tuition_cap_pct: Option<f64>,
    #[serde(alias = "affected_institution_types")]
    pub affected_types: Option<Vec<String>>,
}

/// An external structured-extraction service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Short service name for call records and logs.
    fn service(&self) -> &str;

    fn model(&self) -> &str;

    /// Request a structured extraction of `text`. One attempt, no retry.
    async fn extract(&self, text: &str) -> Result<LlmParameters, ExternalServiceError>;
}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_input_chars: usize,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    /// Build a client from config. Fails without an API key.
    ///
    /// `base_url` should be like `https://api.anthropic.com` (no trailing slash).
    pub fn new(config: &LlmConfig) -> Result<Self, ExternalServiceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ExternalServiceError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_input_chars: config.max_input_chars,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn service(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(&self, text: &str) -> Result<LlmParameters, ExternalServiceError> {
        let url = format!("{}/v1/messages", self.base_url);
        let prompt = format!("{EXTRACTION_PROMPT}{}", sample(text, self.max_input_chars));
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        info!(url = %url, model = %self.model, "requesting language-model extraction");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(e, &url, self.timeout_secs))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(e, &url, self.timeout_secs))?;
        let text = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .find_map(|b| b.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExternalServiceError::EmptyResponse)?;

        debug!(chars = text.len(), "language-model response received");
        parse_response(&text)
    }
}

/// Parse a model reply, tolerating a surrounding markdown code fence.
pub fn parse_response(reply: &str) -> Result<LlmParameters, ExternalServiceError> {
    Ok(serde_json::from_str(strip_fences(reply))?)
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}
