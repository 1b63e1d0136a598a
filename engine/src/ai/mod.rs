//! AI client backing the rule oracle and scheme suggestion.
//!
//! Uses the Anthropic Messages API. Two calls are made:
//!
//! - per-row rule evaluation ([`RuleOracle`]), one request per rule and row
//! - mapping-scheme suggestion from placeholders and table previews
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docbatch::ai::AiClient;
//!
//! let client = AiClient::from_env()?;
//! let outcome = client.suggest_scheme(&placeholders, &tables, None).await?;
//! ```

pub mod prompt;

use serde::Deserialize;
use std::env;

use crate::error::AiError;
use crate::logs::{log_info_indent, log_warning_indent};
use crate::models::{Row, TableSet};
use crate::rules::{RuleOracle, RuleOutcome};
use crate::scheme::document::extract_json;
use crate::scheme::{parse_scheme_response, SchemeParseOutcome};

pub use prompt::{rule_system_prompt, scheme_system_prompt};

/// Anthropic API client
#[derive(Clone)]
pub struct AiClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

/// Anthropic API response structure
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default number of retries
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Token budget for a single rule answer
const RULE_MAX_TOKENS: u32 = 512;

impl AiClient {
    /// Create a new client with explicit API key
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a client from `ANTHROPIC_API_KEY`, honoring `DOCBATCH_MODEL`.
    pub fn from_env() -> Result<Self, AiError> {
        let _ = dotenvy::dotenv();

        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AiError::MissingApiKey("ANTHROPIC_API_KEY not set".to_string()))?;

        let client = Self::new(api_key);
        Ok(match env::var("DOCBATCH_MODEL") {
            Ok(model) if !model.trim().is_empty() => client.with_model(model.trim()),
            _ => client,
        })
    }

    /// Set the model to use
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the number of attempts per request (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for a mapping scheme.
    ///
    /// Transport failures are returned as errors. An unusable answer is not:
    /// it yields the fallback scheme with `used_fallback` set.
    pub async fn suggest_scheme(
        &self,
        placeholders: &[String],
        tables: &TableSet,
        instruction: Option<&str>,
    ) -> Result<SchemeParseOutcome, AiError> {
        log_info_indent(
            format!(
                "Suggesting scheme for {} placeholders over {} tables",
                placeholders.len(),
                tables.len()
            ),
            1,
        );
        let system = prompt::scheme_system_prompt();
        let user = prompt::scheme_user_prompt(placeholders, tables, instruction);
        let response = self.call_with_retries(&system, user, self.max_tokens).await?;
        Ok(parse_scheme_response(&response, placeholders, &tables.names()))
    }

    /// Retry loop around [`AiClient::call_api`].
    async fn call_with_retries(&self, system: &str, user: String, max_tokens: u32) -> Result<String, AiError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.call_api(system, &user, max_tokens).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    log_warning_indent(format!("Attempt {}/{} failed: {}", attempt, self.max_retries, e), 1);
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        log_info_indent(format!("Retrying in {}ms...", RETRY_DELAY_MS), 1);
                        tokio::time::sleep(tokio::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AiError::ApiError("Unknown error".to_string())))
    }

    /// Call Anthropic API
    async fn call_api(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, AiError> {
        let client = reqwest::Client::new();

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": 0,
            "system": system,
            "messages": prompt::build_messages(user.to_string())
        });

        let response = client
            .post("https://api.anthropic.com/v1/messages")
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(AiError::ApiError(error.error.message));
            }
            return Err(AiError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| AiError::InvalidJson(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AiError::InvalidJson("Empty response".to_string()));
        }

        Ok(text)
    }
}

impl RuleOracle for AiClient {
    async fn evaluate(&self, rule: &str, row: &Row) -> Result<RuleOutcome, AiError> {
        let system = prompt::rule_system_prompt();
        let user = prompt::rule_user_prompt(rule, row);
        let response = self.call_with_retries(&system, user, RULE_MAX_TOKENS).await?;
        parse_rule_response(&response)
    }
}

/// Read `{"result": ..., "error": ...}` from a rule answer.
///
/// A bare non-JSON answer is taken as the result itself.
fn parse_rule_response(response: &str) -> Result<RuleOutcome, AiError> {
    let json_str = extract_json(response);
    match serde_json::from_str::<serde_json::Value>(&json_str) {
        Ok(serde_json::Value::Object(obj)) => {
            let result = obj.get("result").map(crate::models::value_to_string).unwrap_or_default();
            let error = obj
                .get("error")
                .and_then(|e| e.as_str())
                .filter(|e| !e.trim().is_empty())
                .map(str::to_string);
            Ok(RuleOutcome { result, error })
        }
        Ok(_) | Err(_) if !response.trim().is_empty() && !response.trim_start().starts_with('{') => {
            Ok(RuleOutcome::ok(response.trim()))
        }
        _ => Err(AiError::ParseError(format!(
            "unreadable rule answer: {}",
            &response[..response.len().min(200)]
        ))),
    }
}
