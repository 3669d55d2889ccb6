//! Chat-completion client for message summaries

use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{CompletionError, EmailDigest, Summarizer};
use crate::config::{OpenAiCredentials, Settings};
use crate::http::HttpTransport;
use crate::models::{Message, Summary};

const SYSTEM_PROMPT: &str = "You are an email summarizer. Your task is to extract key information \
and return it in JSON format. Remove any markdown formatting from your response.";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// The JSON object the model is asked to produce
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPayload {
    main_points: MainPoints,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    needs_response: bool,
}

/// Models occasionally answer with a list of points instead of prose
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MainPoints {
    Text(String),
    Points(Vec<String>),
}

/// Summarizer backed by the OpenAI chat-completions endpoint
pub struct OpenAiSummarizer {
    http: Arc<dyn HttpTransport>,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiSummarizer {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1/chat/completions";

    pub fn new(
        http: Arc<dyn HttpTransport>,
        credentials: OpenAiCredentials,
        settings: &Settings,
    ) -> Self {
        Self {
            http,
            api_key: credentials.api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, digest: &EmailDigest<'_>) -> serde_json::Value {
        let user_prompt = format!(
            "Analyze this email and respond with a JSON object containing:\n\
             - mainPoints: A 2-3 sentence summary of the core message\n\
             - actionItems: Array of specific actions required\n\
             - needsResponse: Boolean indicating if a response is expected\n\
             \n\
             Email:\n\
             Subject: {}\n\
             From: {}\n\
             Content: {}",
            digest.subject, digest.from, digest.content
        );

        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": self.temperature,
        })
    }
}

impl Summarizer for OpenAiSummarizer {
    fn summarize_once(&self, message: &Message) -> Result<Summary, CompletionError> {
        let body = self.request_body(&EmailDigest::from_message(message));
        let bearer = format!("Bearer {}", self.api_key);

        debug!("Requesting summary for message {}", message.id);
        let response = self
            .http
            .post_json(
                &self.endpoint,
                &[
                    ("Content-Type", "application/json"),
                    ("Authorization", bearer.as_str()),
                ],
                &body,
            )
            .map_err(|e| CompletionError::Failed(format!("{:#}", e)))?;

        if response.status == 429 {
            return Err(CompletionError::RateLimited);
        }
        if !response.is_success() {
            let reason = serde_json::from_str::<ApiErrorBody>(&response.body)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("API request failed (HTTP {})", response.status));
            return Err(CompletionError::Failed(reason));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .map_err(|e| CompletionError::Failed(format!("{:#}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                CompletionError::Failed("Invalid response format from OpenAI".to_string())
            })?;

        parse_summary(&content)
    }
}

/// Remove a surrounding markdown code fence (```json ... ``` or ``` ... ```)
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let opened = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let closed = opened.trim_end().strip_suffix("```").unwrap_or(opened);
    closed.trim()
}

fn parse_summary(content: &str) -> Result<Summary, CompletionError> {
    let payload: SummaryPayload = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| CompletionError::Failed(format!("unparseable summary: {}", e)))?;

    let main_points = match payload.main_points {
        MainPoints::Text(text) => text,
        MainPoints::Points(points) => points.join(" "),
    };

    Ok(Summary {
        main_points,
        action_items: payload.action_items,
        needs_response: payload.needs_response,
        error: None,
    })
}
