//! Gemini API client for text, image captioning and audio transcription.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::chatbot::reply;
use crate::chatbot::settings::EffectiveConfig;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const DEFAULT_IMAGE_PROMPT: &str = "What is in this image?";
pub const TRANSCRIBE_PROMPT: &str =
    "Transcribe this audio. Reply with the transcription only, in the language that is spoken.";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Why a generation produced no usable text.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Blocked by the model's safety filters.
    Safety(String),
    /// The model returned no text.
    Empty,
    /// HTTP, API or decoding failure.
    Transport(String),
}

impl GenerationError {
    /// The fixed reply sent in place of model output.
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            GenerationError::Safety(_) => reply::SAFETY_BLOCKED,
            GenerationError::Empty | GenerationError::Transport(_) => reply::GENERATION_FAILED,
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Safety(reason) => write!(f, "blocked by safety filter: {reason}"),
            GenerationError::Empty => write!(f, "empty response"),
            GenerationError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Binary payload sent inline with the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One generation call: resolved settings, prompt text and an optional attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub config: EffectiveConfig,
    pub prompt: String,
    pub attachment: Option<Attachment>,
}

impl GenerationRequest {
    pub fn text(config: EffectiveConfig, prompt: String) -> Self {
        Self { config, prompt, attachment: None }
    }

    pub fn image(config: EffectiveConfig, caption: &str, mime_type: String, data: Vec<u8>) -> Self {
        let caption = caption.trim();
        let prompt = if caption.is_empty() { DEFAULT_IMAGE_PROMPT } else { caption };
        Self {
            config,
            prompt: prompt.to_string(),
            attachment: Some(Attachment { mime_type, data }),
        }
    }

    pub fn transcription(config: EffectiveConfig, mime_type: String, data: Vec<u8>) -> Self {
        Self {
            config,
            prompt: TRANSCRIBE_PROMPT.to_string(),
            attachment: Some(Attachment { mime_type, data }),
        }
    }
}

/// Anything that can turn a request into text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize, Debug)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(InlineData),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_k: u32,
    top_p: f64,
    max_output_tokens: u32,
}

#[derive(Serialize, Debug)]
struct SafetySetting {
    category: &'static str,
    threshold: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

/// Integer parameters must be at least 1.
fn as_count(value: f64) -> u32 {
    value.round().clamp(1.0, u32::MAX as f64) as u32
}

fn build_request(request: &GenerationRequest, safety_threshold: &str) -> GenerateRequest {
    let mut parts = Vec::with_capacity(2);
    if let Some(ref attachment) = request.attachment {
        parts.push(Part::InlineData(InlineData {
            mime_type: attachment.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&attachment.data),
        }));
    }
    parts.push(Part::Text(request.prompt.clone()));

    let params = &request.config.params;
    GenerateRequest {
        contents: vec![Content { role: Some("user"), parts }],
        system_instruction: request
            .config
            .system_instructions
            .as_ref()
            .map(|text| Content { role: None, parts: vec![Part::Text(text.clone())] }),
        generation_config: GenerationConfig {
            temperature: params.temperature,
            top_k: as_count(params.top_k),
            top_p: params.top_p,
            max_output_tokens: as_count(params.max_output_tokens),
        },
        safety_settings: HARM_CATEGORIES
            .into_iter()
            .map(|category| SafetySetting {
                category,
                threshold: safety_threshold.to_string(),
            })
            .collect(),
    }
}

/// Extract the reply text from a `generateContent` response body.
fn parse_response(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Transport(format!("Failed to parse response: {e}")))?;

    if let Some(error) = parsed.error {
        return Err(GenerationError::Transport(format!("Gemini error: {}", error.message)));
    }

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Safety(reason));
    }

    let candidates = parsed.candidates.unwrap_or_default();
    let Some(candidate) = candidates.into_iter().next() else {
        return Err(GenerationError::Empty);
    };

    if let Some(reason) = candidate.finish_reason.as_deref()
        && BLOCKING_FINISH_REASONS.contains(&reason)
    {
        return Err(GenerationError::Safety(reason.to_string()));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    safety_threshold: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, safety_threshold: String) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self { api_key, model, safety_threshold, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE,
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        info!(
            "🤖 Generating with {} ({} chars, attachment: {})",
            self.model,
            request.prompt.len(),
            request.attachment.as_ref().map(|a| a.mime_type.as_str()).unwrap_or("none")
        );

        let body = build_request(&request, &self.safety_threshold);

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(format!("HTTP error: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to read response: {e}")))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(GenerationError::Transport(format!("API error {status}: {text}")));
        }

        let reply = parse_response(&text)?;
        info!("🤖 Generated {} chars", reply.len());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::settings::GenerationParams;

    fn config(instructions: Option<&str>) -> EffectiveConfig {
        EffectiveConfig {
            params: GenerationParams::default(),
            system_instructions: instructions.map(str::to_string),
            bot_name: "Amelie".to_string(),
            active_prompt: None,
        }
    }

    #[test]
    fn test_text_request_shape() {
        let request = GenerationRequest::text(config(None), "alice: hi\nAmelie:".to_string());
        let json = serde_json::to_value(build_request(&request, "BLOCK_NONE")).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "alice: hi\nAmelie:");
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["generationConfig"]["temperature"], 1.5);
        assert_eq!(json["generationConfig"]["topK"], 100);
        assert_eq!(json["generationConfig"]["topP"], 0.95);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn test_system_instruction_included() {
        let request = GenerationRequest::text(config(Some("Your name is Bob. Hi")), "x".to_string());
        let json = serde_json::to_value(build_request(&request, "BLOCK_NONE")).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Your name is Bob. Hi");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_image_request_inlines_data() {
        let request = GenerationRequest::image(config(None), "", "image/png".to_string(), vec![1, 2, 3]);
        assert_eq!(request.prompt, DEFAULT_IMAGE_PROMPT);

        let json = serde_json::to_value(build_request(&request, "BLOCK_NONE")).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert_eq!(parts[1]["text"], DEFAULT_IMAGE_PROMPT);
    }

    #[test]
    fn test_integer_params_rounded() {
        let mut cfg = config(None);
        cfg.params.top_k = 40.6;
        cfg.params.max_output_tokens = 0.0;
        let json = serde_json::to_value(build_request(&GenerationRequest::text(cfg, "x".into()), "BLOCK_NONE")).unwrap();
        assert_eq!(json["generationConfig"]["topK"], 41);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1);
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(parse_response(body), Ok("Hello there".to_string()));
    }

    #[test]
    fn test_parse_prompt_blocked() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(parse_response(body), Err(GenerationError::Safety("SAFETY".to_string())));
    }

    #[test]
    fn test_parse_candidate_blocked() {
        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, GenerationError::Safety(_)));
        assert_eq!(err.fallback_reply(), reply::SAFETY_BLOCKED);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_response(r#"{"candidates":[]}"#), Err(GenerationError::Empty));
        assert_eq!(
            parse_response(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#),
            Err(GenerationError::Empty)
        );
    }

    #[test]
    fn test_parse_api_error_and_garbage() {
        let err = parse_response(r#"{"error":{"message":"bad key"}}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Transport(ref m) if m.contains("bad key")));
        assert!(matches!(parse_response("<html>"), Err(GenerationError::Transport(_))));
        assert_eq!(err.fallback_reply(), reply::GENERATION_FAILED);
    }

    #[test]
    fn test_endpoint_encodes_key() {
        let client = GeminiClient::new("a b&c".to_string(), "gemini-2.5-flash".to_string(), "BLOCK_NONE".to_string()).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=a%20b%26c"
        );
    }
}
