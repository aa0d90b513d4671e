//! Gemini generateContent adapter

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Generation, GenerationRequest, Generator, TextStream, UpstreamError};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini REST client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct SafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn tokens_used(&self) -> u32 {
        self.usage_metadata
            .as_ref()
            .and_then(|u| u.total_token_count)
            .unwrap_or(0)
    }

    fn blocked_reason(&self) -> Option<String> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()) {
            return Some(reason);
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                Some(reason.to_string())
            }
            _ => None,
        }
    }
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("Gemini API key is empty".to_string()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            api_key
                .trim()
                .parse()
                .map_err(|_| Error::Config("Gemini API key is not a valid header value".to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    fn body<'a>(request: &'a GenerationRequest) -> GenerateRequest<'a> {
        let generation_config =
            if request.max_output_tokens.is_some() || request.temperature.is_some() {
                Some(GenerationConfig {
                    max_output_tokens: request.max_output_tokens,
                    temperature: request.temperature,
                })
            } else {
                None
            };

        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config,
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: *category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }

    async fn post(&self, url: String, request: &GenerationRequest) -> std::result::Result<reqwest::Response, UpstreamError> {
        let response = self
            .client
            .post(url)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

/// Parse one streamed chunk. `None` for chunks without text.
fn parse_stream_chunk(data: &str) -> std::result::Result<Option<String>, UpstreamError> {
    let chunk: GenerateResponse =
        serde_json::from_str(data).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    if let Some(reason) = chunk.blocked_reason() {
        return Err(UpstreamError::InvalidRequest(format!("response blocked: {}", reason)));
    }
    let text = chunk.text();
    Ok(if text.is_empty() { None } else { Some(text) })
}

#[async_trait]
impl Generator for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<Generation, UpstreamError> {
        let response = self.post(self.endpoint("generateContent"), request).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        if let Some(reason) = parsed.blocked_reason() {
            return Err(UpstreamError::InvalidRequest(format!("response blocked: {}", reason)));
        }

        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(UpstreamError::Malformed("empty candidate text".to_string()));
        }

        Ok(Generation {
            text,
            tokens_used: parsed.tokens_used(),
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> std::result::Result<TextStream, UpstreamError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(url, request).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        yield Err(UpstreamError::from_reqwest(e));
                        return;
                    }
                }

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim_end().strip_prefix("data:") else {
                        continue;
                    };
                    match parse_stream_chunk(data.trim()) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            let rest = String::from_utf8_lossy(&buffer);
            if let Some(data) = rest.trim().strip_prefix("data:") {
                match parse_stream_chunk(data.trim()) {
                    Ok(Some(text)) => yield Ok(text),
                    Ok(None) => {}
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = GenerationRequest::new("hello").max_output_tokens(800).temperature(0.7);
        let body = serde_json::to_value(GeminiClient::body(&request)).unwrap();

        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 800);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_plain_request_has_no_generation_config() {
        let body = serde_json::to_value(GeminiClient::body(&GenerationRequest::new("x"))).unwrap();
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_response_text_and_tokens() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{
                "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "world"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 12}
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.text(), "Hello world");
        assert_eq!(parsed.tokens_used(), 12);
        assert!(parsed.blocked_reason().is_none());
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let text = parse_stream_chunk(r#"{"candidates":[{"content":{"parts":[{"text":"abc"}]}}]}"#).unwrap();
        assert_eq!(text.as_deref(), Some("abc"));

        let empty = parse_stream_chunk(r#"{"candidates":[],"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(empty.is_none());

        assert!(matches!(parse_stream_chunk("{oops"), Err(UpstreamError::Malformed(_))));
        assert!(matches!(
            parse_stream_chunk(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#),
            Err(UpstreamError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(GeminiClient::new("  ", "gemini-2.0-flash", None, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let client = GeminiClient::new("k", "gemini-2.0-flash", Some("http://localhost:9/"), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint("generateContent"),
            "http://localhost:9/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
