//! Wire types for the workflow endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::fingerprint::decode_input;
use crate::gateway::{
    AnswerEvent, AnswerInput, Citation, GatewayRequest, MetadataInput, Outcome, QuestionsInput,
    ResponseMeta,
};

fn default_user() -> String {
    "uuid_user".to_string()
}

fn default_lang() -> String {
    "zh-tw".to_string()
}

/// Request body shared by every workflow endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRequest<I> {
    pub inputs: I,
    /// Accepted for compatibility; not part of any cache key
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionsInputs {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default, deserialize_with = "list_or_text")]
    pub previous_questions: Vec<String>,
    #[serde(default)]
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataInputs {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub tag_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerInputs {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
}

/// `previous_questions` arrives either as a list or as a (usually empty)
/// newline separated string.
fn list_or_text<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrText {
        List(Vec<String>),
        Text(String),
        Null(()),
    }

    Ok(match ListOrText::deserialize(deserializer)? {
        ListOrText::List(items) => items
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect(),
        ListOrText::Text(text) => text
            .lines()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .collect(),
        ListOrText::Null(()) => Vec::new(),
    })
}

fn decoded(value: Option<String>) -> Option<String> {
    value.map(|v| decode_input(&v))
}

impl WorkflowRequest<QuestionsInputs> {
    pub fn into_gateway(self) -> GatewayRequest {
        let inputs = self.inputs;
        GatewayRequest::Questions(QuestionsInput {
            url: decoded(inputs.url),
            context: decoded(inputs.context),
            prompt: inputs.prompt,
            lang: inputs.lang,
            previous_questions: inputs.previous_questions,
            content_id: inputs.content_id,
            kind: Some(self.kind.unwrap_or_else(|| "answer_page".to_string())),
            source_url: decoded(self.source_url),
        })
    }
}

impl WorkflowRequest<MetadataInputs> {
    pub fn into_gateway(self) -> GatewayRequest {
        let inputs = self.inputs;
        GatewayRequest::Metadata(MetadataInput {
            url: decode_input(&inputs.url),
            query: inputs.query,
            tag_prompt: inputs.tag_prompt,
        })
    }
}

impl WorkflowRequest<AnswerInputs> {
    pub fn answer_input(&self) -> AnswerInput {
        let inputs = self.inputs.clone();
        AnswerInput {
            query: inputs.query,
            url: decoded(inputs.url),
            context: decoded(inputs.context),
            prompt: inputs.prompt,
            content_id: inputs.content_id,
            lang: inputs.lang,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// The `data` object of a response, also the `workflow_finished` SSE payload
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeData<T> {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds
    pub elapsed_time: f64,
    pub created_at: i64,
    pub finished_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// Clock readings taken when a request arrives
#[derive(Debug, Clone, Copy)]
pub struct TaskClock {
    created_at: DateTime<Utc>,
    started: Instant,
}

impl TaskClock {
    pub fn start() -> Self {
        Self {
            created_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn finish<T>(&self, status: TaskStatus) -> EnvelopeData<T> {
        EnvelopeData {
            status,
            outputs: None,
            error: None,
            elapsed_time: self.elapsed().as_secs_f64(),
            created_at: self.created_at.timestamp(),
            finished_at: Utc::now().timestamp(),
            provider: None,
            meta: None,
        }
    }

    pub fn succeeded<T>(&self, outcome: Outcome<T>) -> EnvelopeData<T> {
        EnvelopeData {
            outputs: Some(outcome.outputs),
            provider: Some(outcome.provider),
            meta: Some(outcome.meta),
            ..self.finish(TaskStatus::Succeeded)
        }
    }

    pub fn failed<T>(&self, error: String) -> EnvelopeData<T> {
        EnvelopeData {
            error: Some(error),
            ..self.finish(TaskStatus::Failed)
        }
    }
}

/// Non-streaming response body
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub task_id: String,
    pub event: &'static str,
    pub data: EnvelopeData<T>,
}

impl<T> Envelope<T> {
    pub fn new(data: EnvelopeData<T>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            event: "workflow_finished",
            data,
        }
    }
}

#[derive(Serialize)]
struct StartedPayload {
    stage: &'static str,
    ts: String,
}

#[derive(Serialize)]
struct ChunkPayload<'a> {
    chunk: &'a str,
}

#[derive(Serialize)]
struct CitationsPayload<'a> {
    citations: &'a [Citation],
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

/// JSON `data:` line for one stream event
pub fn event_payload(event: AnswerEvent, clock: &TaskClock) -> serde_json::Result<String> {
    match event {
        AnswerEvent::Started { stage, ts } => serde_json::to_string(&StartedPayload {
            stage,
            ts: ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }),
        AnswerEvent::Chunk(chunk) => serde_json::to_string(&ChunkPayload { chunk: &chunk }),
        AnswerEvent::Citations(citations) => {
            serde_json::to_string(&CitationsPayload { citations: &citations })
        }
        AnswerEvent::Finished(outcome) => serde_json::to_string(&clock.succeeded(outcome)),
        AnswerEvent::Error(error) => serde_json::to_string(&ErrorPayload { error: &error }),
    }
}

/// Body returned when the JSON extractor rejects a request
#[derive(Debug, Serialize)]
pub struct ValidationFailure {
    pub detail: String,
    pub message: &'static str,
}

impl ValidationFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            message: "Request validation failed. Please check your request format.",
        }
    }
}
