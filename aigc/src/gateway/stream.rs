//! Streaming answers
//!
//! A single producer task emits typed events into a bounded channel:
//! `Started`, zero or more `Chunk`s, `Citations`, then `Finished`, or an
//! `Error` as the terminal event. If the receiver goes away the producer
//! keeps draining the model stream so the assembled answer still lands in
//! the cache.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::answer::{AnswerInput, AnswerOutputs, Citation};
use super::{present, Gateway, Outcome};
use crate::cache::TtlClass;
use crate::upstream::UpstreamError;
use crate::{Error, Result};

/// Events buffered between producer and client
pub const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Started { stage: &'static str, ts: DateTime<Utc> },
    Chunk(String),
    Citations(Vec<Citation>),
    Finished(Outcome<AnswerOutputs>),
    /// Terminal failure, human readable
    Error(String),
}

impl AnswerEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            AnswerEvent::Started { .. } => "workflow_started",
            AnswerEvent::Chunk(_) => "token_chunk",
            AnswerEvent::Citations(_) => "citations",
            AnswerEvent::Finished(_) => "workflow_finished",
            AnswerEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnswerEvent::Finished(_) | AnswerEvent::Error(_))
    }

    fn started() -> Self {
        AnswerEvent::Started {
            stage: "retrieved_content",
            ts: Utc::now(),
        }
    }
}

/// Sender that remembers when the client has gone
struct EventSink {
    tx: mpsc::Sender<AnswerEvent>,
    connected: bool,
}

impl EventSink {
    async fn send(&mut self, event: AnswerEvent) {
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.connected = false;
            debug!("Stream receiver dropped, continuing without delivery");
        }
    }

    async fn fail(&mut self, error: &Error) {
        metrics::counter!("aigc_stream_errors_total").increment(1);
        self.send(AnswerEvent::Error(error.user_message())).await;
    }
}

/// Rough token count for streamed text, where the provider reports no usage:
/// one per whitespace-separated word, one per character in non-ASCII runs.
fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace()
        .map(|word| if word.is_ascii() { 1 } else { word.chars().count() as u32 })
        .sum()
}

impl Gateway {
    /// Start a streaming answer. Input problems are reported here; anything
    /// later arrives as an `Error` event.
    pub fn answer_stream(self: &Arc<Self>, input: AnswerInput) -> Result<mpsc::Receiver<AnswerEvent>> {
        input.validate()?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway.produce_answer(input, tx).await;
        });
        Ok(rx)
    }

    async fn produce_answer(&self, input: AnswerInput, tx: mpsc::Sender<AnswerEvent>) {
        let started = Instant::now();
        let mut sink = EventSink { tx, connected: true };
        let key = input.cache_key();

        if let Some(hit) = self.lookup::<AnswerOutputs>(&key, started).await {
            sink.send(AnswerEvent::started()).await;
            sink.send(AnswerEvent::Chunk(hit.outputs.result.clone())).await;
            sink.send(AnswerEvent::Citations(hit.outputs.citations.clone())).await;
            sink.send(AnswerEvent::Finished(hit)).await;
            return;
        }

        let content = match self
            .sessions
            .resolve_or_fetch(
                present(input.content_id.as_deref()),
                input.url.as_deref(),
                input.context.as_deref(),
            )
            .await
        {
            Ok(content) => content,
            Err(e) => {
                sink.fail(&e).await;
                return;
            }
        };

        sink.send(AnswerEvent::started()).await;

        // Retries only cover opening the stream; once text has been sent a
        // failure is terminal for this response.
        let request = input.generation_request(&content.text);
        let mut chunks = match self
            .retry
            .run("generate_answer_stream", |_| self.generator.generate_stream(&request))
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                sink.fail(&e).await;
                return;
            }
        };

        let mut full = String::new();
        let mut chunk_count = 0usize;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(text) => {
                    chunk_count += 1;
                    full.push_str(&text);
                    sink.send(AnswerEvent::Chunk(text)).await;
                }
                Err(e) => {
                    warn!(chunks = chunk_count, error = %e, "Answer stream failed mid-way");
                    sink.fail(&Error::Upstream(e)).await;
                    return;
                }
            }
        }

        if full.trim().is_empty() {
            sink.fail(&Error::Upstream(UpstreamError::Malformed(
                "model stream produced no text".to_string(),
            )))
            .await;
            return;
        }

        let outputs = AnswerOutputs::new(full);
        let tokens = estimate_tokens(&outputs.result);
        let outcome = self.fresh(outputs, tokens, started);
        self.store(&key, TtlClass::Answers, &outcome).await;

        if sink.connected {
            info!(chunks = chunk_count, chars = outcome.outputs.result.chars().count(), "Answer streamed");
        } else {
            info!(chunks = chunk_count, "Client left mid-stream, answer drained and cached");
        }

        sink.send(AnswerEvent::Citations(outcome.outputs.citations.clone())).await;
        sink.send(AnswerEvent::Finished(outcome)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(AnswerEvent::started().name(), "workflow_started");
        assert_eq!(AnswerEvent::Chunk("x".into()).name(), "token_chunk");
        assert_eq!(AnswerEvent::Citations(vec![]).name(), "citations");
        assert_eq!(AnswerEvent::Error("x".into()).name(), "error");
        assert!(AnswerEvent::Error("x".into()).is_terminal());
        assert!(!AnswerEvent::Chunk("x".into()).is_terminal());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("hello brave new world"), 4);
        assert_eq!(estimate_tokens("台積電 rose"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
