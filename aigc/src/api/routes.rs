use crate::api::models::{
    event_payload, AnswerInputs, Envelope, MetadataInputs, QuestionsInputs, TaskClock,
    ValidationFailure, WorkflowRequest,
};
use crate::api::server::AppState;
use crate::gateway::{GatewayOutputs, GatewayRequest};
use crate::Error;
use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{error, info, warn};

/// JSON body extractor whose rejection is a 422 with a readable message
pub struct WorkflowJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for WorkflowJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ValidationFailure>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let path = req.uri().path().to_string();
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                let detail = rejection.body_text();
                warn!(path = %path, detail = %detail, "Request validation failed");
                Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ValidationFailure::new(detail)),
                ))
            }
        }
    }
}

/// HTTP status for a failed task
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        Error::RetriesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(endpoint: &'static str, clock: &TaskClock, err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(endpoint, error = %err, "Task failed");
    } else {
        warn!(endpoint, error = %err, "Task rejected");
    }
    metrics::counter!("aigc_requests_failed_total", "endpoint" => endpoint).increment(1);
    let body = Envelope::<GatewayOutputs>::new(clock.failed(err.user_message()));
    (status, Json(body)).into_response()
}

async fn run(state: &AppState, endpoint: &'static str, clock: TaskClock, request: GatewayRequest) -> Response {
    metrics::counter!("aigc_requests_total", "endpoint" => endpoint).increment(1);
    let result = state.gateway.handle(request).await;
    metrics::histogram!("aigc_request_duration_seconds", "endpoint" => endpoint)
        .record(clock.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            info!(
                endpoint,
                cached = outcome.meta.cached,
                latency_ms = outcome.meta.latency_ms,
                "Task succeeded"
            );
            Json(Envelope::new(clock.succeeded(outcome))).into_response()
        }
        Err(e) => failure(endpoint, &clock, e),
    }
}

/// POST /generateQuestions
pub async fn generate_questions(
    State(state): State<AppState>,
    WorkflowJson(req): WorkflowJson<WorkflowRequest<QuestionsInputs>>,
) -> Response {
    let clock = TaskClock::start();
    info!(user = %req.user, "generateQuestions request");
    run(&state, "generateQuestions", clock, req.into_gateway()).await
}

/// POST /getMetadata
pub async fn get_metadata(
    State(state): State<AppState>,
    WorkflowJson(req): WorkflowJson<WorkflowRequest<MetadataInputs>>,
) -> Response {
    let clock = TaskClock::start();
    info!(user = %req.user, "getMetadata request");
    run(&state, "getMetadata", clock, req.into_gateway()).await
}

/// POST /getAnswer, JSON or SSE depending on `stream`
pub async fn get_answer(
    State(state): State<AppState>,
    WorkflowJson(req): WorkflowJson<WorkflowRequest<AnswerInputs>>,
) -> Response {
    let clock = TaskClock::start();
    info!(user = %req.user, stream = req.stream, "getAnswer request");

    if !req.stream {
        return run(&state, "getAnswer", clock, GatewayRequest::Answer(req.answer_input())).await;
    }

    metrics::counter!("aigc_requests_total", "endpoint" => "getAnswer/stream").increment(1);
    let mut rx = match state.gateway.answer_stream(req.answer_input()) {
        Ok(rx) => rx,
        Err(e) => return failure("getAnswer/stream", &clock, e),
    };

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let name = event.name();
            let terminal = event.is_terminal();
            match event_payload(event, &clock) {
                Ok(data) => yield Ok::<Event, Infallible>(Event::default().event(name).data(data)),
                Err(e) => error!(event = name, error = %e, "Failed to encode stream event"),
            }
            if terminal {
                break;
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
        .into_response()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "provider": state.gateway.provider(),
        "cache": state.gateway.cache().health(),
    }))
}

/// GET /metrics
pub async fn metrics_text(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(render) => render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
