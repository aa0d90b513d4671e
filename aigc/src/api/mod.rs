//! HTTP surface: workflow endpoints, SSE streaming, health and metrics

pub mod models;
pub mod routes;
pub mod server;

pub use models::{Envelope, EnvelopeData, TaskStatus, WorkflowRequest};
pub use server::{ApiServer, AppState, MetricsRenderer};
