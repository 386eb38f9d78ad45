//! Error taxonomy (spec §7) and its mapping onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream transient failure ({upstream}): {message}")]
    UpstreamTransient { upstream: String, message: String },

    #[error("upstream permanent failure ({upstream}): {message}")]
    UpstreamPermanent { upstream: String, message: String },

    #[error("rejected by safety policy: {0}")]
    SafetyReject(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl AppError {
    pub fn upstream_transient(upstream: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::UpstreamTransient {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    pub fn upstream_permanent(upstream: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::UpstreamPermanent {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTransient { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamPermanent { .. } => StatusCode::BAD_GATEWAY,
            Self::SafetyReject(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalInvariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Any lower-level failure (Neo4j, rig, IO) we haven't specifically
/// classified is treated as an upstream transient failure — it is
/// retried/reported, never silently swallowed.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::upstream_transient("unclassified", e)
    }
}

impl From<neo4rs::Error> for AppError {
    fn from(e: neo4rs::Error) -> Self {
        AppError::upstream_transient("neo4j", e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, Self::InternalInvariant(_)) {
            tracing::error!(error = %self, "internal invariant violated");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
