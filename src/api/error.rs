//! JSON error envelope.
//!
//! Every failed request answers with
//! `{"error": {"code", "message", "details", "request_id"}}`. Internal
//! failures are logged with their cause and answered with a redacted message.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use super::middleware::current_request_id;
use crate::error::{DomainError, ScoringError, WorkflowError};
use crate::service::ServiceError;
use crate::storage::StorageError;

/// An error rendered as the JSON envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", message)
    }

    pub fn timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", "request timed out")
    }

    /// Logs `cause` and returns a redacted 500.
    pub fn internal(cause: &dyn std::fmt::Display) -> Self {
        error!(request_id = %current_request_id(), error = %cause, "Request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
                "request_id": current_request_id(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::unprocessable(err.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::InvalidTransition { kind, from, to } => ApiError::conflict(message)
                .with_details(json!({ "kind": kind, "from": from, "to": to })),
            WorkflowError::ApprovalRequired(_)
            | WorkflowError::NoPendingApproval
            | WorkflowError::DuplicateDecision(_)
            | WorkflowError::AlreadyResolved => ApiError::conflict(message),
            WorkflowError::GuardFailed(_)
            | WorkflowError::SelfApproval(_)
            | WorkflowError::NotEligible(_)
            | WorkflowError::InvalidQuorum => ApiError::unprocessable(message),
        }
    }
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        let message = err.to_string();
        match err {
            ScoringError::MissingResponse(questions) => {
                ApiError::unprocessable(message).with_details(json!({ "questions": questions }))
            }
            ScoringError::UnknownQuestion(question)
            | ScoringError::InvalidResponse { question, .. } => {
                ApiError::unprocessable(message).with_details(json!({ "question": question }))
            }
            ScoringError::Io(e) => ApiError::internal(&e),
            _ => ApiError::unprocessable(message),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            StorageError::Conflict(message) => ApiError::conflict(message),
            other => ApiError::internal(&other),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::RecordNotFound(id) => {
                ApiError::not_found(format!("Record {} not found", id))
                    .with_details(json!({ "record_id": id }))
            }
            ServiceError::Domain(e) => e.into(),
            ServiceError::Workflow(e) => e.into(),
            ServiceError::Scoring(e) => e.into(),
            ServiceError::Storage(e) => e.into(),
            ServiceError::Queue(e) => ApiError::internal(&e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let message = rejection.body_text();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            ApiError::unprocessable(message)
        } else {
            ApiError::new(status, "bad_request", message)
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (
                ServiceError::RecordNotFound(Uuid::new_v4()).into(),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                WorkflowError::DuplicateDecision("bob".into()).into(),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                StorageError::Conflict("stale version".into()).into(),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                WorkflowError::GuardFailed("root_cause".into()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
            ),
            (
                DomainError::InvalidTenant("X".into()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
            ),
            (
                StorageError::ConnectionFailed("postgres://user:secret@db".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status, status);
            assert_eq!(err.code, code);
        }
    }

    #[test]
    fn test_internal_message_is_redacted() {
        let err: ApiError = StorageError::ConnectionFailed("postgres://user:secret@db".into()).into();
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn test_invalid_transition_details() {
        let err: ApiError = WorkflowError::InvalidTransition {
            kind: "capa".into(),
            from: "draft".into(),
            to: "closed".into(),
        }
        .into();
        assert_eq!(err.details["from"], "draft");
        assert_eq!(err.details["to"], "closed");
    }
}
