use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, error, warn};

use crate::blob::BlobError;
use crate::models::{EntityKind, Pid};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not changed: {0}")]
    Unchanged(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Dependency unresolved: {child_kind} {child_pid} still references {parent_kind} {parent_pid}"
    )]
    DependencyConflict {
        parent_kind: EntityKind,
        parent_pid: Pid,
        child_kind: EntityKind,
        child_pid: Pid,
    },

    #[error("Invariant conflict: {0}")]
    InvariantConflict(String),

    #[error("Cascade stopped after {deleted} deletion(s): {source}")]
    PartialCascade {
        deleted: u64,
        #[source]
        source: Box<AppError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification reported to callers next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputInvalid,
    NotFound,
    DependencyConflict,
    InvariantConflict,
    StoreError,
    PartialCascadeFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "input_invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DependencyConflict => "dependency_conflict",
            ErrorKind::InvariantConflict => "invariant_conflict",
            ErrorKind::StoreError => "store_error",
            ErrorKind::PartialCascadeFailure => "partial_cascade_failure",
        }
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_)
            | AppError::Unchanged(_)
            | AppError::Blob(BlobError::InvalidName(_)) => ErrorKind::InputInvalid,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::DependencyConflict { .. } => ErrorKind::DependencyConflict,
            AppError::InvariantConflict(_) => ErrorKind::InvariantConflict,
            AppError::Database(_) | AppError::Blob(_) | AppError::Internal(_) => {
                ErrorKind::StoreError
            }
            AppError::PartialCascade { .. } => ErrorKind::PartialCascadeFailure,
        }
    }

    /// Wraps a failure that interrupted a cascade after `deleted` roots were removed.
    /// A nested partial failure is flattened to its cause.
    pub fn partial(deleted: u64, err: AppError) -> Self {
        AppError::PartialCascade {
            deleted,
            source: Box::new(err.into_cause()),
        }
    }

    pub fn into_cause(self) -> AppError {
        match self {
            AppError::PartialCascade { source, .. } => source.into_cause(),
            other => other,
        }
    }

    /// The error that actually stopped the operation.
    pub fn cause(&self) -> &AppError {
        match self {
            AppError::PartialCascade { source, .. } => source.cause(),
            other => other,
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = self.kind().as_str();

        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
            }
            AppError::Blob(BlobError::InvalidName(name)) => {
                warn!(name = %name, context = %ctx, "Invalid blob name");
            }
            AppError::Blob(err) => {
                error!(error = %message, context = %ctx, blob_error = %err, "Blob storage error");
            }
            AppError::Validation(msg) | AppError::Unchanged(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
            }
            AppError::DependencyConflict { .. } => {
                warn!(message = %message, context = %ctx, "Dependency conflict");
            }
            AppError::InvariantConflict(msg) => {
                warn!(message = %msg, context = %ctx, "Invariant conflict");
            }
            AppError::PartialCascade { deleted, .. } => {
                error!(error = %message, deleted = %deleted, context = %ctx, "Partial cascade failure");
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            if self.kind() == ErrorKind::StoreError
                || self.kind() == ErrorKind::PartialCascadeFailure
            {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Blob(BlobError::InvalidName(_)) => Status::BadRequest,
            AppError::Blob(BlobError::Unavailable(_)) => Status::ServiceUnavailable,
            AppError::Blob(_) => Status::InternalServerError,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Unchanged(_) => Status::Conflict,
            AppError::NotFound(_) => Status::NotFound,
            AppError::DependencyConflict { .. } => Status::Conflict,
            AppError::InvariantConflict(_) => Status::Conflict,
            AppError::PartialCascade { source, .. } => source.status_code(),
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn to_status_with_log(&self, context: &str) -> Status {
        self.log_and_record(context);
        self.status_code()
    }
}

/// JSON body sent for every failed request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub status: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    /// Kind of the error that stopped a partial cascade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorKind>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let (deleted, cause) = match err {
            AppError::PartialCascade { deleted, .. } => (Some(*deleted), Some(err.cause().kind())),
            _ => (None, None),
        };

        Self {
            status: "error".to_string(),
            kind: err.kind(),
            message: err.to_string(),
            deleted,
            cause,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status =
            self.to_status_with_log(&format!("Request to {} {}", req.method(), req.uri()));
        Custom(status, Json(ErrorResponse::from(&self))).respond_to(req)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("Document serialization error: {}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |error| {
                    error
                        .message
                        .clone()
                        .map(|msg| msg.to_string())
                        .unwrap_or_else(|| format!("Invalid value for {}", field))
                })
            })
            .collect();
        messages.sort();

        AppError::Validation(messages.join("; "))
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.to_status_with_log("Error conversion into Status")
    }
}
