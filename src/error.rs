use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::features::audit::service::AuditError;
use crate::features::auth::service::AuthError;
use crate::features::auth::mfa::MfaError;
use crate::features::crdt::CrdtError;
use crate::features::hub::HubError;
use crate::features::jobs::JobError;
use crate::features::rbac::RbacError;
use crate::features::workspace::WorkspaceError;

/// Transport-agnostic error kinds, unified behind one type so gateway-level
/// handlers that cross several services can `?`-propagate a single error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication required")]
    AuthRequired,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Mfa(#[from] MfaError),
    #[error(transparent)]
    Rbac(#[from] RbacError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition failed: {0}")]
    Preconditioned(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Auth(e) => e.to_status_code(),
            AppError::Mfa(e) => e.to_status_code(),
            AppError::Rbac(e) => e.to_status_code(),
            AppError::Workspace(e) => e.to_status_code(),
            AppError::Crdt(e) => e.to_status_code(),
            AppError::Job(e) => e.to_status_code(),
            AppError::Hub(e) => e.to_status_code(),
            AppError::Audit(e) => e.to_status_code(),
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Preconditioned(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "AuthRequired",
            AppError::Auth(_) => "AuthInvalid",
            AppError::Mfa(_) => "AuthInvalid",
            AppError::Rbac(_) => "PermissionDenied",
            AppError::Workspace(_) => "Workspace",
            AppError::Crdt(_) => "Crdt",
            AppError::Job(_) => "Job",
            AppError::Hub(_) => "Hub",
            AppError::Audit(_) => "Internal",
            AppError::NotFound => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Preconditioned(_) => "Preconditioned",
            AppError::Invalid(_) => "Invalid",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::ResourceExhausted => "ResourceExhausted",
            AppError::Database(_) => "Internal",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            ok: false,
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
