//! Error responses.
//!
//! Every failure leaves the API as `{ "error": code, "message": text }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use imobcrm_auth::{AuthzError, PasswordError, TokenValidationError};
use imobcrm_canalpro::CanalProError;
use imobcrm_core::DomainError;
use imobcrm_infra::{RenewalError, SchedulerError, StoreError, SyncError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Error returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    fn internal(code: &'static str, detail: impl std::fmt::Display) -> Self {
        error!(code, error = %detail, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_error(self.status, self.code, self.message)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::bad_request("validation_error", msg),
            DomainError::InvalidId(msg) => Self::bad_request("invalid_id", msg),
            DomainError::InvariantViolation(msg) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
            }
            DomainError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "not found"),
            DomainError::Conflict(msg) => Self::conflict(msg),
            DomainError::Unauthorized => Self::new(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
            DomainError::LimitExceeded(msg) => Self::new(StatusCode::PAYMENT_REQUIRED, "plan_limit_exceeded", msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity } => Self::not_found(entity),
            StoreError::Conflict { message, .. } => Self::conflict(message),
            backend @ StoreError::Backend { .. } => Self::internal("store_error", backend),
        }
    }
}

impl From<CanalProError> for ApiError {
    fn from(err: CanalProError) -> Self {
        match err {
            CanalProError::RateLimited => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "marketplace_rate_limited",
                "marketplace rate limit reached; try again later",
            ),
            CanalProError::Transport(msg) => Self::new(StatusCode::GATEWAY_TIMEOUT, "marketplace_unavailable", msg),
            other => Self::new(StatusCode::BAD_GATEWAY, "marketplace_error", other.to_string()),
        }
    }
}

impl From<RenewalError> for ApiError {
    fn from(err: RenewalError) -> Self {
        match err {
            RenewalError::NotConnected => Self::new(
                StatusCode::CONFLICT,
                "integration_not_connected",
                "marketplace account is not connected",
            ),
            RenewalError::Rejected(msg) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "marketplace_rejected", msg),
            RenewalError::Api(e) => e.into(),
            RenewalError::Credentials(e) => Self::internal("credential_error", e),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Domain(e) => e.into(),
            SyncError::PropertyNotFound => Self::not_found("property"),
            SyncError::NotPublished => Self::new(
                StatusCode::CONFLICT,
                "not_published",
                "property is not published on the marketplace",
            ),
            SyncError::Renewal(e) => e.into(),
            SyncError::Api(e) => e.into(),
            SyncError::Store(e) => e.into(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ScheduleNotFound => Self::not_found("schedule"),
            SchedulerError::PropertyNotFound => Self::not_found("property"),
            SchedulerError::AlreadyRunning => {
                Self::new(StatusCode::CONFLICT, "already_running", "schedule is already running")
            }
            SchedulerError::Domain(e) => e.into(),
            SchedulerError::Sync(e) => e.into(),
            SchedulerError::Store(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::TenantMismatch => Self::new(StatusCode::FORBIDDEN, "tenant_isolation", "tenant mismatch"),
            AuthzError::Forbidden(perm) => {
                Self::new(StatusCode::FORBIDDEN, "forbidden", format!("missing permission '{perm}'"))
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::internal("password_error", err)
    }
}

impl From<TokenValidationError> for ApiError {
    fn from(err: TokenValidationError) -> Self {
        Self::internal("token_error", err)
    }
}
