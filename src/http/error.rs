//! Mapping of core errors onto HTTP responses.
//!
//! Every failure uses the common [`ApiResponse`] envelope. Internal error
//! detail is only included when the deployment explicitly enables it.

use crate::protocol::models::ApiResponse;
use crate::LicensegateError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Message returned for every internal failure.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// A core error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    error: LicensegateError,
    expose_internal: bool,
    probe: bool,
}

impl ApiError {
    /// Wrap a core error.
    pub fn new(error: LicensegateError, expose_internal: bool) -> Self {
        Self {
            error,
            expose_internal,
            probe: false,
        }
    }

    /// Mark the error as the answer to a machine probe, so not-found
    /// responses carry `exists: false`.
    pub fn for_probe(mut self) -> Self {
        self.probe = true;
        self
    }

    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        status_for(&self.error)
    }
}

/// HTTP status for a core error.
pub fn status_for(error: &LicensegateError) -> StatusCode {
    match error {
        LicensegateError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LicensegateError::LicenseNotFound
        | LicensegateError::ClientNotFound { .. }
        | LicensegateError::MachineNotFound => StatusCode::NOT_FOUND,
        LicensegateError::LicenseInactive
        | LicensegateError::LicenseExpired
        | LicensegateError::CapacityExceeded { .. } => StatusCode::BAD_REQUEST,
        LicensegateError::AlreadyRegistered { .. }
        | LicensegateError::DuplicateFingerprint { .. } => StatusCode::CONFLICT,
        LicensegateError::ConfigError(_)
        | LicensegateError::Storage(_)
        | LicensegateError::SnapshotIO(_)
        | LicensegateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Malformed or non-JSON bodies are validation failures.
pub fn rejection_error(rejection: JsonRejection) -> LicensegateError {
    LicensegateError::field("body", rejection.body_text())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if self.error.is_internal() {
            tracing::error!(error = %self.error, "internal server error");
            let mut body = ApiResponse::<()>::failure(INTERNAL_MESSAGE.to_string());
            if self.expose_internal {
                body.error = Some(self.error.to_string());
            }
            return (status, Json(body)).into_response();
        }

        let mut body = ApiResponse::<()>::failure(self.error.to_string());
        body.machine_id = self.error.conflicting_machine_id().map(str::to_string);
        if self.probe && status == StatusCode::NOT_FOUND {
            body.exists = Some(false);
        }
        if let LicensegateError::ValidationFailed { errors } = self.error {
            body.errors = Some(errors);
        }

        (status, Json(body)).into_response()
    }
}
