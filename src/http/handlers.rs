//! Endpoint handlers.
//!
//! Handlers only translate: parse the body, run the core operation on the
//! blocking pool, and wrap the outcome in the response envelope.

use crate::http::error::{rejection_error, ApiError};
use crate::http::AppState;
use crate::protocol::models::{
    ApiResponse, CheckMachineRequest, RegisterMachineRequest, Registration,
    ValidateLicenseRequest,
};
use crate::store::BindingStore;
use crate::LicensegateError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Run a core call off the async runtime; the store may write a snapshot.
async fn blocking<T, F>(f: F) -> Result<T, LicensegateError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LicensegateError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LicensegateError::Internal(format!("worker task failed: {}", e)))?
}

/// `POST /api/register-machine`
pub async fn register_machine<S: BindingStore + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<RegisterMachineRequest>, JsonRejection>,
) -> Response {
    let expose = state.expose_internal_errors;
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return ApiError::new(rejection_error(rejection), expose).into_response(),
    };

    let engine = state.engine.clone();
    match blocking(move || engine.register_machine(&request)).await {
        Ok(Registration::Created(data)) => (
            StatusCode::CREATED,
            Json(ApiResponse::ok(
                Some("Machine registered successfully".to_string()),
                data,
            )),
        )
            .into_response(),
        Ok(Registration::Moved(data)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                Some("Machine moved to new license successfully".to_string()),
                data,
            )),
        )
            .into_response(),
        Err(e) => ApiError::new(e, expose).into_response(),
    }
}

/// `POST /api/check-machine`
pub async fn check_machine<S: BindingStore + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<CheckMachineRequest>, JsonRejection>,
) -> Response {
    let expose = state.expose_internal_errors;
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::new(rejection_error(rejection), expose)
                .for_probe()
                .into_response()
        }
    };

    let engine = state.engine.clone();
    match blocking(move || engine.check_machine(&request)).await {
        Ok(probe) => Json(ApiResponse::ok(
            Some("Machine found and registered".to_string()),
            probe,
        ))
        .into_response(),
        Err(e) => ApiError::new(e, expose).for_probe().into_response(),
    }
}

/// `POST /api/validate-license`
pub async fn validate_license<S: BindingStore + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<ValidateLicenseRequest>, JsonRejection>,
) -> Response {
    let expose = state.expose_internal_errors;
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return ApiError::new(rejection_error(rejection), expose).into_response(),
    };

    let validation = state.validation.clone();
    match blocking(move || validation.validate_license(&request)).await {
        Ok(snapshot) => Json(ApiResponse::ok(None, snapshot)).into_response(),
        Err(e) => ApiError::new(e, expose).into_response(),
    }
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
