//! HTTP boundary.
//!
//! ## Routes
//!
//! | Method | Path                     | Operation                            |
//! |--------|--------------------------|--------------------------------------|
//! | POST   | `/api/register-machine`  | [`BindingEngine::register_machine`]  |
//! | POST   | `/api/check-machine`     | [`BindingEngine::check_machine`]     |
//! | POST   | `/api/validate-license`  | [`ValidationService::validate_license`] |
//! | GET    | `/health`                | liveness                             |
//!
//! ## Middleware stack (execution order)
//!
//! ```text
//! TraceLayer → throttle → handler
//! ```
//!
//! `/health` is mounted outside the throttle.

pub mod error;
pub mod handlers;
pub mod rate_limit;

use crate::clock::Clock;
use crate::config::LicensegateConfig;
use crate::engine::BindingEngine;
use crate::store::BindingStore;
use crate::validation::ValidationService;
use crate::LicensegateError;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use rate_limit::RateLimiter;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState<S: BindingStore> {
    /// Binding engine.
    pub engine: BindingEngine<S>,
    /// License validation.
    pub validation: ValidationService<S>,
    /// Include internal error detail in 500 responses.
    pub expose_internal_errors: bool,
}

impl<S: BindingStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            validation: self.validation.clone(),
            expose_internal_errors: self.expose_internal_errors,
        }
    }
}

impl<S: BindingStore> AppState<S> {
    /// State for a configured deployment.
    pub fn new(
        engine: BindingEngine<S>,
        validation: ValidationService<S>,
        config: &LicensegateConfig,
    ) -> Self {
        Self {
            engine,
            validation,
            expose_internal_errors: config.expose_internal_errors,
        }
    }
}

/// Assemble the application router.
pub fn router<S: BindingStore + 'static>(state: AppState<S>, limiter: RateLimiter) -> Router {
    let api = Router::new()
        .route("/api/register-machine", post(handlers::register_machine::<S>))
        .route("/api/check-machine", post(handlers::check_machine::<S>))
        .route("/api/validate-license", post(handlers::validate_license::<S>))
        .layer(from_fn_with_state(limiter, rate_limit::throttle))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
}

/// Wire engine, validation service and throttle for a configured deployment.
pub fn app<S: BindingStore + 'static>(
    store: Arc<S>,
    config: &LicensegateConfig,
    clock: Arc<dyn Clock>,
) -> Result<Router, LicensegateError> {
    let engine = BindingEngine::with_clock(Arc::clone(&store), config, Arc::clone(&clock))?;
    let validation = ValidationService::with_clock(store, config.credential, clock);
    let state = AppState::new(engine, validation, config);
    Ok(router(state, RateLimiter::new(config.rate_limit.clone())))
}
