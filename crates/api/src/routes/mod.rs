//! HTTP routes

mod billing;

use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::require_auth;
use crate::state::AppState;

pub use billing::{
    CreateCheckoutRequest, CreatePortalRequest, SessionResponse, UnlockLeadRequest,
    WebhookAck,
};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/create-checkout", post(billing::create_checkout))
        .route("/create-portal", post(billing::create_portal))
        .route("/unlock-lead", post(billing::unlock_lead))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    // Stripe authenticates itself with the webhook signature
    let public = Router::new()
        .route("/webhook", post(billing::webhook))
        .route("/health", get(health));

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(middleware::from_fn(answer_options))
}

/// CORS preflights are answered by [`cors_layer`]; any other OPTIONS request
/// (no `Access-Control-Request-Method`) gets an empty 200 instead of 405.
async fn answer_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

/// CORS for the marketplace frontend. No configured origins means any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("stripe-signature"),
        ])
        .max_age(Duration::from_secs(86_400))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
