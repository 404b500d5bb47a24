//! API routes

pub mod account;
pub mod health;
pub mod invitations;
pub mod subscriptions;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, Method,
    },
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::bearer_token, state::AppState};

/// Bearer credential from the Authorization header, passed on unparsed
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()))
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/health", get(health::health));

    let api_routes = Router::new()
        // Invitations
        .route(
            "/fleets/{fleet_id}/invitations",
            post(invitations::invite_user),
        )
        .route(
            "/fleets/{fleet_id}/invitations/respond",
            post(invitations::respond),
        )
        .route(
            "/invitations/respond-by-email",
            post(invitations::respond_by_email),
        )
        // Subscriptions
        .route("/subscriptions", post(subscriptions::create))
        .route("/subscriptions/{id}/cancel", post(subscriptions::cancel))
        .route("/subscriptions/refund", post(subscriptions::refund_and_cancel))
        .route("/customers/{id}", delete(subscriptions::delete_customer))
        // Account
        .route("/account", delete(account::delete_account))
        .route("/account/sign-up", post(account::sign_up))
        .route("/account/sign-in", post(account::sign_in));

    // Bearer credentials only, no cookies, so any origin may call
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}
