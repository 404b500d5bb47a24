//! Router wiring: status codes and JSON envelopes over HTTP

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use fleetseat_api::{
    audit::MemoryAuditSink, auth::StaticIdentity, notifications::RecordingDispatcher,
    routes::create_router, AppState, FleetseatService, ServiceDeps,
};
use fleetseat_billing::{MockBillingGateway, PriceIds};
use fleetseat_shared::{InMemoryMembershipStore, MembershipStore, UserId};
use serde_json::{json, Value};
use tower::ServiceExt;

const OWNER_TOKEN: &str = "owner-token";
const DRIVER_TOKEN: &str = "driver-token";

fn router() -> (Router, Arc<InMemoryMembershipStore>) {
    let store = Arc::new(InMemoryMembershipStore::new());
    let identity = StaticIdentity::new()
        .with(OWNER_TOKEN, UserId::new(), "owner@example.com")
        .with(DRIVER_TOKEN, UserId::new(), "driver@example.com");
    let service = FleetseatService::new(ServiceDeps {
        store: store.clone(),
        gateway: Arc::new(MockBillingGateway::new()),
        identity: Arc::new(identity),
        notifier: Arc::new(RecordingDispatcher::new()),
        audit: Arc::new(MemoryAuditSink::new()),
        prices: PriceIds::default(),
        trial_months: 2,
    });
    (create_router(AppState::new(service, None)), store)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_in_memory_backend() {
    let (app, _) = router();
    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "in-memory");
}

#[tokio::test]
async fn invite_without_credential_is_401_envelope() {
    let (app, _) = router();
    let uri = format!("/fleets/{}/invitations", uuid::Uuid::new_v4());
    let (status, body) = call(
        &app,
        Method::POST,
        &uri,
        None,
        Some(json!({ "email": "driver@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn sign_up_invite_and_accept_over_http() {
    let (app, store) = router();

    let (status, body) = call(
        &app,
        Method::POST,
        "/account/sign-up",
        Some(OWNER_TOKEN),
        Some(json!({ "fleet_name": "Acme Haulage" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let fleet = store
        .fleets_owned_by("owner@example.com")
        .await
        .unwrap()
        .pop()
        .unwrap();

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/fleets/{}/invitations", fleet.id.0),
        Some(OWNER_TOKEN),
        Some(json!({ "email": "driver@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Invitation sent to driver@example.com");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/fleets/{}/invitations/respond", fleet.id.0),
        Some(DRIVER_TOKEN),
        Some(json!({ "action": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let fleet = store.get_fleet(fleet.id).await.unwrap().unwrap();
    assert_eq!(fleet.members_emails, vec!["driver@example.com".to_string()]);
}

#[tokio::test]
async fn respond_by_email_for_unknown_invitee_is_404() {
    let (app, _) = router();
    let (status, body) = call(
        &app,
        Method::POST,
        "/invitations/respond-by-email",
        None,
        Some(json!({
            "fleet_id": uuid::Uuid::new_v4(),
            "email": "driver@example.com",
            "action": "ACCEPTED",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
}
