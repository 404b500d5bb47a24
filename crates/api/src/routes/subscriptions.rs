//! Subscription and billing customer routes

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use fleetseat_shared::UserId;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::Envelope, routes::credential, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub payment_method_id: String,
    pub plan: String,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Envelope {
    state
        .service
        .create_subscription(
            credential(&headers),
            &req.payment_method_id,
            &req.plan,
            UserId(req.user_id),
        )
        .await
}

pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subscription_id): Path<String>,
) -> Envelope {
    state
        .service
        .cancel_subscription(credential(&headers), &subscription_id)
        .await
}

pub async fn refund_and_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefundRequest>,
) -> Envelope {
    state
        .service
        .refund_and_cancel(
            credential(&headers),
            &req.invoice_id,
            &req.customer_id,
            &req.subscription_id,
        )
        .await
}

pub async fn delete_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(customer_id): Path<String>,
) -> Envelope {
    state
        .service
        .delete_customer(credential(&headers), &customer_id)
        .await
}
