//! Account routes

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;

use crate::{error::Envelope, routes::credential, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub fleet_name: String,
    #[serde(default)]
    pub is_individual: bool,
}

pub async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignUpRequest>,
) -> Envelope {
    state
        .service
        .sign_up(credential(&headers), &req.fleet_name, req.is_individual)
        .await
}

pub async fn sign_in(State(state): State<AppState>, headers: HeaderMap) -> Envelope {
    state.service.sign_in(credential(&headers)).await
}

pub async fn delete_account(State(state): State<AppState>, headers: HeaderMap) -> Envelope {
    state.service.delete_account(credential(&headers)).await
}
