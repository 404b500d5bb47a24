//! Fleet invitation routes

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use fleetseat_shared::FleetId;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::Envelope, routes::credential, state::AppState};

#[derive(Debug, Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// ACCEPTED or REJECTED
    pub action: String,
    pub skip_fleet_switch: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RespondByEmailRequest {
    pub fleet_id: Uuid,
    pub email: String,
    pub action: String,
    pub skip_fleet_switch: Option<bool>,
}

pub async fn invite_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(fleet_id): Path<Uuid>,
    Json(req): Json<InviteUserRequest>,
) -> Envelope {
    state
        .service
        .invite_user(credential(&headers), FleetId(fleet_id), &req.email)
        .await
}

pub async fn respond(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(fleet_id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> Envelope {
    state
        .service
        .respond_to_invitation(
            credential(&headers),
            FleetId(fleet_id),
            &req.action,
            req.skip_fleet_switch,
        )
        .await
}

pub async fn respond_by_email(
    State(state): State<AppState>,
    Json(req): Json<RespondByEmailRequest>,
) -> Envelope {
    state
        .service
        .respond_to_invitation_by_email(
            FleetId(req.fleet_id),
            &req.email,
            &req.action,
            req.skip_fleet_switch,
        )
        .await
}
