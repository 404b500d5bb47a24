//! API error types and the result envelope

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetseat_billing::BillingError;
use fleetseat_shared::StoreError;
use serde::{Deserialize, Serialize};

/// Uniform result of every operation. `status` reuses HTTP codes as a domain
/// result code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    pub status: u16,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::OK.as_u16(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),

    // Validation errors
    #[error("{0}")]
    Validation(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),

    // Plan policy denials
    #[error("{0}")]
    PlanLimit(String),

    // Billing provider errors
    #[error("{0}")]
    ProviderRejected(String),
    #[error("Billing provider error: {0}")]
    Provider(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::PlanLimit(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) | ApiError::ProviderRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Provider(_) | ApiError::Database(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to the caller
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) => "Database error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope {
            message: self.public_message(),
            status: self.status().as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_envelope().into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("Not found: {}", what)),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Corrupt(msg) | StoreError::Database(msg) => {
                tracing::error!(error = %msg, "Store error");
                ApiError::Database(msg)
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        if err.is_plan_limit() {
            return ApiError::PlanLimit(err.to_string());
        }
        match err {
            BillingError::Store(store) => store.into(),
            BillingError::InvalidInput(_)
            | BillingError::InvalidPlan(_)
            | BillingError::SubscriptionNotActive(_)
            | BillingError::RefundFailed(_)
            | BillingError::NoRefundableCharge(_) => ApiError::ProviderRejected(err.to_string()),
            BillingError::Forbidden(_) => ApiError::Forbidden(err.to_string()),
            BillingError::AlreadyCancelled => ApiError::Conflict(err.to_string()),
            BillingError::CustomerNotFound(_) | BillingError::SubscriptionNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            BillingError::StripeApi(_) | BillingError::Timeout(_) | BillingError::Config(_) => {
                tracing::error!(error = %err, "Billing provider failure");
                ApiError::Provider(err.to_string())
            }
            // Plan-limit variants are handled above
            other => ApiError::PlanLimit(other.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_limit_is_forbidden_with_message() {
        let err: ApiError = BillingError::SeatLimitReached {
            plan: "STANDARD".to_string(),
            used: 5,
            limit: 5,
        }
        .into();
        let envelope = err.into_envelope();
        assert_eq!(envelope.status, 403);
        assert!(envelope.message.contains("STANDARD"));
        assert!(envelope.message.contains('5'));
    }

    #[test]
    fn test_billing_error_mapping() {
        let cases = [
            (BillingError::AlreadyCancelled, 409),
            (BillingError::SubscriptionNotActive("incomplete".into()), 400),
            (BillingError::RefundFailed("expired_or_canceled_card".into()), 400),
            (BillingError::CustomerNotFound("cus_1".into()), 404),
            (BillingError::Timeout("retrieve_subscription".into()), 500),
            (BillingError::TrialEnded, 403),
            (BillingError::BillingHold("past_due".into()), 403),
            (BillingError::Forbidden("not yours".into()), 403),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), status);
        }
    }

    #[test]
    fn test_store_errors_hide_database_detail() {
        let err: ApiError = StoreError::Database("connection reset".into()).into();
        let envelope = err.into_envelope();
        assert_eq!(envelope.status, 500);
        assert_eq!(envelope.message, "Database error");

        let err: ApiError = StoreError::Conflict("pending invitation exists".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_ok_envelope() {
        let envelope = Envelope::ok("Invitation sent");
        assert!(envelope.is_success());
        assert_eq!(envelope.status, 200);
    }
}
