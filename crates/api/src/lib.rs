//! Fleetseat API
//!
//! Fleet invitations gated by seat-limited subscriptions.
//!
//! ## Seat-consuming requests
//!
//! `invite_user` refreshes the owner's subscription against the billing
//! provider, takes the fleet's lock, checks the seat guard and only then runs
//! the invitation state machine. A denial at any of those steps happens before
//! the first write.

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod invitations;
pub mod notifications;
pub mod routes;
pub mod service;
pub mod state;

pub use error::{ApiError, ApiResult, Envelope};
pub use service::{FleetseatService, ServiceDeps};
pub use state::AppState;
