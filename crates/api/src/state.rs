//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::service::FleetseatService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FleetseatService>,
    /// Absent when running on the in-memory store
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(service: FleetseatService, pool: Option<PgPool>) -> Self {
        Self {
            service: Arc::new(service),
            pool,
        }
    }
}
