//! Fleetseat Shared Types and Storage
//!
//! This crate contains the membership documents, store trait and database
//! utilities shared across the Fleetseat services.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use store::{InMemoryMembershipStore, MembershipStore, PgMembershipStore};
pub use types::*;
