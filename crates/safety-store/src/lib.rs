//! Safety Store
//!
//! Persistence for the tourist safety platform:
//!
//! - Users (tourists, police, admins) and their location history
//! - Geofenced zones with spatial lookups
//! - Alerts and their acknowledge/resolve lifecycle
//! - Refresh token records for JWT rotation and revocation
//!
//! Two backends implement [`SafetyStore`]: [`InMemoryStore`] (default) and
//! `PostgresStore` (feature `postgres`), which pushes spatial predicates down
//! to PostGIS.

use thiserror::Error;

pub mod memory;
pub mod model;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
pub use model::*;
pub use traits::{AlertStore, GeofenceStore, SafetyStore, TokenStore, UserStore};

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid alert transition from {from:?} to {to:?}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
