//! Storage trait definitions.
//!
//! Each concern gets its own trait; [`SafetyStore`] bundles them for the
//! gateway, which holds an `Arc<dyn SafetyStore>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geofence::GeoPoint;
use uuid::Uuid;

use crate::model::*;
use crate::Result;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with `Conflict` if the email is taken.
    async fn insert_user(&self, user: User) -> Result<User>;

    async fn user(&self, id: Uuid) -> Result<Option<User>>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// All users, optionally restricted to one role, ordered by name then id
    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>>;

    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User>;

    async fn set_push_token(&self, id: Uuid, token: Option<String>) -> Result<()>;

    /// Append a ping and make it the user's `last_location`
    async fn record_location(&self, user_id: Uuid, fix: LocationFix) -> Result<LocationPing>;

    /// Newest first
    async fn location_history(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationPing>>;
}

#[async_trait]
pub trait GeofenceStore: Send + Sync {
    async fn insert_geofence(&self, fence: Geofence) -> Result<Geofence>;

    async fn geofence(&self, id: Uuid) -> Result<Option<Geofence>>;

    /// Ordered by name then id
    async fn list_geofences(&self, active_only: bool) -> Result<Vec<Geofence>>;

    async fn update_geofence(&self, id: Uuid, update: GeofenceUpdate) -> Result<Geofence>;

    async fn delete_geofence(&self, id: Uuid) -> Result<()>;

    /// Active zones containing the point (boundary inclusive), ordered by id
    async fn geofences_containing(&self, point: GeoPoint) -> Result<Vec<Geofence>>;

    /// Active zones within `radius_m`, nearest first, ties by id
    async fn geofences_near(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<NearbyGeofence>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: Alert) -> Result<Alert>;

    async fn alert(&self, id: Uuid) -> Result<Option<Alert>>;

    /// Newest first, ties by id
    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>>;

    /// Apply a lifecycle transition atomically
    async fn transition_alert(&self, id: Uuid, status: AlertStatus, actor: Uuid) -> Result<Alert>;

    async fn attach_anchor(&self, id: Uuid, receipt: AnchorReceipt) -> Result<Alert>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<()>;

    async fn refresh_token(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>>;

    /// Returns whether the token was live before this call
    async fn revoke_refresh_token(&self, jti: Uuid) -> Result<bool>;

    /// Revoke every live token for the user; returns how many were revoked
    async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<usize>;
}

#[async_trait]
pub trait SafetyStore: UserStore + GeofenceStore + AlertStore + TokenStore {
    async fn stats(&self) -> Result<StoreStats>;

    /// Short backend name for health output
    fn backend(&self) -> &'static str;
}
