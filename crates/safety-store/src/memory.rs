//! In-memory backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use geofence::{GeoPoint, GeofenceIndex};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::model::*;
use crate::traits::*;
use crate::{Result, StoreError};

/// DashMap tables plus a spatial index over active zones.
///
/// The index lock is taken before touching `geofences` on every write path so
/// the two never disagree about which zones are active.
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
    pings: DashMap<Uuid, Vec<LocationPing>>,
    geofences: DashMap<Uuid, Geofence>,
    index: RwLock<GeofenceIndex<Uuid>>,
    alerts: DashMap<Uuid, Alert>,
    tokens: DashMap<Uuid, RefreshTokenRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, id: Uuid) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, mut user: User) -> Result<User> {
        user.email = normalize_email(&user.email);

        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "email {} already registered",
                user.email
            ))),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let id = match self.emails.get(&normalize_email(email)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.user(id).await
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .map(|u| u.clone())
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        let mut user = self.users.get_mut(&id).ok_or_else(|| not_found("user", id))?;
        update.apply(&mut user);
        Ok(user.clone())
    }

    async fn set_push_token(&self, id: Uuid, token: Option<String>) -> Result<()> {
        let mut user = self.users.get_mut(&id).ok_or_else(|| not_found("user", id))?;
        user.push_token = token;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn record_location(&self, user_id: Uuid, fix: LocationFix) -> Result<LocationPing> {
        {
            let mut user = self
                .users
                .get_mut(&user_id)
                .ok_or_else(|| not_found("user", user_id))?;
            user.last_location = Some(fix);
        }

        let ping = LocationPing {
            id: Uuid::new_v4(),
            user_id,
            fix,
        };
        self.pings.entry(user_id).or_default().push(ping.clone());
        Ok(ping)
    }

    async fn location_history(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationPing>> {
        let mut history: Vec<LocationPing> = self
            .pings
            .get(&user_id)
            .map(|pings| {
                pings
                    .iter()
                    .filter(|p| since.map_or(true, |s| p.fix.recorded_at >= s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        history.sort_by(|a, b| b.fix.recorded_at.cmp(&a.fix.recorded_at));
        history.truncate(limit);
        Ok(history)
    }
}

#[async_trait]
impl GeofenceStore for InMemoryStore {
    async fn insert_geofence(&self, fence: Geofence) -> Result<Geofence> {
        let mut index = self.index.write();
        if self.geofences.contains_key(&fence.id) {
            return Err(StoreError::Conflict(format!("geofence {}", fence.id)));
        }
        if fence.active {
            index.insert(fence.id, fence.shape.clone());
        }
        self.geofences.insert(fence.id, fence.clone());
        debug!("Indexed geofence {} ({} active)", fence.id, index.len());
        Ok(fence)
    }

    async fn geofence(&self, id: Uuid) -> Result<Option<Geofence>> {
        Ok(self.geofences.get(&id).map(|g| g.clone()))
    }

    async fn list_geofences(&self, active_only: bool) -> Result<Vec<Geofence>> {
        let mut fences: Vec<Geofence> = self
            .geofences
            .iter()
            .filter(|g| !active_only || g.active)
            .map(|g| g.clone())
            .collect();
        fences.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(fences)
    }

    async fn update_geofence(&self, id: Uuid, update: GeofenceUpdate) -> Result<Geofence> {
        let mut index = self.index.write();
        let mut fence = self.geofences.get_mut(&id).ok_or_else(|| not_found("geofence", id))?;
        update.apply(&mut fence);

        if fence.active {
            index.insert(id, fence.shape.clone());
        } else {
            index.remove(&id);
        }
        Ok(fence.clone())
    }

    async fn delete_geofence(&self, id: Uuid) -> Result<()> {
        let mut index = self.index.write();
        self.geofences
            .remove(&id)
            .ok_or_else(|| not_found("geofence", id))?;
        index.remove(&id);
        debug!("Removed geofence {} ({} active)", id, index.len());
        Ok(())
    }

    async fn geofences_containing(&self, point: GeoPoint) -> Result<Vec<Geofence>> {
        let index = self.index.read();
        Ok(index
            .containing(&point)
            .into_iter()
            .filter_map(|id| self.geofences.get(id).map(|g| g.clone()))
            .collect())
    }

    async fn geofences_near(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<NearbyGeofence>> {
        let index = self.index.read();
        let hits = index
            .within_radius(&point, radius_m)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        Ok(hits
            .into_iter()
            .filter_map(|(id, distance_m)| {
                self.geofences.get(id).map(|g| NearbyGeofence {
                    geofence: g.clone(),
                    distance_m,
                })
            })
            .collect())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_alert(&self, alert: Alert) -> Result<Alert> {
        match self.alerts.entry(alert.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("alert {}", alert.id))),
            Entry::Vacant(slot) => {
                slot.insert(alert.clone());
                Ok(alert)
            }
        }
    }

    async fn alert(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.get(&id).map(|a| a.clone()))
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn transition_alert(&self, id: Uuid, status: AlertStatus, actor: Uuid) -> Result<Alert> {
        let mut alert = self.alerts.get_mut(&id).ok_or_else(|| not_found("alert", id))?;
        alert.transition(status, actor)?;
        Ok(alert.clone())
    }

    async fn attach_anchor(&self, id: Uuid, receipt: AnchorReceipt) -> Result<Alert> {
        let mut alert = self.alerts.get_mut(&id).ok_or_else(|| not_found("alert", id))?;
        alert.anchor = Some(receipt);
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<()> {
        self.tokens.insert(record.jti, record);
        Ok(())
    }

    async fn refresh_token(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.tokens.get(&jti).map(|t| t.clone()))
    }

    async fn revoke_refresh_token(&self, jti: Uuid) -> Result<bool> {
        match self.tokens.get_mut(&jti) {
            Some(mut record) => {
                let was_live = !record.revoked;
                record.revoked = true;
                Ok(was_live)
            }
            None => Ok(false),
        }
    }

    async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<usize> {
        let mut revoked = 0;
        for mut record in self.tokens.iter_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl SafetyStore for InMemoryStore {
    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for user in self.users.iter() {
            stats.users += 1;
            match user.role {
                Role::Tourist => stats.tourists += 1,
                Role::Police | Role::Admin => stats.responders += 1,
            }
        }
        stats.geofences = self.geofences.len();
        stats.active_geofences = self.index.read().len();
        stats.alerts = self.alerts.len();
        stats.open_alerts = self
            .alerts
            .iter()
            .filter(|a| a.status != AlertStatus::Resolved)
            .count();

        Ok(stats)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
