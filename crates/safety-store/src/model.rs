//! Domain records

use chrono::{DateTime, Utc};
use geofence::{GeoPoint, Shape};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::StoreError;

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tourist,
    Police,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tourist => "tourist",
            Role::Police => "police",
            Role::Admin => "admin",
        }
    }

    /// Police and admins see the dashboard
    pub fn is_responder(&self) -> bool {
        matches!(self, Role::Police | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tourist" => Ok(Role::Tourist),
            "police" => Ok(Role::Police),
            "admin" => Ok(Role::Admin),
            other => Err(StoreError::InvalidData(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub point: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPing {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fix: LocationFix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Always stored lowercased
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub nationality: Option<String>,
    pub passport_number: Option<String>,
    #[serde(default)]
    pub emergency_contacts: Vec<EmergencyContact>,
    pub push_token: Option<String>,
    pub last_location: Option<LocationFix>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: &str, role: Role, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: normalize_email(email),
            phone: None,
            role,
            password_hash,
            nationality: None,
            passport_number: None,
            emergency_contacts: Vec::new(),
            push_token: None,
            last_location: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User as shown to clients: no password hash, no push token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub nationality: Option<String>,
    pub passport_number: Option<String>,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub last_location: Option<LocationFix>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            role: user.role,
            nationality: user.nationality.clone(),
            passport_number: user.passport_number.clone(),
            emergency_contacts: user.emergency_contacts.clone(),
            last_location: user.last_location,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub passport_number: Option<String>,
    pub emergency_contacts: Option<Vec<EmergencyContact>>,
}

impl ProfileUpdate {
    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(phone) = self.phone {
            user.phone = Some(phone);
        }
        if let Some(nationality) = self.nationality {
            user.nationality = Some(nationality);
        }
        if let Some(passport) = self.passport_number {
            user.passport_number = Some(passport);
        }
        if let Some(contacts) = self.emergency_contacts {
            user.emergency_contacts = contacts;
        }
        user.updated_at = Utc::now();
    }
}

// ============================================================================
// Geofences
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Safe,
    Caution,
    Restricted,
    Danger,
}

impl ZoneKind {
    /// 0 (safe) to 3 (danger)
    pub fn risk_level(&self) -> u8 {
        match self {
            ZoneKind::Safe => 0,
            ZoneKind::Caution => 1,
            ZoneKind::Restricted => 2,
            ZoneKind::Danger => 3,
        }
    }

    /// Entering these zones raises a breach alert
    pub fn raises_breach(&self) -> bool {
        matches!(self, ZoneKind::Restricted | ZoneKind::Danger)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Safe => "safe",
            ZoneKind::Caution => "caution",
            ZoneKind::Restricted => "restricted",
            ZoneKind::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: ZoneKind,
    pub shape: Shape,
    pub active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Geofence {
    pub fn new(name: impl Into<String>, kind: ZoneKind, shape: Shape) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            kind,
            shape,
            active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeofenceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<ZoneKind>,
    pub shape: Option<Shape>,
    pub active: Option<bool>,
}

impl GeofenceUpdate {
    pub fn apply(self, fence: &mut Geofence) {
        if let Some(name) = self.name {
            fence.name = name;
        }
        if let Some(description) = self.description {
            fence.description = Some(description);
        }
        if let Some(kind) = self.kind {
            fence.kind = kind;
        }
        if let Some(shape) = self.shape {
            fence.shape = shape;
        }
        if let Some(active) = self.active {
            fence.active = active;
        }
        fence.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyGeofence {
    pub geofence: Geofence,
    pub distance_m: f64,
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Panic,
    GeofenceBreach,
    Medical,
    Inactivity,
    Other,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Panic => "panic",
            AlertKind::GeofenceBreach => "geofence_breach",
            AlertKind::Medical => "medical",
            AlertKind::Inactivity => "inactivity",
            AlertKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::Open, AlertStatus::Acknowledged)
                | (AlertStatus::Open, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx_hash: String,
    pub block_height: u64,
    pub digest: String,
    pub anchored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: AlertKind,
    pub status: AlertStatus,
    pub location: Option<GeoPoint>,
    pub message: Option<String>,
    #[serde(default)]
    pub geofence_ids: Vec<Uuid>,
    pub anchor: Option<AnchorReceipt>,
    pub acknowledged_by: Option<Uuid>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(user_id: Uuid, kind: AlertKind, location: Option<GeoPoint>, message: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            status: AlertStatus::Open,
            location,
            message,
            geofence_ids: Vec::new(),
            anchor: None,
            acknowledged_by: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn transition(&mut self, next: AlertStatus, actor: Uuid) -> Result<(), StoreError> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            AlertStatus::Acknowledged => self.acknowledged_by = Some(actor),
            AlertStatus::Resolved => {
                self.resolved_by = Some(actor);
                self.resolved_at = Some(now);
            }
            AlertStatus::Open => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub kind: Option<AlertKind>,
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.kind.map_or(true, |k| alert.kind == k)
            && self.user_id.map_or(true, |u| alert.user_id == u)
    }
}

// ============================================================================
// Tokens & stats
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub users: usize,
    pub tourists: usize,
    pub responders: usize,
    pub geofences: usize,
    pub active_geofences: usize,
    pub alerts: usize,
    pub open_alerts: usize,
}
