//! PostgreSQL + PostGIS backend
//!
//! Records live in a JSONB `data` column; the columns the queries filter or
//! sort on are either generated from it or written alongside. Zone geometry is
//! mirrored into a `geography` column so containment and radius search run in
//! the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geofence::{GeoPoint, Shape};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::model::*;
use crate::traits::*;
use crate::{Result, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and create the schema if it does not exist yet
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!("PostGIS store ready (max_connections={})", max_connections);
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE EXTENSION IF NOT EXISTS postgis;"#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                data JSONB NOT NULL,
                email TEXT GENERATED ALWAYS AS (data->>'email') STORED UNIQUE,
                name TEXT GENERATED ALWAYS AS (data->>'name') STORED,
                role TEXT GENERATED ALWAYS AS (data->>'role') STORED
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS users_role ON users(role);"#,
            r#"
            CREATE TABLE IF NOT EXISTS location_pings (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS location_pings_user_time ON location_pings(user_id, recorded_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS geofences (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                active BOOLEAN NOT NULL,
                data JSONB NOT NULL,
                area GEOGRAPHY NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS geofences_area ON geofences USING GIST(area);"#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                status TEXT GENERATED ALWAYS AS (data->>'status') STORED,
                kind TEXT GENERATED ALWAYS AS (data->>'kind') STORED
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS alerts_created_at ON alerts(created_at DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS alerts_user_id ON alerts(user_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                jti UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS refresh_tokens_user_id ON refresh_tokens(user_id);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json<T: Serialize>(value: &T) -> Result<Value> {
        serde_json::to_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json deserialize error: {}", e)))
    }

    async fn fetch_data<T: DeserializeOwned>(&self, table: &str, id: Uuid) -> Result<Option<T>> {
        let row = sqlx::query(&format!("SELECT data FROM {table} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.map(|r| Self::from_json(r.try_get("data").map_err(query_err)?))
            .transpose()
    }

    /// Load a row under `FOR UPDATE` inside `tx`
    async fn lock_data<T: DeserializeOwned>(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        id: Uuid,
    ) -> Result<T> {
        let row = sqlx::query(&format!("SELECT data FROM {table} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(query_err)?
            .ok_or_else(|| StoreError::NotFound(format!("{table} {id}")))?;

        Self::from_json(row.try_get("data").map_err(query_err)?)
    }

    /// Read-modify-write of a JSONB record in one transaction
    async fn modify<T, F>(&self, table: &str, id: Uuid, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(query_err)?;
        let mut value: T = Self::lock_data(&mut tx, table, id).await?;
        f(&mut value)?;

        sqlx::query(&format!("UPDATE {table} SET data = $2 WHERE id = $1"))
            .bind(id)
            .bind(Self::to_json(&value)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(value)
    }

    fn rows_to<T: DeserializeOwned>(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<T>> {
        rows.into_iter()
            .map(|r| Self::from_json(r.try_get("data").map_err(query_err)?))
            .collect()
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Query(e.to_string())
}

/// EWKT plus an optional buffer radius for the `area` column
fn shape_params(shape: &Shape) -> (String, Option<f64>) {
    match shape {
        Shape::Polygon(polygon) => {
            let vertices = polygon.vertices();
            let ring: Vec<String> = vertices
                .iter()
                .chain(vertices.first())
                .map(|p| format!("{} {}", p.lng, p.lat))
                .collect();
            (format!("SRID=4326;POLYGON(({}))", ring.join(", ")), None)
        }
        Shape::Circle { center, radius_m } => (
            format!("SRID=4326;POINT({} {})", center.lng, center.lat),
            Some(*radius_m),
        ),
    }
}

const AREA_EXPR: &str = "CASE WHEN $5::float8 IS NULL THEN ST_GeogFromText($4) \
                         ELSE ST_Buffer(ST_GeogFromText($4), $5::float8) END";

const POINT_EXPR: &str = "ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography";

#[async_trait]
impl UserStore for PostgresStore {
    async fn insert_user(&self, mut user: User) -> Result<User> {
        user.email = normalize_email(&user.email);
        sqlx::query("INSERT INTO users (id, data) VALUES ($1, $2)")
            .bind(user.id)
            .bind(Self::to_json(&user)?)
            .execute(&self.pool)
            .await
            .map_err(|e| match query_err(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("email {} already registered", user.email))
                }
                other => other,
            })?;
        Ok(user)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        self.fetch_data("users", id).await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT data FROM users WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.map(|r| Self::from_json(r.try_get("data").map_err(query_err)?))
            .transpose()
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT data FROM users WHERE ($1::text IS NULL OR role = $1) ORDER BY name, id",
        )
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        Self::rows_to(rows)
    }

    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        self.modify("users", id, move |user: &mut User| {
            update.apply(user);
            Ok(())
        })
        .await
    }

    async fn set_push_token(&self, id: Uuid, token: Option<String>) -> Result<()> {
        self.modify("users", id, move |user: &mut User| {
            user.push_token = token;
            user.updated_at = Utc::now();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn record_location(&self, user_id: Uuid, fix: LocationFix) -> Result<LocationPing> {
        let ping = LocationPing {
            id: Uuid::new_v4(),
            user_id,
            fix,
        };

        let mut tx = self.pool.begin().await.map_err(query_err)?;
        let mut user: User = Self::lock_data(&mut tx, "users", user_id).await?;
        user.last_location = Some(fix);

        sqlx::query("UPDATE users SET data = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Self::to_json(&user)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        sqlx::query(
            "INSERT INTO location_pings (id, user_id, recorded_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(ping.id)
        .bind(user_id)
        .bind(fix.recorded_at)
        .bind(Self::to_json(&ping)?)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(ping)
    }

    async fn location_history(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationPing>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM location_pings
            WHERE user_id = $1 AND ($2::timestamptz IS NULL OR recorded_at >= $2)
            ORDER BY recorded_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        Self::rows_to(rows)
    }
}

#[async_trait]
impl GeofenceStore for PostgresStore {
    async fn insert_geofence(&self, fence: Geofence) -> Result<Geofence> {
        let (wkt, buffer) = shape_params(&fence.shape);
        sqlx::query(&format!(
            "INSERT INTO geofences (id, name, active, data, area) VALUES ($1, $2, $3, $6, {AREA_EXPR})"
        ))
        .bind(fence.id)
        .bind(&fence.name)
        .bind(fence.active)
        .bind(wkt)
        .bind(buffer)
        .bind(Self::to_json(&fence)?)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(fence)
    }

    async fn geofence(&self, id: Uuid) -> Result<Option<Geofence>> {
        self.fetch_data("geofences", id).await
    }

    async fn list_geofences(&self, active_only: bool) -> Result<Vec<Geofence>> {
        let rows = sqlx::query("SELECT data FROM geofences WHERE active OR NOT $1 ORDER BY name, id")
            .bind(active_only)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        Self::rows_to(rows)
    }

    async fn update_geofence(&self, id: Uuid, update: GeofenceUpdate) -> Result<Geofence> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;
        let mut fence: Geofence = Self::lock_data(&mut tx, "geofences", id).await?;
        update.apply(&mut fence);

        let (wkt, buffer) = shape_params(&fence.shape);
        sqlx::query(&format!(
            "UPDATE geofences SET name = $2, active = $3, data = $6, area = {AREA_EXPR} WHERE id = $1"
        ))
        .bind(id)
        .bind(&fence.name)
        .bind(fence.active)
        .bind(wkt)
        .bind(buffer)
        .bind(Self::to_json(&fence)?)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(fence)
    }

    async fn delete_geofence(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM geofences WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("geofence {id}")));
        }
        Ok(())
    }

    async fn geofences_containing(&self, point: GeoPoint) -> Result<Vec<Geofence>> {
        let rows = sqlx::query(&format!(
            "SELECT data FROM geofences WHERE active AND ST_Covers(area, {POINT_EXPR}) ORDER BY id"
        ))
        .bind(point.lng)
        .bind(point.lat)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        Self::rows_to(rows)
    }

    async fn geofences_near(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<NearbyGeofence>> {
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(StoreError::InvalidData(format!("invalid radius {radius_m}")));
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT data, ST_Distance(area, {POINT_EXPR}) AS distance_m
            FROM geofences
            WHERE active AND ST_DWithin(area, {POINT_EXPR}, $3)
            ORDER BY distance_m, id
            "#
        ))
        .bind(point.lng)
        .bind(point.lat)
        .bind(radius_m)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(NearbyGeofence {
                    geofence: Self::from_json(r.try_get("data").map_err(query_err)?)?,
                    distance_m: r.try_get("distance_m").map_err(query_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn insert_alert(&self, alert: Alert) -> Result<Alert> {
        sqlx::query("INSERT INTO alerts (id, user_id, created_at, data) VALUES ($1, $2, $3, $4)")
            .bind(alert.id)
            .bind(alert.user_id)
            .bind(alert.created_at)
            .bind(Self::to_json(&alert)?)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(alert)
    }

    async fn alert(&self, id: Uuid) -> Result<Option<Alert>> {
        self.fetch_data("alerts", id).await
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM alerts
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::uuid IS NULL OR user_id = $3)
            ORDER BY created_at DESC, id
            LIMIT $4
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.user_id)
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        Self::rows_to(rows)
    }

    async fn transition_alert(&self, id: Uuid, status: AlertStatus, actor: Uuid) -> Result<Alert> {
        self.modify("alerts", id, move |alert: &mut Alert| {
            alert.transition(status, actor)
        })
        .await
    }

    async fn attach_anchor(&self, id: Uuid, receipt: AnchorReceipt) -> Result<Alert> {
        self.modify("alerts", id, move |alert: &mut Alert| {
            alert.anchor = Some(receipt);
            alert.updated_at = Utc::now();
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TokenStore for PostgresStore {
    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, expires_at, revoked, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.jti)
        .bind(record.user_id)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn refresh_token(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query(
            "SELECT jti, user_id, expires_at, revoked, created_at FROM refresh_tokens WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        row.map(|r| {
            Ok(RefreshTokenRecord {
                jti: r.try_get("jti").map_err(query_err)?,
                user_id: r.try_get("user_id").map_err(query_err)?,
                expires_at: r.try_get("expires_at").map_err(query_err)?,
                revoked: r.try_get("revoked").map_err(query_err)?,
                created_at: r.try_get("created_at").map_err(query_err)?,
            })
        })
        .transpose()
    }

    async fn revoke_refresh_token(&self, jti: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = $1 AND NOT revoked")
            .bind(jti)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<usize> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND NOT revoked")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(query_err)?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl SafetyStore for PostgresStore {
    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM users WHERE role = 'tourist') AS tourists,
                (SELECT COUNT(*) FROM users WHERE role <> 'tourist') AS responders,
                (SELECT COUNT(*) FROM geofences) AS geofences,
                (SELECT COUNT(*) FROM geofences WHERE active) AS active_geofences,
                (SELECT COUNT(*) FROM alerts) AS alerts,
                (SELECT COUNT(*) FROM alerts WHERE status <> 'resolved') AS open_alerts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;

        let count = |name: &str| -> Result<usize> {
            row.try_get::<i64, _>(name)
                .map(|n| n as usize)
                .map_err(query_err)
        };

        Ok(StoreStats {
            users: count("users")?,
            tourists: count("tourists")?,
            responders: count("responders")?,
            geofences: count("geofences")?,
            active_geofences: count("active_geofences")?,
            alerts: count("alerts")?,
            open_alerts: count("open_alerts")?,
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
