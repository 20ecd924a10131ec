//! Auth API Routes
//!
//! - POST /auth/register  self-service tourist sign-up
//! - POST /auth/login     email + password
//! - POST /auth/refresh   rotate a refresh token
//! - POST /auth/logout    revoke a refresh token

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use safety_store::{EmergencyContact, ProfileUpdate, Role, User, UserProfile};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, TokenKind, TokenPair};
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;

// ========== Request/Response Types ==========

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub passport_number: Option<String>,
    #[serde(default)]
    pub emergency_contacts: Vec<EmergencyContact>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub tokens: TokenPair,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// Name, email and password checks shared with admin user creation
pub fn new_user(name: &str, email: &str, password: &str, role: Role) -> ApiResult<User> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    let email = email.trim();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::BadRequest(format!("Invalid email '{email}'")));
    }
    Ok(User::new(name, email, role, hash_password(password)?))
}

/// Sign a new access/refresh pair and persist the refresh jti
pub async fn issue_pair(state: &AppState, user: &User) -> ApiResult<TokenPair> {
    let access_token = state.tokens.issue_access(user)?;
    let (refresh_token, record) = state.tokens.issue_refresh(user)?;
    state.store.insert_refresh_token(record).await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".into(),
        expires_in: state.tokens.access_ttl_secs(),
    })
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let mut user = new_user(&req.name, &req.email, &req.password, Role::Tourist)?;
    ProfileUpdate {
        name: None,
        phone: req.phone,
        nationality: req.nationality,
        passport_number: req.passport_number,
        emergency_contacts: Some(req.emergency_contacts),
    }
    .apply(&mut user);

    let user = state.store.insert_user(user).await?;
    let tokens = issue_pair(&state, &user).await?;
    info!("Registered tourist {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.profile(),
            tokens,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let user = state
        .store
        .user_by_email(&req.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&req.password, &user.password_hash) {
        return Err(invalid());
    }

    let tokens = issue_pair(&state, &user).await?;
    Ok(Json(AuthResponse {
        user: user.profile(),
        tokens,
    }))
}

/// Rotation: the presented token is revoked and a fresh pair issued. Presenting
/// an already revoked token means it leaked, so every token of that user is
/// revoked.
async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let claims = state.tokens.verify(&req.refresh_token, TokenKind::Refresh)?;
    let jti = claims
        .jti
        .ok_or_else(|| ApiError::Unauthorized("Refresh token has no id".into()))?;

    let record = state
        .store
        .refresh_token(jti)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown refresh token".into()))?;

    // A concurrent refresh with the same token also counts as reuse
    let was_live = !record.revoked && state.store.revoke_refresh_token(jti).await?;
    if !was_live {
        let revoked = state.store.revoke_user_tokens(record.user_id).await?;
        warn!(
            "Refresh token reuse for user {}; revoked {} tokens",
            record.user_id, revoked
        );
        return Err(ApiError::Unauthorized("Refresh token reuse detected".into()));
    }
    if record.expires_at <= Utc::now() {
        return Err(ApiError::Unauthorized("Refresh token expired".into()));
    }

    let user = state
        .store
        .user(record.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))?;

    Ok(Json(issue_pair(&state, &user).await?))
}

async fn logout(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<StatusCode> {
    let claims = state.tokens.verify(&req.refresh_token, TokenKind::Refresh)?;
    if let Some(jti) = claims.jti {
        state.store.revoke_refresh_token(jti).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_login() {
        let app = TestApp::new();
        let (status, body) = app
            .post(
                "/api/v1/auth/register",
                None,
                json!({
                    "name": "Lena",
                    "email": "Lena@Example.com",
                    "password": "trekking-2024",
                    "nationality": "DE"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "lena@example.com");
        assert_eq!(body["user"]["role"], "tourist");
        assert!(body["user"].get("password_hash").is_none());
        assert_eq!(body["tokens"]["token_type"], "Bearer");

        let (status, _) = app
            .post(
                "/api/v1/auth/login",
                None,
                json!({ "email": "lena@example.com", "password": "trekking-2024" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .post(
                "/api/v1/auth/login",
                None,
                json!({ "email": "lena@example.com", "password": "wrong-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let app = TestApp::new();
        app.register_tourist("dup@example.com").await;
        let (status, _) = app
            .post(
                "/api/v1/auth/register",
                None,
                json!({ "name": "Dup", "email": "DUP@example.com", "password": "password-1" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = TestApp::new();
        let (status, _) = app
            .post(
                "/api/v1/auth/register",
                None,
                json!({ "name": "Short", "email": "s@example.com", "password": "123" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post("/api/v1/auth/register", None, json!({ "name": "No email" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_reuse_detection() {
        let app = TestApp::new();
        let session = app.register_tourist("rotate@example.com").await;

        let (status, rotated) = app
            .post(
                "/api/v1/auth/refresh",
                None,
                json!({ "refresh_token": session.refresh_token }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let second = rotated["refresh_token"].as_str().unwrap().to_string();
        assert_ne!(second, session.refresh_token);

        // replaying the first token revokes the whole family
        let (status, body) = app
            .post(
                "/api/v1/auth/refresh",
                None,
                json!({ "refresh_token": session.refresh_token }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Refresh token reuse detected");

        let (status, _) = app
            .post("/api/v1/auth/refresh", None, json!({ "refresh_token": second }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let app = TestApp::new();
        let session = app.register_tourist("kind@example.com").await;
        let (status, _) = app
            .post(
                "/api/v1/auth/refresh",
                None,
                json!({ "refresh_token": session.access_token }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_revokes() {
        let app = TestApp::new();
        let session = app.register_tourist("bye@example.com").await;

        let (status, _) = app
            .post(
                "/api/v1/auth/logout",
                None,
                json!({ "refresh_token": session.refresh_token }),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .post(
                "/api/v1/auth/refresh",
                None,
                json!({ "refresh_token": session.refresh_token }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
