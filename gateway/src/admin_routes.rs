//! Admin API Routes
//!
//! Police and admin accounts are never self-registered; an admin creates them.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use safety_store::{Role, User, UserProfile};
use serde::Deserialize;
use tracing::info;

use crate::auth::AuthUser;
use crate::auth_routes::new_user;
use crate::error::{ApiJson, ApiQuery, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/users", get(list_users).post(create_user))
}

async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    auth.require_role(&[Role::Admin])?;

    let mut user = new_user(&req.name, &req.email, &req.password, req.role)?;
    user.phone = req.phone;
    let user = state.store.insert_user(user).await?;
    info!("Admin {} created {} account {}", auth.id, user.role, user.id);

    Ok((StatusCode::CREATED, Json(user.profile())))
}

async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    auth.require_role(&[Role::Admin])?;
    let users = state.store.list_users(query.role).await?;
    Ok(Json(users.iter().map(User::profile).collect()))
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use axum::http::StatusCode;
    use safety_store::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_admin_creates_police() {
        let app = TestApp::new();
        let admin = app.staff(Role::Admin, "root@example.com").await;

        let (status, body) = app
            .post(
                "/api/v1/admin/users",
                Some(&admin.access_token),
                json!({
                    "name": "Inspector Rao",
                    "email": "rao@police.example",
                    "password": "beat-patrol-7",
                    "role": "police"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "police");

        // the new officer can log in
        let (status, body) = app
            .post(
                "/api/v1/auth/login",
                None,
                json!({ "email": "rao@police.example", "password": "beat-patrol-7" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "police");

        let (_, body) = app
            .get("/api/v1/admin/users?role=police", Some(&admin.access_token))
            .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_police_cannot_create_users() {
        let app = TestApp::new();
        let police = app.staff(Role::Police, "cop@example.com").await;
        let (status, _) = app
            .post(
                "/api/v1/admin/users",
                Some(&police.access_token),
                json!({ "name": "X", "email": "x@example.com", "password": "password-9", "role": "admin" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
