//! Helpers for driving the router in tests

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use safety_store::{Role, User};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::auth_routes::issue_pair;
use crate::config::Config;
use crate::state::AppState;

pub const TEST_PASSWORD: &str = "test-password-1";

pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_state(AppState::in_memory(config))
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            router: crate::router(state.clone()),
            state,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, token, None).await
    }

    /// Register through the public endpoint
    pub async fn register_tourist(&self, email: &str) -> Session {
        let (status, body) = self
            .post(
                "/api/v1/auth/register",
                None,
                serde_json::json!({ "name": "Test Tourist", "email": email, "password": TEST_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        Session {
            user_id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            access_token: body["tokens"]["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["tokens"]["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    /// Seed a police or admin account straight into the store
    pub async fn staff(&self, role: Role, email: &str) -> Session {
        let user = User::new("Staff", email, role, hash_password(TEST_PASSWORD).unwrap());
        let user = self.state.store.insert_user(user).await.unwrap();
        let tokens = issue_pair(&self.state, &user).await.unwrap();

        Session {
            user_id: user.id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}
