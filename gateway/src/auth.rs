//! Passwords, JWTs and the authenticated-user extractor
//!
//! Access tokens are short-lived and stateless. Refresh tokens carry a `jti`
//! that must exist, unrevoked, in the token store; every refresh revokes the
//! presented jti and issues a new pair.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use constant_time_eq::constant_time_eq;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use safety_store::{RefreshTokenRecord, Role, User};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;
const HASH_SCHEME: &str = "pbkdf2-sha256";
const HASH_ROUNDS: u32 = 10_000;
const SALT_LEN: usize = 16;

// ============================================================================
// Passwords
// ============================================================================

/// PBKDF2-HMAC-SHA256, encoded as `pbkdf2-sha256$<rounds>$<salt-hex>$<hash-hex>`
pub fn hash_password(password: &str) -> ApiResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = stretch(password, &salt, HASH_ROUNDS);

    Ok(format!(
        "{HASH_SCHEME}${HASH_ROUNDS}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    ))
}

/// False for a wrong password or a malformed stored hash
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, rounds, salt, expected] = parts.as_slice() else {
        return false;
    };
    if *scheme != HASH_SCHEME {
        return false;
    }

    let (Ok(rounds), Ok(salt), Ok(expected)) =
        (rounds.parse::<u32>(), hex::decode(salt), hex::decode(expected))
    else {
        return false;
    };
    if rounds == 0 {
        return false;
    }

    constant_time_eq(&stretch(password, &salt, rounds), &expected)
}

fn stretch(password: &str, salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

// ============================================================================
// JWT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    fn sign(&self, claims: &Claims) -> ApiResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
    }

    pub fn issue_access(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        self.sign(&Claims {
            sub: user.id,
            role: user.role,
            typ: TokenKind::Access,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: None,
        })
    }

    /// Signed refresh token plus the record to persist for it
    pub fn issue_refresh(&self, user: &User) -> ApiResult<(String, RefreshTokenRecord)> {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            jti: Uuid::new_v4(),
            user_id: user.id,
            expires_at: now + self.refresh_ttl,
            revoked: false,
            created_at: now,
        };

        let token = self.sign(&Claims {
            sub: user.id,
            role: user.role,
            typ: TokenKind::Refresh,
            iat: now.timestamp(),
            exp: record.expires_at.timestamp(),
            jti: Some(record.jti),
        })?;
        Ok((token, record))
    }

    /// Check signature, expiry and token kind
    pub fn verify(&self, token: &str, kind: TokenKind) -> ApiResult<Claims> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {e}")))?
            .claims;

        if claims.typ != kind {
            return Err(ApiError::Unauthorized("Wrong token type".into()));
        }
        Ok(claims)
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// The caller, taken from a `Bearer` access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, roles: &[Role]) -> ApiResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Role {} may not perform this action",
                self.role
            )))
        }
    }

    pub fn require_responder(&self) -> ApiResult<()> {
        self.require_role(&[Role::Police, Role::Admin])
    }

    pub fn from_headers(state: &AppState, headers: &HeaderMap) -> ApiResult<Self> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Expected a Bearer token".into()))?;

        AuthUser::from_token(state, token.trim())
    }

    pub fn from_token(state: &AppState, token: &str) -> ApiResult<Self> {
        let claims = state.tokens.verify(token, TokenKind::Access)?;
        Ok(Self {
            id: claims.sub,
            role: claims.role,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        AuthUser::from_headers(state, &parts.headers)
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Route layer for routers that do not take `AuthUser` themselves
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let user = AuthUser::from_headers(&state, req.headers())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub async fn require_responder(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let user = AuthUser::from_headers(&state, req.headers())?;
    user.require_responder()?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("pbkdf2-sha256$10000$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("correct horse!", &hash));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same-password").unwrap(), hash_password("same-password").unwrap());
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(hash_password("short"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "plain-text"));
        assert!(!verify_password("anything", "md5$1$00$00"));
        assert!(!verify_password("anything", "pbkdf2-sha256$0$00$00"));
        assert!(!verify_password("anything", "pbkdf2-sha256$10$zz$00"));
        // the old unkeyed scheme is no longer accepted
        assert!(!verify_password("anything", "sha256$10$00$00"));
    }

    #[test]
    fn test_hash_matches_pbkdf2_vector() {
        // RFC 7914 section 11 test vector for PBKDF2-HMAC-SHA256
        let derived = stretch("passwd", b"salt", 1);
        assert_eq!(
            hex::encode(&derived),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );

        let encoded = format!("{HASH_SCHEME}$1${}${}", hex::encode(b"salt"), hex::encode(derived));
        assert!(verify_password("passwd", &encoded));
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let tokens = TokenService::new("test-secret", 900, 3600);
        let user = User::new("Officer", "officer@example.com", Role::Police, String::new());

        let access = tokens.issue_access(&user).unwrap();
        let claims = tokens.verify(&access, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Police);
        assert!(tokens.verify(&access, TokenKind::Refresh).is_err());

        let (refresh, record) = tokens.issue_refresh(&user).unwrap();
        let claims = tokens.verify(&refresh, TokenKind::Refresh).unwrap();
        assert_eq!(claims.jti, Some(record.jti));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = TokenService::new("secret-a", 900, 3600);
        let theirs = TokenService::new("secret-b", 900, 3600);
        let user = User::new("T", "t@example.com", Role::Tourist, String::new());

        let token = theirs.issue_access(&user).unwrap();
        assert!(matches!(
            ours.verify(&token, TokenKind::Access),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenService::new("test-secret", -10, 3600);
        let user = User::new("T", "t@example.com", Role::Tourist, String::new());
        let token = tokens.issue_access(&user).unwrap();
        assert!(tokens.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_role_guard() {
        let tourist = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Tourist,
        };
        assert!(matches!(tourist.require_responder(), Err(ApiError::Forbidden(_))));
        assert!(tourist.require_role(&[Role::Tourist]).is_ok());
    }
}
