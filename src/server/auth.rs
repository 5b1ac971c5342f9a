//! Authentication: bcrypt credentials, signed session tokens, and the
//! composable request guards (optional / required / role-gated).

use crate::error::AppError;
use crate::server::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// One cost factor everywhere, including the bootstrap CLI.
pub const BCRYPT_COST: u32 = 12;

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Token id, the unit of revocation.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        JwtKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: Uuid, email: &str, role: Role) -> Result<(String, Claims), AppError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token encode: {}", e)))?;
        Ok((token, claims))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AppError::Unauthorized("invalid or expired token".into()))?;
        Ok(data.claims)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn verify_request(state: &AppState, parts: &Parts) -> Result<Claims, AppError> {
    let token = bearer_token(&parts.headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    let claims = state.jwt.verify(token)?;
    if state.is_revoked(&claims.jti) {
        return Err(AppError::Unauthorized("token has been revoked".into()));
    }
    Ok(claims)
}

/// Optional guard: attaches claims when a valid token is present, `None`
/// otherwise. Never rejects.
pub struct MaybeUser(pub Option<Claims>);

/// Required guard: rejects with 401 on a missing, invalid, expired or
/// revoked token.
pub struct AuthUser(pub Claims);

/// Admin-only guard.
pub struct RequireAdmin(pub Claims);

/// Admin-or-editor guard.
pub struct RequireStaff(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(verify_request(state, parts).ok()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(AuthUser(verify_request(state, parts)?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = verify_request(state, parts)?;
        if claims.role != Role::Admin {
            return Err(AppError::Forbidden("admin role required".into()));
        }
        Ok(RequireAdmin(claims))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireStaff {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = verify_request(state, parts)?;
        Ok(RequireStaff(claims))
    }
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

fn validate_credentials(creds: &Credentials) -> Result<(), AppError> {
    if !creds.email.contains('@') || creds.email.len() < 3 {
        return Err(AppError::Validation("email must be a valid address".into()));
    }
    if creds.password.len() < 8 {
        return Err(AppError::Validation("password must be at least 8 characters".into()));
    }
    Ok(())
}

async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("hash task: {}", e)))?
        .map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verify task: {}", e)))?
        .map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

fn user_json(id: Uuid, email: &str, role: Role, last_sign_in_at: Option<chrono::DateTime<Utc>>) -> Value {
    json!({
        "id": id,
        "email": email,
        "role": role,
        "last_sign_in_at": last_sign_in_at.map(|t| t.to_rfc3339()),
    })
}

fn session_json(token: &str, claims: &Claims, user: &Value) -> Value {
    json!({
        "access_token": token,
        "expires_at": claims.exp,
        "user": user,
    })
}

/// Insert the admin (or editor) user plus its companion profile in one
/// transaction. Shared with the bootstrap CLI.
pub async fn insert_user_with_profile(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<Uuid, AppError> {
    let mut tx = pool.begin().await?;
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO users (email, password_hash, role) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::from_db(e, "an account with this email already exists"))?;
    sqlx::query("INSERT INTO profiles (user_id, display_name) VALUES ($1, $2)")
        .bind(id)
        .bind(email.split('@').next().unwrap_or(email))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(id)
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    validate_credentials(&creds)?;
    let hash = hash_password(creds.password.clone()).await?;
    let id = insert_user_with_profile(&state.pool, &creds.email, &hash, Role::Editor).await?;
    let (token, claims) = state.jwt.issue(id, &creds.email, Role::Editor)?;
    let user = user_json(id, &creds.email, Role::Editor, None);
    tracing::info!(user = %id, "user signed up");
    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "data": { "user": user, "session": session_json(&token, &claims, &user) } })),
    ))
}

/// POST /auth/signin
pub async fn signin(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let row: Option<(Uuid, String, String)> = sqlx::query_as(
        "SELECT id, password_hash, role FROM users WHERE email = $1",
    )
    .bind(&creds.email)
    .fetch_optional(&state.pool)
    .await?;
    // Same failure for unknown email and wrong password.
    let (id, password_hash, role_str) =
        row.ok_or_else(|| AppError::Unauthorized("invalid email or password".into()))?;
    if !verify_password(creds.password.clone(), password_hash).await? {
        return Err(AppError::Unauthorized("invalid email or password".into()));
    }
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Internal(format!("unknown role in database: {}", role_str)))?;
    let now = Utc::now();
    sqlx::query("UPDATE users SET last_sign_in_at = $1 WHERE id = $2")
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;
    let (token, claims) = state.jwt.issue(id, &creds.email, role)?;
    let user = user_json(id, &creds.email, role, Some(now));
    tracing::info!(user = %id, "user signed in");
    Ok(Json(json!({ "data": { "user": user, "session": session_json(&token, &claims, &user) } })))
}

/// GET /auth/session — revalidate the bearer token.
pub async fn session(
    AuthUser(claims): AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    let user = fetch_user(&state.pool, &claims.sub).await?;
    Ok(Json(json!({ "data": { "session": session_json(token, &claims, &user) } })))
}

/// GET /auth/user
pub async fn user(
    AuthUser(claims): AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let user = fetch_user(&state.pool, &claims.sub).await?;
    Ok(Json(json!({ "data": { "user": user } })))
}

/// POST /auth/signout — revoke the presented token.
pub async fn signout(
    AuthUser(claims): AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    state.revoke(&claims.jti, claims.exp);
    tracing::info!(user = %claims.sub, "user signed out");
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn fetch_user(pool: &PgPool, user_id: &str) -> Result<Value, AppError> {
    let id = Uuid::parse_str(user_id)
        .map_err(|_| AppError::Unauthorized("malformed subject id".into()))?;
    let row: Option<(Uuid, String, String, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
        "SELECT id, email, role, last_sign_in_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let (id, email, role_str, last) =
        row.ok_or_else(|| AppError::Unauthorized("user no longer exists".into()))?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Internal(format!("unknown role in database: {}", role_str)))?;
    Ok(user_json(id, &email, role, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_and_carries_claims() {
        let keys = JwtKeys::new("test-secret");
        let id = Uuid::new_v4();
        let (token, claims) = keys.issue(id, "a@b.c", Role::Admin).unwrap();
        let verified = keys.verify(&token).unwrap();
        assert_eq!(verified.sub, id.to_string());
        assert_eq!(verified.email, "a@b.c");
        assert_eq!(verified.role, Role::Admin);
        assert_eq!(verified.jti, claims.jti);
        assert_eq!(verified.exp - verified.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let keys = JwtKeys::new("secret-a");
        let (token, _) = keys.issue(Uuid::new_v4(), "a@b.c", Role::Editor).unwrap();
        let other = JwtKeys::new("secret-b");
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("editor"), Some(Role::Editor));
        assert_eq!(Role::parse("root"), None);
    }
}
