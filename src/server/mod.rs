//! The self-hosted server: shared state, routers, and the HTTP surface the
//! self-hosted client adapter talks to.

pub mod auth;
pub mod bind;
pub mod database;
pub mod email;
pub mod functions;
pub mod interpreter;
pub mod sections;
pub mod seo;
pub mod storage;

use crate::server::auth::JwtKeys;
use crate::server::email::Mailer;
use crate::server::storage::ObjectStore;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tower_http::limit::RequestBodyLimitLayer;

/// Upload ceiling, applied to every request body.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt: JwtKeys,
    pub storage: ObjectStore,
    pub mailer: Option<Arc<Mailer>>,
    pub http: reqwest::Client,
    /// Revoked token ids mapped to their expiry timestamps; entries are
    /// pruned as they expire. Single-process scope.
    revoked: Arc<RwLock<HashMap<String, i64>>>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        jwt: JwtKeys,
        storage: ObjectStore,
        mailer: Option<Mailer>,
    ) -> Self {
        AppState {
            pool,
            jwt,
            storage,
            mailer: mailer.map(Arc::new),
            http: reqwest::Client::new(),
            revoked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        match self.revoked.read() {
            Ok(map) => map.contains_key(jti),
            Err(_) => true,
        }
    }

    pub fn revoke(&self, jti: &str, exp: i64) {
        if let Ok(mut map) = self.revoked.write() {
            let now = Utc::now().timestamp();
            map.retain(|_, e| *e > now);
            map.insert(jti.to_string(), exp);
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Assemble the full route table over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        // auth
        .route("/auth/signup", post(auth::signup))
        .route("/auth/signin", post(auth::signin))
        .route("/auth/session", get(auth::session))
        .route("/auth/user", get(auth::user))
        .route("/auth/signout", post(auth::signout))
        // generic query surface
        .route("/database", post(database::execute))
        // storage
        .route("/storage/buckets", post(storage::create_bucket).get(storage::list_buckets))
        .route("/storage/buckets/:bucket", delete(storage::delete_bucket))
        .route("/storage/:bucket/upload", post(storage::upload))
        .route("/storage/:bucket/download/*path", get(storage::download))
        .route("/storage/:bucket/public/*path", get(storage::public_download))
        .route("/storage/:bucket/public-url", get(storage::public_url))
        .route("/storage/:bucket/list", post(storage::list))
        .route("/storage/:bucket/remove", delete(storage::remove))
        .route("/storage/:bucket/signed-url", post(storage::signed_url))
        // seo
        .route("/seo", get(seo::get_settings).put(seo::put_settings))
        .route("/seo/robots", get(seo::robots))
        // custom sections
        .route("/custom-sections", get(sections::list).post(sections::create))
        .route("/custom-sections/reorder", post(sections::reorder))
        .route(
            "/custom-sections/:id",
            get(sections::get).put(sections::update).delete(sections::delete),
        )
        // email
        .route("/email/send-contact", post(email::send_contact))
        .route("/email/messages", get(email::list_messages))
        .route(
            "/email/messages/:id",
            get(email::get_message)
                .patch(email::patch_message)
                .delete(email::delete_message),
        )
        .route("/email/messages/:id/reply", post(email::reply_message))
        .route("/email/settings", get(email::get_settings).put(email::put_settings))
        // functions
        .route("/functions/:name", post(functions::invoke))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    // lazy pool spawns its maintenance task, so this needs a runtime
    #[tokio::test]
    async fn revocation_set_tracks_and_prunes() {
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/never").unwrap();
        let state = AppState::new(
            pool,
            JwtKeys::new("test"),
            ObjectStore::new(test_s3_client(), "http://localhost:8000".into()),
            None,
        );
        let now = Utc::now().timestamp();
        state.revoke("expired", now - 10);
        assert!(state.is_revoked("expired"));
        // inserting a live token prunes the expired one
        state.revoke("live", now + 60);
        assert!(state.is_revoked("live"));
        assert!(!state.is_revoked("expired"));
        assert!(!state.is_revoked("never-seen"));
    }

    fn test_s3_client() -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new("k", "s", None, None, "test"))
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }
}
