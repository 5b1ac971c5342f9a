//! Storage buckets: S3-compatible object store behind the
//! `/storage/{bucket}/...` surface, with idempotent default-bucket setup.

use crate::backend::{StorageObject, UploadResult};
use crate::error::AppError;
use crate::server::auth::{RequireAdmin, RequireStaff};
use crate::server::AppState;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Buckets created at boot. Paired flag: attach a public-read policy.
pub const DEFAULT_BUCKETS: [(&str, bool); 4] = [
    ("gallery-images", true),
    ("slideshow-images", true),
    ("about-images", true),
    ("custom-sections", true),
];

#[derive(Clone)]
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    public_base_url: String,
}

fn storage_err<E: std::fmt::Display>(e: E) -> AppError {
    AppError::Storage(e.to_string())
}

impl ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, public_base_url: String) -> Self {
        ObjectStore {
            client,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the S3 client from storage environment variables
    /// (endpoint/keys/SSL flag) and the server's public base URL.
    pub async fn from_env() -> Result<Self, AppError> {
        let endpoint = std::env::var("STORAGE_ENDPOINT")
            .map_err(|_| AppError::Internal("STORAGE_ENDPOINT is not set".into()))?;
        let access_key = std::env::var("STORAGE_ACCESS_KEY")
            .map_err(|_| AppError::Internal("STORAGE_ACCESS_KEY is not set".into()))?;
        let secret_key = std::env::var("STORAGE_SECRET_KEY")
            .map_err(|_| AppError::Internal("STORAGE_SECRET_KEY is not set".into()))?;
        let region = std::env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".into());
        let use_ssl = std::env::var("STORAGE_USE_SSL")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let scheme = if use_ssl { "https" } else { "http" };
        let endpoint_url = if endpoint.contains("://") {
            endpoint
        } else {
            format!("{}://{}", scheme, endpoint)
        };
        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());

        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key, secret_key, None, None, "storage-env",
            ))
            .endpoint_url(endpoint_url)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(true)
            .build();
        Ok(ObjectStore::new(aws_sdk_s3::Client::from_conf(config), public_base_url))
    }

    /// Check-exists-then-create for each default bucket, attaching a
    /// public-read policy where requested. Safe to run on every boot.
    pub async fn ensure_default_buckets(&self) -> Result<(), AppError> {
        for (bucket, public) in DEFAULT_BUCKETS {
            self.ensure_bucket(bucket, public).await?;
        }
        Ok(())
    }

    pub async fn ensure_bucket(&self, bucket: &str, public: bool) -> Result<(), AppError> {
        let exists = self.client.head_bucket().bucket(bucket).send().await.is_ok();
        if !exists {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(storage_err)?;
            tracing::info!(bucket, "bucket created");
        }
        if public {
            let policy = json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"AWS": ["*"]},
                    "Action": ["s3:GetObject"],
                    "Resource": [format!("arn:aws:s3:::{}/*", bucket)],
                }],
            });
            self.client
                .put_bucket_policy()
                .bucket(bucket)
                .policy(policy.to_string())
                .send()
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>, AppError> {
        let out = self.client.list_buckets().send().await.map_err(storage_err)?;
        Ok(out
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(String::from))
            .collect())
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), AppError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult, AppError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(storage_err)?;
        Ok(UploadResult {
            id: path.to_string(),
            path: path.to_string(),
            full_path: format!("{}/{}", bucket, path),
        })
    }

    /// Returns (bytes, content type as stored).
    pub async fn get(&self, bucket: &str, path: &str) -> Result<(Vec<u8>, Option<String>), AppError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|_| AppError::NotFound(format!("{}/{}", bucket, path)))?;
        let content_type = out.content_type().map(String::from);
        let bytes = out
            .body
            .collect()
            .await
            .map_err(storage_err)?
            .into_bytes()
            .to_vec();
        Ok((bytes, content_type))
    }

    pub async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), AppError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut objects = Vec::with_capacity(paths.len());
        for p in paths {
            objects.push(ObjectIdentifier::builder().key(p).build().map_err(storage_err)?);
        }
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(storage_err)?;
        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, AppError> {
        let mut req = self.client.list_objects_v2().bucket(bucket);
        if let Some(p) = prefix.filter(|p| !p.is_empty()) {
            req = req.prefix(p);
        }
        let out = req.send().await.map_err(storage_err)?;
        Ok(out
            .contents()
            .iter()
            .map(|o| StorageObject {
                name: o.key().unwrap_or("").to_string(),
                size: o.size(),
                updated_at: o
                    .last_modified()
                    .and_then(|d| chrono::DateTime::from_timestamp(d.secs(), 0))
                    .map(|d| d.to_rfc3339()),
            })
            .collect())
    }

    /// Public URL served by this server; deterministic for a (bucket, path)
    /// pair.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/{}/public/{}", self.public_base_url, bucket, path)
    }

    pub async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, AppError> {
        let config = PresigningConfig::expires_in(expires_in).map_err(storage_err)?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .presigned(config)
            .await
            .map_err(storage_err)?;
        Ok(presigned.uri().to_string())
    }
}

#[derive(Deserialize)]
pub struct CreateBucketBody {
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

/// POST /storage/buckets
pub async fn create_bucket(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    Json(body): Json<CreateBucketBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.is_empty() || !body.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(AppError::Validation("bucket name must be alphanumeric with dashes".into()));
    }
    state.storage.ensure_bucket(&body.name, body.public).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": { "name": body.name } }))))
}

/// GET /storage/buckets
pub async fn list_buckets(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let buckets = state.storage.list_buckets().await?;
    Ok(Json(json!({ "data": buckets })))
}

/// DELETE /storage/buckets/:bucket
pub async fn delete_bucket(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /storage/:bucket/upload — multipart form with `path` and `file`.
pub async fn upload(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut path: Option<String> = None;
    let mut file: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "path" => {
                path = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?);
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let name = field.file_name().map(String::from);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?
                    .to_vec();
                if path.is_none() {
                    path = name;
                }
                file = Some((bytes, content_type));
            }
            _ => {}
        }
    }
    let (bytes, content_type) =
        file.ok_or_else(|| AppError::BadRequest("missing 'file' field in multipart body".into()))?;
    let path = path.ok_or_else(|| AppError::BadRequest("missing 'path' field or file name".into()))?;
    let result = state.storage.put(&bucket, &path, bytes, &content_type).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": result }))))
}

/// GET /storage/:bucket/download/*path
pub async fn download(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    serve_object(&state, &bucket, &path).await
}

/// GET /storage/:bucket/public/*path — unauthenticated read for public
/// buckets; this is the target of `get_public_url`.
pub async fn public_download(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    serve_object(&state, &bucket, &path).await
}

async fn serve_object(
    state: &AppState,
    bucket: &str,
    path: &str,
) -> Result<impl IntoResponse, AppError> {
    let (bytes, content_type) = state.storage.get(bucket, path).await?;
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".into());
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

#[derive(Deserialize)]
pub struct ListBody {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// POST /storage/:bucket/list
pub async fn list(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(body): Json<ListBody>,
) -> Result<impl IntoResponse, AppError> {
    let objects = state.storage.list(&bucket, body.prefix.as_deref()).await?;
    Ok(Json(json!({ "data": objects })))
}

#[derive(Deserialize)]
pub struct RemoveBody {
    pub paths: Vec<String>,
}

/// DELETE /storage/:bucket/remove
pub async fn remove(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(body): Json<RemoveBody>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.remove(&bucket, &body.paths).await?;
    Ok(Json(json!({ "data": { "removed": body.paths } })))
}

#[derive(Deserialize)]
pub struct SignedUrlBody {
    pub path: String,
    #[serde(default = "default_expiry")]
    pub expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

/// POST /storage/:bucket/signed-url
pub async fn signed_url(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(body): Json<SignedUrlBody>,
) -> Result<impl IntoResponse, AppError> {
    let url = state
        .storage
        .signed_url(&bucket, &body.path, Duration::from_secs(body.expires_in))
        .await?;
    Ok(Json(json!({ "data": { "signed_url": url } })))
}

#[derive(Deserialize)]
pub struct PublicUrlQuery {
    pub path: String,
}

/// GET /storage/:bucket/public-url?path=...
pub async fn public_url(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    axum::extract::Query(q): axum::extract::Query<PublicUrlQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(json!({ "data": { "public_url": state.storage.public_url(&bucket, &q.path) } })))
}
