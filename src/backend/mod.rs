//! Backend abstraction: configuration, detection, and the adapter trait.
//!
//! One sealed trait, three adapters. Selection happens once, via the
//! configuration tagged union — never via runtime shape-checking.

pub mod alt;
pub mod hosted;
pub mod self_hosted;

use crate::error::BackendError;
use crate::query::{QueryCommand, QueryResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Hosted-BaaS defaults baked into the build; used when no other signal
/// selects a backend.
pub const DEFAULT_HOSTED_URL: &str = "https://demo-project.hosted-baas.example";
pub const DEFAULT_HOSTED_ANON_KEY: &str = "public-anon-key";

const DEFAULT_LOCAL_API_URL: &str = "http://localhost:8000";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    SelfHosted,
    Hosted,
    Alt,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::SelfHosted => write!(f, "self-hosted"),
            BackendKind::Hosted => write!(f, "hosted"),
            BackendKind::Alt => write!(f, "alt"),
        }
    }
}

/// Tagged union over the three concrete backends. Immutable after selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    SelfHosted { api_url: String },
    Hosted { url: String, anon_key: String },
    Alt { url: String, key: String, project_id: String },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::SelfHosted { .. } => BackendKind::SelfHosted,
            BackendConfig::Hosted { .. } => BackendKind::Hosted,
            BackendConfig::Alt { .. } => BackendKind::Alt,
        }
    }
}

/// Raw selection signals, read from the environment in production and built
/// by hand in tests.
#[derive(Clone, Debug, Default)]
pub struct BackendSignals {
    pub force_local: bool,
    pub backend_type: Option<String>,
    pub api_url: Option<String>,
    pub hosted_url: Option<String>,
    pub hosted_anon_key: Option<String>,
    pub alt_url: Option<String>,
    pub alt_key: Option<String>,
    pub alt_project_id: Option<String>,
}

impl BackendSignals {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|s| !s.trim().is_empty())
        }
        BackendSignals {
            force_local: var("FOLIO_FORCE_LOCAL")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            backend_type: var("FOLIO_BACKEND"),
            api_url: var("FOLIO_API_URL"),
            hosted_url: var("FOLIO_HOSTED_URL"),
            hosted_anon_key: var("FOLIO_HOSTED_ANON_KEY"),
            alt_url: var("FOLIO_ALT_URL"),
            alt_key: var("FOLIO_ALT_KEY"),
            alt_project_id: var("FOLIO_ALT_PROJECT_ID"),
        }
    }

    fn alt_triple(&self) -> Option<(String, String, String)> {
        match (&self.alt_url, &self.alt_key, &self.alt_project_id) {
            (Some(u), Some(k), Some(p)) => Some((u.clone(), k.clone(), p.clone())),
            _ => None,
        }
    }

    fn hosted(&self) -> BackendConfig {
        BackendConfig::Hosted {
            url: self
                .hosted_url
                .clone()
                .unwrap_or_else(|| DEFAULT_HOSTED_URL.to_string()),
            anon_key: self
                .hosted_anon_key
                .clone()
                .unwrap_or_else(|| DEFAULT_HOSTED_ANON_KEY.to_string()),
        }
    }
}

/// Pick the backend from signals, in fixed precedence order: forced-local
/// override, explicit backend-type variable, self-hosted API URL presence,
/// alt-BaaS credential triple, hosted defaults. Errors when an explicitly
/// selected backend is missing its required sub-config.
pub fn detect_backend(signals: &BackendSignals) -> Result<BackendConfig, BackendError> {
    let config = if signals.force_local {
        BackendConfig::SelfHosted {
            api_url: signals
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_API_URL.to_string()),
        }
    } else if let Some(ref kind) = signals.backend_type {
        match kind.to_lowercase().as_str() {
            "self-hosted" | "selfhosted" | "local" => BackendConfig::SelfHosted {
                api_url: signals.api_url.clone().ok_or_else(|| {
                    BackendError::Config("self-hosted backend selected but no API URL set".into())
                })?,
            },
            "alt" => {
                let (url, key, project_id) = signals.alt_triple().ok_or_else(|| {
                    BackendError::Config(
                        "alt backend selected but url/key/project-id triple is incomplete".into(),
                    )
                })?;
                BackendConfig::Alt { url, key, project_id }
            }
            "hosted" => signals.hosted(),
            other => {
                return Err(BackendError::Config(format!(
                    "unknown backend type: {}",
                    other
                )))
            }
        }
    } else if let Some(ref api_url) = signals.api_url {
        BackendConfig::SelfHosted {
            api_url: api_url.clone(),
        }
    } else if let Some((url, key, project_id)) = signals.alt_triple() {
        BackendConfig::Alt { url, key, project_id }
    } else {
        signals.hosted()
    };
    tracing::info!(backend = %config.kind(), "backend selected");
    Ok(config)
}

/// Opaque session: bearer token plus the user object it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub expires_at: i64,
    pub user: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResult {
    pub user: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResult {
    pub id: String,
    pub path: String,
    pub full_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageObject {
    pub name: String,
    pub size: Option<i64>,
    pub updated_at: Option<String>,
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::self_hosted::SelfHostedBackend {}
    impl Sealed for super::hosted::HostedBackend {}
    impl Sealed for super::alt::AltBackend {}
}

/// Common interface implemented by each adapter. Sealed: the three adapters
/// are the only implementations.
#[async_trait]
pub trait Backend: private::Sealed + Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Execute a frozen query command and return one uniform result type.
    async fn execute(&self, command: &QueryCommand) -> Result<QueryResult, BackendError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResult, BackendError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResult, BackendError>;
    /// Revalidate the cached token; `None` when no valid session exists.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;
    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult, BackendError>;
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError>;
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, BackendError>;
    fn get_public_url(&self, bucket: &str, path: &str) -> String;
    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError>;
}

/// Bucket-scoped view over a backend, mirroring the `from(bucket)` surface.
pub struct StorageBucket<'a> {
    backend: &'a dyn Backend,
    bucket: String,
}

impl<'a> StorageBucket<'a> {
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult, BackendError> {
        self.backend.upload(&self.bucket, path, bytes, content_type).await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        self.backend.download(&self.bucket, path).await
    }

    pub async fn remove(&self, paths: &[String]) -> Result<(), BackendError> {
        self.backend.remove(&self.bucket, paths).await
    }

    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<StorageObject>, BackendError> {
        self.backend.list(&self.bucket, prefix).await
    }

    pub fn get_public_url(&self, path: &str) -> String {
        self.backend.get_public_url(&self.bucket, path)
    }

    pub async fn create_signed_url(
        &self,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        self.backend.create_signed_url(&self.bucket, path, expires_in_secs).await
    }
}

pub fn storage_bucket<'a>(backend: &'a dyn Backend, bucket: &str) -> StorageBucket<'a> {
    StorageBucket {
        backend,
        bucket: bucket.to_string(),
    }
}

/// Construct the adapter matching a configuration. Callers own the handle
/// and pass it to whatever needs it.
pub fn connect(config: BackendConfig) -> Arc<dyn Backend> {
    match config {
        BackendConfig::SelfHosted { api_url } => {
            Arc::new(self_hosted::SelfHostedBackend::new(api_url))
        }
        BackendConfig::Hosted { url, anon_key } => {
            Arc::new(hosted::HostedBackend::new(url, anon_key))
        }
        BackendConfig::Alt { url, key, project_id } => {
            Arc::new(alt::AltBackend::new(url, key, project_id))
        }
    }
}

static SHARED: Mutex<Option<Arc<dyn Backend>>> = Mutex::new(None);

/// Process-wide memoized handle for callers that cannot thread one through.
/// The first call constructs the adapter; later calls reuse it and ignore
/// the configuration argument.
pub fn shared(config: BackendConfig) -> Arc<dyn Backend> {
    let mut guard = match SHARED.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(ref existing) = *guard {
        return Arc::clone(existing);
    }
    let backend = connect(config);
    *guard = Some(Arc::clone(&backend));
    backend
}

/// Clear the memoized handle so the next `shared` call reconstructs it.
#[cfg(test)]
pub fn reset_shared() {
    match SHARED.lock() {
        Ok(mut g) => *g = None,
        Err(poisoned) => *poisoned.into_inner() = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_local_wins_over_everything() {
        let signals = BackendSignals {
            force_local: true,
            backend_type: Some("hosted".into()),
            api_url: None,
            alt_url: Some("https://alt".into()),
            alt_key: Some("k".into()),
            alt_project_id: Some("p".into()),
            ..Default::default()
        };
        let config = detect_backend(&signals).unwrap();
        assert_eq!(config.kind(), BackendKind::SelfHosted);
    }

    #[test]
    fn explicit_type_beats_url_presence() {
        let signals = BackendSignals {
            backend_type: Some("alt".into()),
            api_url: Some("http://api.local".into()),
            alt_url: Some("https://alt".into()),
            alt_key: Some("k".into()),
            alt_project_id: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(detect_backend(&signals).unwrap().kind(), BackendKind::Alt);
    }

    #[test]
    fn explicit_self_hosted_without_url_errors() {
        let signals = BackendSignals {
            backend_type: Some("self-hosted".into()),
            ..Default::default()
        };
        assert!(matches!(
            detect_backend(&signals),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn incomplete_alt_triple_falls_through_to_hosted_defaults() {
        let signals = BackendSignals {
            alt_url: Some("https://alt".into()),
            alt_key: Some("k".into()),
            ..Default::default()
        };
        let config = detect_backend(&signals).unwrap();
        assert_eq!(
            config,
            BackendConfig::Hosted {
                url: DEFAULT_HOSTED_URL.into(),
                anon_key: DEFAULT_HOSTED_ANON_KEY.into(),
            }
        );
    }

    #[test]
    fn api_url_presence_selects_self_hosted() {
        let signals = BackendSignals {
            api_url: Some("http://api.local".into()),
            ..Default::default()
        };
        assert_eq!(
            detect_backend(&signals).unwrap(),
            BackendConfig::SelfHosted {
                api_url: "http://api.local".into()
            }
        );
    }
}
