//! Adapter for the self-hosted backend: every operation is an authenticated
//! HTTP call against the folio-server REST surface.

use crate::backend::{AuthResult, Backend, BackendKind, Session, StorageObject, UploadResult};
use crate::error::BackendError;
use crate::query::{QueryCommand, QueryResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::RwLock;

pub struct SelfHostedBackend {
    base_url: String,
    http: reqwest::Client,
    /// Bearer token cached in memory; cleared whenever the server rejects it.
    token: RwLock<Option<String>>,
}

impl SelfHostedBackend {
    pub fn new(api_url: String) -> Self {
        SelfHostedBackend {
            base_url: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer() {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn read_json(&self, resp: reqwest::Response) -> Result<Value, BackendError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::from_response_body(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn auth_result_from_body(&self, body: &Value) -> Result<AuthResult, BackendError> {
        let data = body.get("data").unwrap_or(body);
        let user = data.get("user").cloned().unwrap_or(Value::Null);
        let session = data
            .get("session")
            .filter(|s| !s.is_null())
            .map(|s| serde_json::from_value::<Session>(s.clone()))
            .transpose()?;
        if let Some(ref s) = session {
            self.set_token(Some(s.access_token.clone()));
        }
        Ok(AuthResult { user, session })
    }
}

#[async_trait]
impl Backend for SelfHostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SelfHosted
    }

    async fn execute(&self, command: &QueryCommand) -> Result<QueryResult, BackendError> {
        let resp = self
            .with_auth(self.http.post(self.url("/database")))
            .json(command)
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        if command.single && data.is_null() {
            return Err(BackendError::NoRows);
        }
        Ok(QueryResult { data })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .http
            .post(self.url("/auth/signup"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        self.auth_result_from_body(&body)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .http
            .post(self.url("/auth/signin"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        self.auth_result_from_body(&body)
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(token) = self.bearer() else {
            return Ok(None);
        };
        let resp = self
            .http
            .get(self.url("/auth/session"))
            .bearer_auth(&token)
            .send()
            .await?;
        if !resp.status().is_success() {
            // Any rejection invalidates the cached token.
            self.set_token(None);
            return Ok(None);
        }
        let body: Value = resp.json().await?;
        let data = body.get("data").unwrap_or(&body);
        let session = data
            .get("session")
            .filter(|s| !s.is_null())
            .map(|s| serde_json::from_value::<Session>(s.clone()))
            .transpose()?;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(token) = self.bearer() {
            let resp = self
                .http
                .post(self.url("/auth/signout"))
                .bearer_auth(&token)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                self.set_token(None);
                return Err(BackendError::from_response_body(status.as_u16(), &body));
            }
        }
        self.set_token(None);
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult, BackendError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(path.rsplit('/').next().unwrap_or(path).to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .text("path", path.to_string())
            .part("file", part);
        let resp = self
            .with_auth(self.http.post(self.url(&format!("/storage/{}/upload", bucket))))
            .multipart(form)
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let resp = self
            .with_auth(
                self.http
                    .get(self.url(&format!("/storage/{}/download/{}", bucket, path))),
            )
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_response_body(status.as_u16(), &body));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let resp = self
            .with_auth(self.http.delete(self.url(&format!("/storage/{}/remove", bucket))))
            .json(&json!({ "paths": paths }))
            .send()
            .await?;
        self.read_json(resp).await?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, BackendError> {
        let resp = self
            .with_auth(self.http.post(self.url(&format!("/storage/{}/list", bucket))))
            .json(&json!({ "prefix": prefix }))
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        let data = body.get("data").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(data)?)
    }

    fn get_public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/{}/public/{}", self.base_url, bucket, path)
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        let resp = self
            .with_auth(self.http.post(self.url(&format!("/storage/{}/signed-url", bucket))))
            .json(&json!({ "path": path, "expires_in": expires_in_secs }))
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        body.get("data")
            .and_then(|d| d.get("signed_url"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| BackendError::Api {
                status: 200,
                code: "bad_response".into(),
                message: "signed-url response missing signed_url".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend as _;

    #[test]
    fn public_url_is_deterministic_for_bucket_and_path() {
        let b = SelfHostedBackend::new("http://localhost:8000/".into());
        let first = b.get_public_url("gallery-images", "a.jpg");
        let second = b.get_public_url("gallery-images", "a.jpg");
        assert_eq!(first, second);
        assert_eq!(first, "http://localhost:8000/storage/gallery-images/public/a.jpg");
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let b = SelfHostedBackend::new("http://api.example/".into());
        assert_eq!(b.url("/database"), "http://api.example/database");
    }
}
