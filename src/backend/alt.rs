//! Adapter for the alternative BaaS: a rows/files REST API keyed by the
//! url/key/project-id credential triple. The query command travels as the
//! request body; the platform interprets it server-side.

use crate::backend::{AuthResult, Backend, BackendKind, Session, StorageObject, UploadResult};
use crate::error::BackendError;
use crate::query::{Operation, QueryCommand, QueryResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::RwLock;

pub struct AltBackend {
    base_url: String,
    key: String,
    project_id: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl AltBackend {
    pub fn new(url: String, key: String, project_id: String) -> Self {
        AltBackend {
            base_url: url.trim_end_matches('/').to_string(),
            key,
            project_id,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-API-Key", &self.key)
            .header("X-Project-ID", &self.project_id);
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            req = req.bearer_auth(token);
        }
        req
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    async fn check_json(&self, resp: reqwest::Response) -> Result<Value, BackendError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::from_response_body(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn auth_result(&self, body: &Value) -> Result<AuthResult, BackendError> {
        let user = body.get("user").cloned().unwrap_or(Value::Null);
        let session = body.get("token").and_then(Value::as_str).map(|t| Session {
            access_token: t.to_string(),
            expires_at: body.get("expires_at").and_then(Value::as_i64).unwrap_or(0),
            user: user.clone(),
        });
        if let Some(ref s) = session {
            self.set_token(Some(s.access_token.clone()));
        }
        Ok(AuthResult { user, session })
    }
}

#[async_trait]
impl Backend for AltBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Alt
    }

    async fn execute(&self, command: &QueryCommand) -> Result<QueryResult, BackendError> {
        if matches!(command.operation, Operation::Update | Operation::Delete)
            && command.filters.is_empty()
        {
            return Err(BackendError::InvalidQuery(
                "update and delete require at least one filter".into(),
            ));
        }
        let path = format!("/v1/tables/{}/query", command.table);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(command)
            .send()
            .await?;
        let body = self.check_json(resp).await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        if command.single && data.is_null() {
            return Err(BackendError::NoRows);
        }
        Ok(QueryResult { data })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .request(reqwest::Method::POST, "/v1/auth/users")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = self.check_json(resp).await?;
        self.auth_result(&body)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .request(reqwest::Method::POST, "/v1/auth/sessions")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = self.check_json(resp).await?;
        self.auth_result(&body)
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        if self.token.read().ok().and_then(|t| t.clone()).is_none() {
            return Ok(None);
        }
        let resp = self.request(reqwest::Method::GET, "/v1/auth/session").send().await?;
        if !resp.status().is_success() {
            self.set_token(None);
            return Ok(None);
        }
        let body: Value = resp.json().await?;
        let token = self.token.read().ok().and_then(|t| t.clone()).unwrap_or_default();
        Ok(Some(Session {
            access_token: token,
            expires_at: body.get("expires_at").and_then(Value::as_i64).unwrap_or(0),
            user: body.get("user").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.token.read().ok().and_then(|t| t.clone()).is_some() {
            let resp = self
                .request(reqwest::Method::DELETE, "/v1/auth/session")
                .send()
                .await?;
            let _ = self.check_json(resp).await;
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
            .request(reqwest::Method::POST, &format!("/v1/buckets/{}/files", bucket))
            .multipart(form)
            .send()
            .await?;
        let body = self.check_json(resp).await?;
        Ok(UploadResult {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(path)
                .to_string(),
            path: path.to_string(),
            full_path: format!("{}/{}", bucket, path),
        })
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/buckets/{}/files/{}/content", bucket, path),
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
        for path in paths {
            let resp = self
                .request(
                    reqwest::Method::DELETE,
                    &format!("/v1/buckets/{}/files/{}", bucket, path),
                )
                .send()
                .await?;
            self.check_json(resp).await?;
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, BackendError> {
        let mut req = self.request(reqwest::Method::GET, &format!("/v1/buckets/{}/files", bucket));
        if let Some(p) = prefix {
            req = req.query(&[("prefix", p)]);
        }
        let resp = req.send().await?;
        let body = self.check_json(resp).await?;
        let items = body
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|f| StorageObject {
                name: f.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                size: f.get("size").and_then(Value::as_i64),
                updated_at: f.get("updated_at").and_then(Value::as_str).map(String::from),
            })
            .collect())
    }

    fn get_public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/v1/buckets/{}/files/{}/view?project={}",
            self.base_url, bucket, path, self.project_id
        )
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/buckets/{}/files/{}/signed-url", bucket, path),
            )
            .json(&json!({ "expires_in": expires_in_secs }))
            .send()
            .await?;
        let body = self.check_json(resp).await?;
        body.get("url")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| BackendError::Api {
                status: 200,
                code: "bad_response".into(),
                message: "signed-url response missing url".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend as _;

    #[tokio::test]
    async fn unfiltered_delete_is_rejected_before_any_request() {
        let b = AltBackend::new("https://alt.example".into(), "key".into(), "proj-1".into());
        let cmd = crate::query::QueryBuilder::new("users").delete().build().unwrap();
        assert!(matches!(
            b.execute(&cmd).await,
            Err(BackendError::InvalidQuery(_))
        ));
    }

    #[test]
    fn public_url_includes_project_scope() {
        let b = AltBackend::new("https://alt.example".into(), "key".into(), "proj-1".into());
        assert_eq!(
            b.get_public_url("gallery-images", "a.jpg"),
            "https://alt.example/v1/buckets/gallery-images/files/a.jpg/view?project=proj-1"
        );
    }
}
