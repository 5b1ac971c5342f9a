//! Adapter for the hosted BaaS. Query commands translate one-to-one into
//! PostgREST-style query parameters; auth and storage wrap the platform's
//! REST surface.

use crate::backend::{AuthResult, Backend, BackendKind, Session, StorageObject, UploadResult};
use crate::error::BackendError;
use crate::query::{FilterOp, Operation, QueryCommand, QueryResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::RwLock;

pub struct HostedBackend {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

/// Render a filter value in PostgREST operand syntax.
fn render_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Translate the accumulated filters/order/limit into query parameters.
/// Filters stay conjunctive and keep their insertion order.
pub fn query_params(command: &QueryCommand) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(ref select) = command.select {
        params.push(("select".to_string(), select.replace(' ', "")));
    }
    for f in &command.filters {
        let operand = match f.operator {
            FilterOp::Eq => format!("eq.{}", render_value(&f.value)),
            FilterOp::Neq => format!("neq.{}", render_value(&f.value)),
            FilterOp::Gt => format!("gt.{}", render_value(&f.value)),
            FilterOp::Lt => format!("lt.{}", render_value(&f.value)),
            FilterOp::Gte => format!("gte.{}", render_value(&f.value)),
            FilterOp::Lte => format!("lte.{}", render_value(&f.value)),
            FilterOp::Like => format!("like.{}", render_value(&f.value)),
            FilterOp::Ilike => format!("ilike.{}", render_value(&f.value)),
            FilterOp::In => {
                let items = match &f.value {
                    Value::Array(a) => a.iter().map(render_value).collect::<Vec<_>>(),
                    one => vec![render_value(one)],
                };
                format!("in.({})", items.join(","))
            }
            FilterOp::Is => format!("is.{}", render_value(&f.value)),
            FilterOp::Not => match f.value {
                Value::Null => "not.is.null".to_string(),
                ref v => format!("not.eq.{}", render_value(v)),
            },
        };
        params.push((f.column.clone(), operand));
    }
    if let Some(ref order) = command.order_by {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(limit) = command.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(range) = command.range {
        params.push(("offset".to_string(), range.from.to_string()));
        let count = u64::from(range.to).saturating_sub(u64::from(range.from)) + 1;
        params.push(("limit".to_string(), count.to_string()));
    }
    if command.operation == Operation::Upsert {
        if let Some(ref col) = command.options.on_conflict {
            params.push(("on_conflict".to_string(), col.clone()));
        }
    }
    params
}

impl HostedBackend {
    pub fn new(url: String, anon_key: String) -> Self {
        HostedBackend {
            base_url: url.trim_end_matches('/').to_string(),
            anon_key,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    fn bearer(&self) -> String {
        self.token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::from_response_body(status, &body))
    }

    fn session_from_token_body(&self, body: &Value) -> Result<AuthResult, BackendError> {
        let user = body.get("user").cloned().unwrap_or(Value::Null);
        let session = body.get("access_token").and_then(Value::as_str).map(|t| Session {
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
impl Backend for HostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn execute(&self, command: &QueryCommand) -> Result<QueryResult, BackendError> {
        if matches!(command.operation, Operation::Update | Operation::Delete)
            && command.filters.is_empty()
        {
            return Err(BackendError::InvalidQuery(
                "update and delete require at least one filter".into(),
            ));
        }
        let url = format!("{}/rest/v1/{}", self.base_url, command.table);
        let params = query_params(command);
        let mut req = match command.operation {
            Operation::Select => self.request(reqwest::Method::GET, url),
            Operation::Insert | Operation::Upsert => {
                let mut r = self
                    .request(reqwest::Method::POST, url)
                    .header("Prefer", if command.operation == Operation::Upsert {
                        "return=representation,resolution=merge-duplicates"
                    } else {
                        "return=representation"
                    });
                if let Some(ref data) = command.data {
                    r = r.json(data);
                }
                r
            }
            Operation::Update => {
                let mut r = self
                    .request(reqwest::Method::PATCH, url)
                    .header("Prefer", "return=representation");
                if let Some(ref data) = command.data {
                    r = r.json(data);
                }
                r
            }
            Operation::Delete => self
                .request(reqwest::Method::DELETE, url)
                .header("Prefer", "return=representation"),
        };
        req = req.query(&params);
        if command.single || command.maybe_single {
            req = req.header("Accept", "application/vnd.pgrst.object+json");
        }
        let resp = req.send().await?;
        if command.maybe_single && resp.status().as_u16() == 406 {
            // object+json with zero rows; maybe_single maps that to null
            return Ok(QueryResult { data: Value::Null });
        }
        let resp = self.check(resp).await?;
        let data: Value = resp.json().await?;
        if command.single && data.is_null() {
            return Err(BackendError::NoRows);
        }
        Ok(QueryResult { data })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let body: Value = resp.json().await?;
        self.session_from_token_body(&body)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResult, BackendError> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/token?grant_type=password", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let body: Value = resp.json().await?;
        self.session_from_token_body(&body)
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let token = match self.token.read().ok().and_then(|t| t.clone()) {
            Some(t) => t,
            None => return Ok(None),
        };
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .send()
            .await?;
        if !resp.status().is_success() {
            self.set_token(None);
            return Ok(None);
        }
        let user: Value = resp.json().await?;
        Ok(Some(Session {
            access_token: token,
            expires_at: 0,
            user,
        }))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            let resp = self
                .http
                .post(format!("{}/auth/v1/logout", self.base_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(token)
                .send()
                .await?;
            let _ = self.check(resp).await;
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
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let resp = self
            .request(reqwest::Method::POST, url)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let body: Value = resp.json().await?;
        let id = body
            .get("Id")
            .or_else(|| body.get("id"))
            .and_then(Value::as_str)
            .unwrap_or(path)
            .to_string();
        Ok(UploadResult {
            id,
            path: path.to_string(),
            full_path: format!("{}/{}", bucket, path),
        })
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let resp = self.check(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let resp = self
            .request(reqwest::Method::DELETE, url)
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageObject>, BackendError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, bucket);
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "prefix": prefix.unwrap_or("") }))
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let body: Value = resp.json().await?;
        let items = body.as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|item| StorageObject {
                name: item.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                size: item
                    .get("metadata")
                    .and_then(|m| m.get("size"))
                    .and_then(Value::as_i64),
                updated_at: item
                    .get("updated_at")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
            .collect())
    }

    fn get_public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        let url = format!("{}/storage/v1/object/sign/{}/{}", self.base_url, bucket, path);
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "expiresIn": expires_in_secs }))
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let body: Value = resp.json().await?;
        body.get("signedURL")
            .and_then(Value::as_str)
            .map(|rel| format!("{}/storage/v1{}", self.base_url, rel))
            .ok_or_else(|| BackendError::Api {
                status: 200,
                code: "bad_response".into(),
                message: "sign response missing signedURL".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use serde_json::json;

    #[test]
    fn filters_translate_in_insertion_order() {
        let cmd = QueryBuilder::new("messages")
            .select("id, name")
            .eq("read", false)
            .gte("created_at", "2026-01-01")
            .not("email", Value::Null)
            .order("created_at", false)
            .limit(20)
            .build()
            .unwrap();
        let params = query_params(&cmd);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "id,name".to_string()),
                ("read".to_string(), "eq.false".to_string()),
                ("created_at".to_string(), "gte.2026-01-01".to_string()),
                ("email".to_string(), "not.is.null".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn in_filter_renders_parenthesized_list() {
        let cmd = QueryBuilder::new("page_elements")
            .select("*")
            .in_("kind", vec![json!("hero"), json!("gallery")])
            .build()
            .unwrap();
        let params = query_params(&cmd);
        assert!(params.contains(&("kind".to_string(), "in.(hero,gallery)".to_string())));
    }

    #[tokio::test]
    async fn unfiltered_update_is_rejected_before_any_request() {
        let b = HostedBackend::new("https://hosted.example".into(), "anon".into());
        let cmd = QueryBuilder::new("users")
            .update(json!({"role": "admin"}))
            .build()
            .unwrap();
        assert!(matches!(
            b.execute(&cmd).await,
            Err(BackendError::InvalidQuery(_))
        ));
    }

    #[test]
    fn full_span_range_does_not_overflow() {
        let cmd = QueryBuilder::new("t").select("*").range(0, u32::MAX).build().unwrap();
        let params = query_params(&cmd);
        assert!(params.contains(&("limit".to_string(), "4294967296".to_string())));
    }

    #[test]
    fn range_becomes_offset_and_limit() {
        let cmd = QueryBuilder::new("t").select("*").range(10, 19).build().unwrap();
        let params = query_params(&cmd);
        assert!(params.contains(&("offset".to_string(), "10".to_string())));
        assert!(params.contains(&("limit".to_string(), "10".to_string())));
    }
}
