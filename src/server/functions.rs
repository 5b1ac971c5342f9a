//! Invoke-by-name function shim: `POST /functions/{name}` dispatches to a
//! small set of registered server-side functions.

use crate::error::AppError;
use crate::server::auth::RequireStaff;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Names the dispatcher accepts.
pub const FUNCTION_NAMES: [&str; 2] = ["translate", "bulk-translate"];

/// POST /functions/:name
pub async fn invoke(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let data = match name.as_str() {
        "translate" => translate(&state, payload).await?,
        "bulk-translate" => bulk_translate(&state, payload).await?,
        _ => return Err(AppError::NotFound(format!("function '{}'", name))),
    };
    Ok(Json(json!({ "data": data })))
}

#[derive(Deserialize)]
struct TranslateBody {
    text: String,
    target_lang: String,
    #[serde(default)]
    source_lang: Option<String>,
}

#[derive(Deserialize)]
struct BulkTranslateBody {
    texts: Vec<String>,
    target_lang: String,
    #[serde(default)]
    source_lang: Option<String>,
}

fn translate_url() -> Result<String, AppError> {
    std::env::var("TRANSLATE_API_URL")
        .map_err(|_| AppError::BadRequest("translation backend is not configured".into()))
}

async fn call_translate(
    state: &AppState,
    text: &str,
    target: &str,
    source: Option<&str>,
) -> Result<String, AppError> {
    let url = translate_url()?;
    let response = state
        .http
        .post(&url)
        .json(&json!({
            "q": text,
            "target": target,
            "source": source.unwrap_or("auto"),
            "format": "text",
        }))
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("translate request: {}", e)))?;
    if !response.status().is_success() {
        return Err(AppError::Internal(format!(
            "translate backend returned {}",
            response.status()
        )));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::Internal(format!("translate decode: {}", e)))?;
    body.get("translatedText")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| AppError::Internal("translate response missing 'translatedText'".into()))
}

async fn translate(state: &AppState, payload: Value) -> Result<Value, AppError> {
    let body: TranslateBody = serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("translate payload: {}", e)))?;
    let translation =
        call_translate(state, &body.text, &body.target_lang, body.source_lang.as_deref()).await?;
    Ok(json!({ "translation": translation }))
}

async fn bulk_translate(state: &AppState, payload: Value) -> Result<Value, AppError> {
    let body: BulkTranslateBody = serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("bulk-translate payload: {}", e)))?;
    let mut translations = Vec::with_capacity(body.texts.len());
    for text in &body.texts {
        translations
            .push(call_translate(state, text, &body.target_lang, body.source_lang.as_deref()).await?);
    }
    Ok(json!({ "translations": translations }))
}
