//! Contact form and message inbox. Messages are always persisted first;
//! outbound SMTP (lettre) is best-effort and never fails the request.

use crate::error::AppError;
use crate::server::auth::RequireStaff;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use lettre::message::header::ContentType;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const SETTINGS_ROW_ID: i32 = 1;

/// SMTP transport plus addressing, built once at boot when configured.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    notify_to: String,
}

impl Mailer {
    /// `None` when SMTP_HOST is unset; the contact form still stores
    /// messages without a mailer.
    pub fn from_env() -> Result<Option<Self>, AppError> {
        let host = match std::env::var("SMTP_HOST") {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };
        let port: u16 = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".into())
            .parse()
            .map_err(|_| AppError::Internal("SMTP_PORT is not a port number".into()))?;
        let from = std::env::var("SMTP_FROM")
            .map_err(|_| AppError::Internal("SMTP_FROM is not set".into()))?;
        let notify_to = std::env::var("SMTP_NOTIFY_TO").unwrap_or_else(|_| from.clone());
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
            .map_err(|e| AppError::Internal(format!("smtp relay: {}", e)))?
            .port(port);
        if let (Ok(user), Ok(password)) =
            (std::env::var("SMTP_USER"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(lettre::transport::smtp::authentication::Credentials::new(
                user, password,
            ));
        }
        Ok(Some(Mailer {
            transport: builder.build(),
            from,
            notify_to,
        }))
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), AppError> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|e| AppError::Internal(format!("from address: {}", e)))?)
            .to(to.parse().map_err(|e| AppError::BadRequest(format!("recipient address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AppError::Internal(format!("message build: {}", e)))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Internal(format!("smtp send: {}", e)))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub read: bool,
    pub replied_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const MESSAGE_COLUMNS: &str =
    "id, name, email, subject, message, read, replied_at, created_at";

async fn form_enabled(state: &AppState) -> Result<bool, AppError> {
    let row: Option<(bool,)> =
        sqlx::query_as("SELECT form_enabled FROM contact_settings WHERE id = $1")
            .bind(SETTINGS_ROW_ID)
            .fetch_optional(&state.pool)
            .await?;
    Ok(row.map(|(b,)| b).unwrap_or(true))
}

#[derive(Deserialize)]
pub struct ContactBody {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: String,
    pub message: String,
}

/// POST /email/send-contact — public. Disabled form rejects before any
/// row is written; otherwise the row is stored even when SMTP fails.
pub async fn send_contact(
    State(state): State<AppState>,
    Json(body): Json<ContactBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.is_empty() || body.message.is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation(
            "name, message and a valid email are required".into(),
        ));
    }
    if !form_enabled(&state).await? {
        return Err(AppError::Forbidden("the contact form is disabled".into()));
    }
    let stored: ContactMessage = sqlx::query_as(&format!(
        "INSERT INTO contact_messages (name, email, subject, message) \
         VALUES ($1, $2, $3, $4) RETURNING {}",
        MESSAGE_COLUMNS
    ))
    .bind(&body.name)
    .bind(&body.email)
    .bind(&body.subject)
    .bind(&body.message)
    .fetch_one(&state.pool)
    .await?;
    if let Some(mailer) = &state.mailer {
        let subject = if body.subject.is_empty() {
            format!("New contact message from {}", body.name)
        } else {
            body.subject.clone()
        };
        let text = format!("From: {} <{}>\n\n{}", body.name, body.email, body.message);
        if let Err(e) = mailer.send(&mailer.notify_to, &subject, text).await {
            tracing::warn!(message = %stored.id, error = %e, "contact notification failed");
        }
    }
    Ok((StatusCode::CREATED, Json(json!({ "data": stored }))))
}

/// GET /email/messages — newest first.
pub async fn list_messages(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let messages: Vec<ContactMessage> = sqlx::query_as(&format!(
        "SELECT {} FROM contact_messages ORDER BY created_at DESC",
        MESSAGE_COLUMNS
    ))
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(json!({ "data": messages })))
}

/// GET /email/messages/:id
pub async fn get_message(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let message = fetch_message(&state, id).await?;
    Ok(Json(json!({ "data": message })))
}

#[derive(Deserialize)]
pub struct PatchMessageBody {
    pub read: bool,
}

/// PATCH /email/messages/:id — toggle the read flag.
pub async fn patch_message(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchMessageBody>,
) -> Result<impl IntoResponse, AppError> {
    let message: Option<ContactMessage> = sqlx::query_as(&format!(
        "UPDATE contact_messages SET read = $2 WHERE id = $1 RETURNING {}",
        MESSAGE_COLUMNS
    ))
    .bind(id)
    .bind(body.read)
    .fetch_optional(&state.pool)
    .await?;
    let message = message.ok_or_else(|| AppError::NotFound(format!("message {}", id)))?;
    Ok(Json(json!({ "data": message })))
}

/// DELETE /email/messages/:id
pub async fn delete_message(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM contact_messages WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("message {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReplyBody {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

/// POST /email/messages/:id/reply — reply goes to the original sender;
/// a send failure here is a real error, unlike the contact notification.
pub async fn reply_message(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplyBody>,
) -> Result<impl IntoResponse, AppError> {
    let message = fetch_message(&state, id).await?;
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("outbound email is not configured".into()))?;
    let subject = body.subject.unwrap_or_else(|| {
        let original = if message.subject.is_empty() {
            "your message"
        } else {
            message.subject.as_str()
        };
        format!("Re: {}", original)
    });
    mailer.send(&message.email, &subject, body.body).await?;
    let updated: ContactMessage = sqlx::query_as(&format!(
        "UPDATE contact_messages SET replied_at = now(), read = TRUE WHERE id = $1 RETURNING {}",
        MESSAGE_COLUMNS
    ))
    .bind(id)
    .fetch_one(&state.pool)
    .await?;
    tracing::info!(message = %id, "reply sent");
    Ok(Json(json!({ "data": updated })))
}

#[derive(Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactSettings {
    pub form_enabled: bool,
}

/// GET /email/settings
pub async fn get_settings(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let enabled = form_enabled(&state).await?;
    Ok(Json(json!({ "data": { "form_enabled": enabled } })))
}

/// PUT /email/settings
pub async fn put_settings(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Json(settings): Json<ContactSettings>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query(
        "INSERT INTO contact_settings (id, form_enabled) VALUES ($1, $2) \
         ON CONFLICT (id) DO UPDATE SET form_enabled = EXCLUDED.form_enabled",
    )
    .bind(SETTINGS_ROW_ID)
    .bind(settings.form_enabled)
    .execute(&state.pool)
    .await?;
    Ok(Json(json!({ "data": settings })))
}

async fn fetch_message(state: &AppState, id: Uuid) -> Result<ContactMessage, AppError> {
    let message: Option<ContactMessage> = sqlx::query_as(&format!(
        "SELECT {} FROM contact_messages WHERE id = $1",
        MESSAGE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;
    message.ok_or_else(|| AppError::NotFound(format!("message {}", id)))
}
