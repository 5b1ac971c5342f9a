//! Custom page sections: slug-addressed content blocks with an explicit
//! display order.

use crate::error::AppError;
use crate::server::auth::RequireStaff;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const SLUG_CONFLICT: &str = "a section with this slug already exists";

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Section {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub content: Value,
    pub position: i32,
    pub visible: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
pub struct SectionBody {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

fn validate_slug(slug: &str) -> Result<(), AppError> {
    let ok = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !ok {
        return Err(AppError::Validation(
            "slug must be lowercase letters, digits and dashes".into(),
        ));
    }
    Ok(())
}

/// GET /custom-sections — public, ordered by position.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sections: Vec<Section> = sqlx::query_as(
        "SELECT id, slug, title, content, position, visible, created_at, updated_at \
         FROM custom_sections ORDER BY position ASC, created_at ASC",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(json!({ "data": sections })))
}

/// POST /custom-sections
pub async fn create(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Json(body): Json<SectionBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_slug(&body.slug)?;
    // Append to the end unless a position was given.
    let position = match body.position {
        Some(p) => p,
        None => {
            let (max,): (Option<i32>,) =
                sqlx::query_as("SELECT MAX(position) FROM custom_sections")
                    .fetch_one(&state.pool)
                    .await?;
            max.unwrap_or(-1) + 1
        }
    };
    let section: Section = sqlx::query_as(
        "INSERT INTO custom_sections (slug, title, content, position, visible) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, slug, title, content, position, visible, created_at, updated_at",
    )
    .bind(&body.slug)
    .bind(&body.title)
    .bind(&body.content)
    .bind(position)
    .bind(body.visible)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AppError::from_db(e, SLUG_CONFLICT))?;
    Ok((StatusCode::CREATED, Json(json!({ "data": section }))))
}

/// GET /custom-sections/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let section: Option<Section> = sqlx::query_as(
        "SELECT id, slug, title, content, position, visible, created_at, updated_at \
         FROM custom_sections WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;
    let section = section.ok_or_else(|| AppError::NotFound(format!("section {}", id)))?;
    Ok(Json(json!({ "data": section })))
}

/// PUT /custom-sections/:id
pub async fn update(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SectionBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_slug(&body.slug)?;
    let section: Option<Section> = sqlx::query_as(
        "UPDATE custom_sections SET slug = $2, title = $3, content = $4, \
           position = COALESCE($5, position), visible = $6, updated_at = now() \
         WHERE id = $1 \
         RETURNING id, slug, title, content, position, visible, created_at, updated_at",
    )
    .bind(id)
    .bind(&body.slug)
    .bind(&body.title)
    .bind(&body.content)
    .bind(body.position)
    .bind(body.visible)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| AppError::from_db(e, SLUG_CONFLICT))?;
    let section = section.ok_or_else(|| AppError::NotFound(format!("section {}", id)))?;
    Ok(Json(json!({ "data": section })))
}

/// DELETE /custom-sections/:id
pub async fn delete(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM custom_sections WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("section {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReorderBody {
    /// Section ids in their new display order.
    pub order: Vec<Uuid>,
}

/// POST /custom-sections/reorder — all positions move in one transaction;
/// an unknown id rolls the whole reorder back.
pub async fn reorder(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Json(body): Json<ReorderBody>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    for (position, id) in body.order.iter().enumerate() {
        let result = sqlx::query(
            "UPDATE custom_sections SET position = $1, updated_at = now() WHERE id = $2",
        )
        .bind(position as i32)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("section {}", id)));
        }
    }
    tx.commit().await?;
    tracing::debug!(count = body.order.len(), "sections reordered");
    Ok(Json(json!({ "data": { "order": body.order } })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_shape_is_enforced() {
        assert!(validate_slug("my-team-2024").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("My Team").is_err());
        assert!(validate_slug("team/../../etc").is_err());
    }
}
