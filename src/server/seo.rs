//! Site SEO settings: a single settings row plus a generated robots.txt.

use crate::error::AppError;
use crate::server::auth::RequireStaff;
use crate::server::AppState;
use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The one settings row; the table is keyed by a fixed id.
const SETTINGS_ROW_ID: i32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeoSettings {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub og_image: String,
    #[serde(default)]
    pub site_url: String,
    #[serde(default = "default_indexing")]
    pub allow_indexing: bool,
}

fn default_indexing() -> bool {
    true
}

impl Default for SeoSettings {
    fn default() -> Self {
        SeoSettings {
            title: String::new(),
            description: String::new(),
            keywords: String::new(),
            author: String::new(),
            og_image: String::new(),
            site_url: String::new(),
            allow_indexing: true,
        }
    }
}

async fn load_settings(state: &AppState) -> Result<SeoSettings, AppError> {
    let row: Option<SeoSettings> = sqlx::query_as(
        "SELECT title, description, keywords, author, og_image, site_url, allow_indexing \
         FROM seo_settings WHERE id = $1",
    )
    .bind(SETTINGS_ROW_ID)
    .fetch_optional(&state.pool)
    .await?;
    Ok(row.unwrap_or_default())
}

/// GET /seo
pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let settings = load_settings(&state).await?;
    Ok(Json(json!({ "data": settings })))
}

/// PUT /seo — upsert the single settings row.
pub async fn put_settings(
    RequireStaff(_): RequireStaff,
    State(state): State<AppState>,
    Json(settings): Json<SeoSettings>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query(
        "INSERT INTO seo_settings \
           (id, title, description, keywords, author, og_image, site_url, allow_indexing, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
         ON CONFLICT (id) DO UPDATE SET \
           title = EXCLUDED.title, description = EXCLUDED.description, \
           keywords = EXCLUDED.keywords, author = EXCLUDED.author, \
           og_image = EXCLUDED.og_image, site_url = EXCLUDED.site_url, \
           allow_indexing = EXCLUDED.allow_indexing, updated_at = now()",
    )
    .bind(SETTINGS_ROW_ID)
    .bind(&settings.title)
    .bind(&settings.description)
    .bind(&settings.keywords)
    .bind(&settings.author)
    .bind(&settings.og_image)
    .bind(&settings.site_url)
    .bind(settings.allow_indexing)
    .execute(&state.pool)
    .await?;
    Ok(Json(json!({ "data": settings })))
}

/// Render robots.txt text from the stored settings.
pub fn render_robots(settings: &SeoSettings) -> String {
    let mut out = String::from("User-agent: *\n");
    if settings.allow_indexing {
        out.push_str("Allow: /\n");
    } else {
        out.push_str("Disallow: /\n");
    }
    if !settings.site_url.is_empty() {
        let base = settings.site_url.trim_end_matches('/');
        out.push_str(&format!("Sitemap: {}/sitemap.xml\n", base));
    }
    out
}

/// GET /seo/robots
pub async fn robots(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let settings = load_settings(&state).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_robots(&settings),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robots_allows_by_default() {
        let text = render_robots(&SeoSettings::default());
        assert!(text.contains("Allow: /"));
        assert!(!text.contains("Sitemap:"));
    }

    #[test]
    fn robots_disallow_and_sitemap() {
        let settings = SeoSettings {
            allow_indexing: false,
            site_url: "https://example.com/".into(),
            ..SeoSettings::default()
        };
        let text = render_robots(&settings);
        assert!(text.contains("Disallow: /"));
        assert!(text.contains("Sitemap: https://example.com/sitemap.xml"));
    }
}
