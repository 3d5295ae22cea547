/**
 * Routes Module
 * API route handlers and the helpers they share
 */

pub mod auth;
pub mod blog;
pub mod comments;
pub mod deals;
pub mod health;
pub mod messages;
pub mod newsletter;
pub mod rss;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Database pool, or 503 when the server runs without one.
pub fn pool() -> Result<Arc<PgPool>, ApiError> {
    crate::db::get_pool().ok_or(ApiError::ServiceUnavailable)
}

/// Query parameters shared by the list endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub featured: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub all: Option<bool>,
    pub tag: Option<String>,
}

/// Query-string boolean accepting `true/1/yes/on` and `false/0/no/off`.
/// Anything else reads as absent rather than failing the request.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }))
}

/// Clamped `limit`/`offset` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

/// Pagination block returned next to every list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: Page, returned: usize, total: i64) -> Self {
        Self {
            total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.offset + (returned as i64) < total,
        }
    }
}

/// Body for plain acknowledgements
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use axum::Router;
    use sqlx::PgPool;
    use std::future::Future;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::models::{Role, TextEnum};
    use crate::routes::auth::create_access_token;

    /// Migrate `pool` and run `body` with handlers seeing it as the app pool.
    pub async fn with_pool<F: Future>(pool: PgPool, body: F) -> F::Output {
        crate::db::run_migrations(&pool).await.unwrap();
        crate::db::SCOPED_POOL.scope(Arc::new(pool), body).await
    }

    /// Insert an account and return a bearer token bound to its real id.
    pub async fn seed_user(pool: &PgPool, email: &str, role: Role) -> (Uuid, String) {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, name, role) VALUES ($1, 'x', 'Test', $2) RETURNING id",
        )
        .bind(email)
        .bind(role.as_str())
        .fetch_one(pool)
        .await
        .unwrap();
        let token = create_access_token(&id.to_string(), email, Some("Test"), role).unwrap();
        (id, token)
    }

    pub fn admin_token() -> String {
        create_access_token(
            &Uuid::new_v4().to_string(),
            "admin@caminotv.fr",
            Some("Admin"),
            Role::Admin,
        )
        .unwrap()
    }

    pub fn user_token() -> String {
        create_access_token(
            &Uuid::new_v4().to_string(),
            "fan@caminotv.fr",
            Some("Fan"),
            Role::User,
        )
        .unwrap()
    }

    pub fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    /// Drive `app` with one request; the body is parsed as JSON (Null when empty).
    pub async fn send(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        json: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match json {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };
        let res = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }
}
