/**
 * Newsletter Routes
 * Double opt-in subscription, unsubscribe links and admin broadcast
 */
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{NewsletterSubscriber, SubscriberStatus, TextEnum};
use crate::email;
use crate::error::{is_unique_violation, ApiError, FieldError};
use crate::newsletter::{self, SubscribeAction};
use crate::routes::auth::require_admin;
use crate::routes::{pool, Page, Pagination};
use crate::validation::Validator;

const ALREADY_SUBSCRIBED: &str = "Cette adresse est déjà inscrite à la newsletter";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewsletterResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriberStatus>,
}

impl NewsletterResponse {
    fn new(message: &str, status: Option<SubscriberStatus>) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriberQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriberListResponse {
    pub subscribers: Vec<NewsletterSubscriber>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub success: bool,
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
}

impl BroadcastRequest {
    /// Validated subject and sanitized HTML body.
    pub fn validate(&self) -> Result<(String, String), ApiError> {
        let mut v = Validator::new();
        v.length("subject", &self.subject, 3, 200)
            .length("content", &self.content, 1, 100_000);
        v.finish()?;

        let html = sanitize_html(&self.content);
        if html.trim().is_empty() {
            return Err(ApiError::Validation(vec![FieldError::new(
                "content",
                "Le contenu ne contient aucun HTML autorisé",
            )]));
        }
        Ok((self.subject.trim().to_string(), html))
    }
}

/// Strip scripts, event handlers and anything else outside ammonia's allow-list.
pub fn sanitize_html(content: &str) -> String {
    ammonia::clean(content)
}

fn required_token(query: TokenQuery) -> Result<String, ApiError> {
    query
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation(vec![FieldError::new("token", "Ce champ est requis")]))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/newsletter - Start (or restart) the double opt-in
pub async fn subscribe(
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let address = newsletter::normalize_email(&payload.email);
    let mut v = Validator::new();
    v.email("email", &address);
    v.finish()?;
    let pool = pool()?;

    let existing = sqlx::query_as::<_, NewsletterSubscriber>(
        "SELECT * FROM newsletter_subscribers WHERE email = $1",
    )
    .bind(&address)
    .fetch_optional(pool.as_ref())
    .await?;

    let action = newsletter::plan_subscribe(existing.as_ref().map(|s| s.status))?;
    let confirmation_token = newsletter::generate_token();

    let subscriber = match (action, existing) {
        (SubscribeAction::Create, _) => sqlx::query_as::<_, NewsletterSubscriber>(
            r#"
            INSERT INTO newsletter_subscribers (email, status, confirmation_token, unsubscribe_token)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&address)
        .bind(SubscriberStatus::Pending.as_str())
        .bind(&confirmation_token)
        .bind(newsletter::generate_token())
        .fetch_one(pool.as_ref())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::conflict(ALREADY_SUBSCRIBED)
            } else {
                e.into()
            }
        })?,
        (_, Some(current)) => sqlx::query_as::<_, NewsletterSubscriber>(
            r#"
            UPDATE newsletter_subscribers
            SET status = $1, confirmation_token = $2, unsubscribed_at = NULL, updated_at = now()
            WHERE id = $3 AND status = $4
            RETURNING *
            "#,
        )
        .bind(SubscriberStatus::Pending.as_str())
        .bind(&confirmation_token)
        .bind(current.id)
        .bind(current.status.as_str())
        .fetch_optional(pool.as_ref())
        .await?
        // Confirmed by another request in the meantime.
        .ok_or_else(|| ApiError::conflict(ALREADY_SUBSCRIBED))?,
        (_, None) => {
            return Err(ApiError::Internal(
                "subscriber update planned without a row".to_string(),
            ))
        }
    };

    tracing::info!(subscriber_id = %subscriber.id, action = ?action, "Newsletter subscription pending");

    email::send_confirmation(
        &subscriber.email,
        &confirmation_token,
        &subscriber.unsubscribe_token,
    )
    .await;

    let status = if action == SubscribeAction::Create {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(NewsletterResponse::new(
            "Un email de confirmation vient d'être envoyé",
            Some(subscriber.status),
        )),
    ))
}

/// GET /api/newsletter/confirm?token= - Single-use confirmation link
pub async fn confirm(
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let token = required_token(query)?;
    let pool = pool()?;

    let subscriber = sqlx::query_as::<_, NewsletterSubscriber>(
        r#"
        UPDATE newsletter_subscribers
        SET status = $1, confirmation_token = NULL, confirmed_at = now(), updated_at = now()
        WHERE confirmation_token = $2 AND status = $3
        RETURNING *
        "#,
    )
    .bind(SubscriberStatus::Active.as_str())
    .bind(&token)
    .bind(SubscriberStatus::Pending.as_str())
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("Lien de confirmation invalide ou déjà utilisé"))?;

    tracing::info!(subscriber_id = %subscriber.id, "Newsletter subscription confirmed");

    email::send_welcome(&subscriber.email, &subscriber.unsubscribe_token).await;

    Ok((
        StatusCode::OK,
        Json(NewsletterResponse::new(
            "Inscription confirmée, bienvenue !",
            Some(subscriber.status),
        )),
    ))
}

/// GET|POST /api/newsletter/unsubscribe?token= - Idempotent opt-out
pub async fn unsubscribe(
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let token = required_token(query)?;
    let pool = pool()?;

    let subscriber = sqlx::query_as::<_, NewsletterSubscriber>(
        r#"
        UPDATE newsletter_subscribers
        SET status = $1,
            confirmation_token = NULL,
            unsubscribed_at = CASE WHEN status = $1 THEN unsubscribed_at ELSE now() END,
            updated_at = now()
        WHERE unsubscribe_token = $2
        RETURNING *
        "#,
    )
    .bind(SubscriberStatus::Unsubscribed.as_str())
    .bind(&token)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("Lien de désinscription invalide"))?;

    tracing::info!(subscriber_id = %subscriber.id, "Newsletter unsubscribed");

    Ok((
        StatusCode::OK,
        Json(NewsletterResponse::new(
            "Vous êtes désinscrit de la newsletter",
            Some(subscriber.status),
        )),
    ))
}

/// GET /api/admin/newsletter/subscribers - Subscriber list (admin)
pub async fn list_subscribers(
    headers: HeaderMap,
    query: Result<Query<SubscriberQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers)?;
    let Query(query) = query?;
    let status = match query.status.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => {
            let mut v = Validator::new();
            let parsed = v.choice::<SubscriberStatus>("status", s);
            v.finish()?;
            parsed
        }
        _ => None,
    };
    let page = Page::new(query.limit, query.offset);
    let pool = pool()?;

    let subscribers = sqlx::query_as::<_, NewsletterSubscriber>(
        r#"
        SELECT * FROM newsletter_subscribers
        WHERE ($1::TEXT IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool.as_ref())
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM newsletter_subscribers WHERE ($1::TEXT IS NULL OR status = $1)",
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_one(pool.as_ref())
    .await?;

    let pagination = Pagination::new(page, subscribers.len(), total);
    Ok((
        StatusCode::OK,
        Json(SubscriberListResponse {
            subscribers,
            pagination,
        }),
    ))
}

/// POST /api/admin/newsletter/broadcast - Send an issue to every ACTIVE subscriber (admin)
pub async fn broadcast(
    headers: HeaderMap,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let (subject, html) = payload.validate()?;
    let pool = pool()?;

    let recipients: Vec<(String, String)> = sqlx::query_as(
        "SELECT email, unsubscribe_token FROM newsletter_subscribers WHERE status = $1 ORDER BY created_at",
    )
    .bind(SubscriberStatus::Active.as_str())
    .fetch_all(pool.as_ref())
    .await?;

    let mut sent = 0;
    for (address, unsubscribe_token) in &recipients {
        if email::send_broadcast(address, &subject, &html, unsubscribe_token).await {
            sent += 1;
        }
    }
    let failed = recipients.len() - sent;

    tracing::info!(
        admin = %admin.sub,
        recipients = recipients.len() as u64,
        sent = sent as u64,
        failed = failed as u64,
        "Newsletter broadcast finished"
    );

    Ok((
        StatusCode::OK,
        Json(BroadcastResponse {
            success: failed == 0,
            recipients: recipients.len(),
            sent,
            failed,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{admin_token, send, user_token};
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    fn newsletter_router() -> Router {
        Router::new()
            .route("/api/newsletter", post(subscribe))
            .route("/api/newsletter/confirm", get(confirm))
            .route("/api/newsletter/unsubscribe", get(unsubscribe).post(unsubscribe))
            .route("/api/admin/newsletter/subscribers", get(list_subscribers))
            .route("/api/admin/newsletter/broadcast", post(broadcast))
    }

    #[test]
    fn test_sanitize_strips_scripts() {
        let html = sanitize_html(r#"<p onclick="x()">Salut</p><script>alert(1)</script>"#);
        assert_eq!(html, "<p>Salut</p>");
    }

    #[test]
    fn test_broadcast_validation() {
        let ok = BroadcastRequest {
            subject: " Les deals de la semaine ".to_string(),
            content: "<h1>Top</h1><p>Nos meilleurs deals</p>".to_string(),
        };
        let (subject, html) = ok.validate().unwrap();
        assert_eq!(subject, "Les deals de la semaine");
        assert!(html.contains("<h1>Top</h1>"));

        let script_only = BroadcastRequest {
            subject: "Sujet".to_string(),
            content: "<script>alert(1)</script>".to_string(),
        };
        assert!(matches!(script_only.validate(), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_email_is_bad_request() {
        let (status, body) = send(
            newsletter_router(),
            "POST",
            "/api/newsletter",
            None,
            Some(json!({ "email": "pas-un-email" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "email");
    }

    #[tokio::test]
    async fn test_confirm_requires_token() {
        let (status, body) =
            send(newsletter_router(), "GET", "/api/newsletter/confirm", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "token");

        let (status, _) = send(
            newsletter_router(),
            "POST",
            "/api/newsletter/unsubscribe?token=",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subscribe_without_database_is_unavailable() {
        let (status, _) = send(
            newsletter_router(),
            "POST",
            "/api/newsletter",
            None,
            Some(json!({ "email": "  Fan@CaminoTV.fr " })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_admin_endpoints_are_guarded() {
        let body = json!({ "subject": "Les deals", "content": "<p>Salut</p>" });
        let (status, _) = send(
            newsletter_router(),
            "POST",
            "/api/admin/newsletter/broadcast",
            None,
            Some(body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = user_token();
        let (status, _) = send(
            newsletter_router(),
            "GET",
            "/api/admin/newsletter/subscribers",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_unknown_status_filter_is_bad_request() {
        let token = admin_token();
        let (status, _) = send(
            newsletter_router(),
            "GET",
            "/api/admin/newsletter/subscribers?status=GONE",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    async fn tokens_of(pool: &sqlx::PgPool, email: &str) -> (Option<String>, String) {
        sqlx::query_as("SELECT confirmation_token, unsubscribe_token FROM newsletter_subscribers WHERE email = $1")
            .bind(email)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_resubscribe_goes_back_to_pending_with_fresh_token(pool: sqlx::PgPool) {
        use crate::routes::test_support::with_pool;

        with_pool(pool.clone(), async {
            let form = json!({ "email": "  Fan@Example.com " });
            let (status, body) =
                send(newsletter_router(), "POST", "/api/newsletter", None, Some(form.clone())).await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["status"], "PENDING");

            let (first, unsubscribe_token) = tokens_of(&pool, "fan@example.com").await;
            let first = first.unwrap();
            let (status, body) = send(
                newsletter_router(),
                "GET",
                &format!("/api/newsletter/confirm?token={}", first),
                None,
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ACTIVE");

            let (status, body) = send(
                newsletter_router(),
                "POST",
                &format!("/api/newsletter/unsubscribe?token={}", unsubscribe_token),
                None,
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "UNSUBSCRIBED");

            let (status, body) =
                send(newsletter_router(), "POST", "/api/newsletter", None, Some(form)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "PENDING");

            let (second, kept) = tokens_of(&pool, "fan@example.com").await;
            let second = second.unwrap();
            assert_ne!(second, first);
            assert_eq!(kept, unsubscribe_token);

            let (status, _) = send(
                newsletter_router(),
                "GET",
                &format!("/api/newsletter/confirm?token={}", first),
                None,
                None,
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        })
        .await;
    }
}
