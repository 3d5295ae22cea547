/**
 * Contact Message Routes
 * Public contact form, per-user inbox, admin triage and reply threads
 */
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ContactMessage, MessageCategory, MessageReply, MessageStatus, TextEnum};
use crate::email;
use crate::error::ApiError;
use crate::routes::auth::{optional_session, require_admin, require_session};
use crate::routes::{pool, Page, Pagination, SuccessResponse};
use crate::validation::Validator;

const REPLY_COLUMNS: &str = r#"
    r.id, r.message_id, r.admin_id, r.content, r.created_at,
    COALESCE(NULLIF(TRIM(u.name), ''), split_part(u.email, '@', 1)) AS admin_name
"#;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<ContactMessage>,
    pub pagination: Pagination,
}

/// A message with its reply thread
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: ContactMessage,
    pub replies: Vec<MessageReply>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyListResponse {
    pub replies: Vec<MessageReply>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateReplyRequest {
    #[serde(default)]
    pub content: String,
}

impl CreateMessageRequest {
    pub fn validate(&self) -> Result<MessageCategory, ApiError> {
        let mut v = Validator::new();
        v.length("name", &self.name, 2, 100)
            .email("email", &self.email)
            .length("subject", &self.subject, 3, 200)
            .length("message", &self.message, 10, 5000);
        let category = match self.category.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => v.choice::<MessageCategory>("category", c),
            _ => Some(MessageCategory::General),
        };
        v.finish()?;
        category.ok_or_else(|| ApiError::Internal("category validated but missing".to_string()))
    }
}

impl UpdateStatusRequest {
    pub fn validate(&self) -> Result<MessageStatus, ApiError> {
        let mut v = Validator::new();
        let status = v.choice::<MessageStatus>("status", &self.status);
        v.finish()?;
        status.ok_or_else(|| ApiError::Internal("status validated but missing".to_string()))
    }
}

impl CreateReplyRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new();
        v.length("content", &self.content, 1, 5000);
        v.finish()
    }
}

/// Status and category filters of the admin inbox; unknown values are a 400.
fn parse_filters(
    query: &MessageQuery,
) -> Result<(Option<MessageStatus>, Option<MessageCategory>), ApiError> {
    let mut v = Validator::new();
    let status = match query.status.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => v.choice::<MessageStatus>("status", s),
        _ => None,
    };
    let category = match query.category.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => v.choice::<MessageCategory>("category", c),
        _ => None,
    };
    v.finish()?;
    Ok((status, category))
}

fn message_not_found() -> ApiError {
    ApiError::not_found("Message introuvable")
}

fn parse_message_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| message_not_found())
}

async fn fetch_message(pool: &PgPool, id: Uuid) -> Result<ContactMessage, ApiError> {
    sqlx::query_as::<_, ContactMessage>("SELECT * FROM contact_messages WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(message_not_found)
}

async fn fetch_replies(pool: &PgPool, message_id: Uuid) -> Result<Vec<MessageReply>, ApiError> {
    let replies = sqlx::query_as::<_, MessageReply>(&format!(
        r#"
        SELECT {REPLY_COLUMNS}
        FROM message_replies r
        JOIN users u ON u.id = r.admin_id
        WHERE r.message_id = $1
        ORDER BY r.created_at ASC
        "#
    ))
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(replies)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/messages - Contact form; a signed-in sender is linked to the message
pub async fn create_message(
    headers: HeaderMap,
    payload: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let category = payload.validate()?;
    let user_id = optional_session(&headers).and_then(|s| s.user_id().ok());
    let pool = pool()?;

    let message = sqlx::query_as::<_, ContactMessage>(
        r#"
        INSERT INTO contact_messages (name, email, subject, message, category, user_id)
        VALUES ($1, $2, $3, $4, $5,
                (SELECT id FROM users WHERE id = $6))
        RETURNING *
        "#,
    )
    .bind(payload.name.trim())
    .bind(payload.email.trim().to_lowercase())
    .bind(payload.subject.trim())
    .bind(payload.message.trim())
    .bind(category.as_str())
    .bind(user_id)
    .fetch_one(pool.as_ref())
    .await?;

    tracing::info!(message_id = %message.id, category = %message.category, "Contact message received");
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages - Admins see the whole inbox, users see their own messages
pub async fn list_messages(
    headers: HeaderMap,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let session = require_session(&headers)?;
    let Query(query) = query?;
    let (status, category) = parse_filters(&query)?;
    let page = Page::new(query.limit, query.offset);
    let owner = if session.is_admin() {
        None
    } else {
        Some(session.user_id()?)
    };
    let pool = pool()?;

    let messages = sqlx::query_as::<_, ContactMessage>(
        r#"
        SELECT * FROM contact_messages
        WHERE ($1::UUID IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR status = $2)
          AND ($3::TEXT IS NULL OR category = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(owner)
    .bind(status.map(|s| s.as_str()))
    .bind(category.map(|c| c.as_str()))
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool.as_ref())
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM contact_messages
        WHERE ($1::UUID IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR status = $2)
          AND ($3::TEXT IS NULL OR category = $3)
        "#,
    )
    .bind(owner)
    .bind(status.map(|s| s.as_str()))
    .bind(category.map(|c| c.as_str()))
    .fetch_one(pool.as_ref())
    .await?;

    let pagination = Pagination::new(page, messages.len(), total);
    Ok((StatusCode::OK, Json(MessageListResponse { messages, pagination })))
}

/// GET /api/admin/messages/:id - Message with replies; opening a NEW message marks it READ
pub async fn get_message(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers)?;
    let id = parse_message_id(&id)?;
    let pool = pool()?;

    let opened = sqlx::query_as::<_, ContactMessage>(
        "UPDATE contact_messages SET status = $1, updated_at = now() WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(MessageStatus::Read.as_str())
    .bind(id)
    .bind(MessageStatus::New.as_str())
    .fetch_optional(pool.as_ref())
    .await?;

    let message = match opened {
        Some(message) => message,
        None => fetch_message(pool.as_ref(), id).await?,
    };
    let replies = fetch_replies(pool.as_ref(), id).await?;

    Ok((StatusCode::OK, Json(MessageDetail { message, replies })))
}

/// PATCH /api/admin/messages/:id - Move a message forward in its lifecycle
pub async fn update_message_status(
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let next = payload.validate()?;
    let id = parse_message_id(&id)?;
    let pool = pool()?;

    let current = fetch_message(pool.as_ref(), id).await?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::conflict(format!(
            "Transition de statut impossible : {} vers {}",
            current.status, next
        )));
    }

    // Guarded on the status read above so a concurrent change surfaces as a conflict.
    let message = sqlx::query_as::<_, ContactMessage>(
        "UPDATE contact_messages SET status = $1, updated_at = now() WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(next.as_str())
    .bind(id)
    .bind(current.status.as_str())
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(|| ApiError::conflict("Le message a été modifié entre-temps"))?;

    tracing::info!(message_id = %id, admin = %admin.sub, status = %next, "Message status updated");
    Ok((StatusCode::OK, Json(message)))
}

/// DELETE /api/admin/messages/:id - Remove a message and its replies
pub async fn delete_message(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let id = parse_message_id(&id)?;
    let pool = pool()?;

    let result = sqlx::query("DELETE FROM contact_messages WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await?;
    if result.rows_affected() == 0 {
        return Err(message_not_found());
    }

    tracing::info!(message_id = %id, admin = %admin.sub, "Message deleted");
    Ok((StatusCode::OK, Json(SuccessResponse { success: true })))
}

/// GET /api/admin/messages/:id/reply - Reply thread, oldest first
pub async fn list_replies(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers)?;
    let id = parse_message_id(&id)?;
    let pool = pool()?;

    fetch_message(pool.as_ref(), id).await?;
    let replies = fetch_replies(pool.as_ref(), id).await?;
    Ok((StatusCode::OK, Json(ReplyListResponse { replies })))
}

/// POST /api/admin/messages/:id/reply - Reply and mark the message REPLIED in one transaction
pub async fn create_reply(
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<CreateReplyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    payload.validate()?;
    let id = parse_message_id(&id)?;
    let admin_id = admin.user_id()?;
    let pool = pool()?;

    let mut tx = pool.begin().await?;

    let message = sqlx::query_as::<_, ContactMessage>(
        "UPDATE contact_messages SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(MessageStatus::Replied.as_str())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(message_not_found)?;

    let reply = sqlx::query_as::<_, MessageReply>(&format!(
        r#"
        WITH inserted AS (
            INSERT INTO message_replies (message_id, admin_id, content)
            VALUES ($1, $2, $3)
            RETURNING *
        )
        SELECT {REPLY_COLUMNS}
        FROM inserted r
        JOIN users u ON u.id = r.admin_id
        "#
    ))
    .bind(id)
    .bind(admin_id)
    .bind(payload.content.trim())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(message_id = %id, reply_id = %reply.id, admin = %admin.sub, "Reply sent");

    email::send_reply_notification(&message.email, &message.name, &message.subject, &reply.content)
        .await;

    Ok((StatusCode::CREATED, Json(reply)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{admin_token, send, user_token};
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    fn messages_router() -> Router {
        Router::new()
            .route("/api/messages", get(list_messages).post(create_message))
            .route(
                "/api/admin/messages/{id}",
                get(get_message)
                    .patch(update_message_status)
                    .delete(delete_message),
            )
            .route(
                "/api/admin/messages/{id}/reply",
                get(list_replies).post(create_reply),
            )
    }

    fn contact_form() -> serde_json::Value {
        json!({
            "name": "Awa",
            "email": "awa@example.com",
            "subject": "Partenariat",
            "message": "Bonjour, je souhaite discuter d'un partenariat.",
            "category": "partenariat"
        })
    }

    #[test]
    fn test_contact_form_defaults_to_general() {
        let mut form = contact_form();
        form.as_object_mut().unwrap().remove("category");
        let request: CreateMessageRequest = serde_json::from_value(form).unwrap();
        assert_eq!(request.validate().unwrap(), MessageCategory::General);
    }

    #[test]
    fn test_contact_form_reports_each_field() {
        let request = CreateMessageRequest {
            name: "A".to_string(),
            email: "pas-un-email".to_string(),
            subject: "Yo".to_string(),
            message: "court".to_string(),
            category: Some("spam".to_string()),
        };
        match request.validate() {
            Err(ApiError::Validation(details)) => {
                let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
                assert_eq!(fields, vec!["name", "email", "subject", "message", "category"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_filters_are_rejected() {
        let query = MessageQuery {
            status: Some("DONE".to_string()),
            ..Default::default()
        };
        assert!(parse_filters(&query).is_err());

        let query = MessageQuery {
            status: Some("REPLIED".to_string()),
            category: Some("presse".to_string()),
            ..Default::default()
        };
        assert_eq!(
            parse_filters(&query).unwrap(),
            (Some(MessageStatus::Replied), Some(MessageCategory::Presse))
        );
    }

    #[test]
    fn test_detail_flattens_message() {
        let now = chrono::Utc::now();
        let detail = MessageDetail {
            message: ContactMessage {
                id: Uuid::nil(),
                name: "Awa".to_string(),
                email: "awa@example.com".to_string(),
                subject: "Presse".to_string(),
                message: "Une demande de presse".to_string(),
                category: MessageCategory::Presse,
                status: MessageStatus::Read,
                user_id: None,
                created_at: now,
                updated_at: now,
            },
            replies: vec![],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "READ");
        assert_eq!(json["subject"], "Presse");
        assert!(json["replies"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbox_requires_session() {
        let (status, _) = send(messages_router(), "GET", "/api/messages", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_routes_reject_anonymous_and_users() {
        let uri = format!("/api/admin/messages/{}", Uuid::new_v4());
        let reply_uri = format!("{}/reply", uri);

        let (status, _) = send(messages_router(), "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(
            messages_router(),
            "POST",
            &reply_uri,
            None,
            Some(json!({ "content": "Merci !" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = user_token();
        let (status, _) = send(messages_router(), "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(
            messages_router(),
            "PATCH",
            &uri,
            Some(&token),
            Some(json!({ "status": "ARCHIVED" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_patch_with_unknown_status_is_bad_request() {
        let token = admin_token();
        let uri = format!("/api/admin/messages/{}", Uuid::new_v4());
        let (status, body) = send(
            messages_router(),
            "PATCH",
            &uri,
            Some(&token),
            Some(json!({ "status": "DONE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "status");
    }

    #[tokio::test]
    async fn test_empty_reply_is_bad_request() {
        let token = admin_token();
        let uri = format!("/api/admin/messages/{}/reply", Uuid::new_v4());
        let (status, _) = send(
            messages_router(),
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_contact_form_without_database_is_unavailable() {
        let (status, _) = send(
            messages_router(),
            "POST",
            "/api/messages",
            None,
            Some(contact_form()),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_reply_marks_archived_message_replied(pool: sqlx::PgPool) {
        use crate::db::models::Role;
        use crate::routes::test_support::{seed_user, with_pool};

        with_pool(pool.clone(), async {
            let (_, admin) = seed_user(&pool, "admin@caminotv.fr", Role::Admin).await;

            let (status, created) =
                send(messages_router(), "POST", "/api/messages", None, Some(contact_form())).await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(created["status"], "NEW");
            let uri = format!("/api/admin/messages/{}", created["id"].as_str().unwrap());

            let (status, archived) = send(
                messages_router(),
                "PATCH",
                &uri,
                Some(&admin),
                Some(json!({ "status": "ARCHIVED" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(archived["status"], "ARCHIVED");

            let (status, reply) = send(
                messages_router(),
                "POST",
                &format!("{}/reply", uri),
                Some(&admin),
                Some(json!({ "content": "Merci pour votre message, on revient vers vous." })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert!(reply["id"].is_string());

            let (status, detail) = send(messages_router(), "GET", &uri, Some(&admin), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(detail["status"], "REPLIED");
            assert_eq!(detail["replies"].as_array().unwrap().len(), 1);
        })
        .await;
    }
}
