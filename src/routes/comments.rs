/**
 * Comment Routes
 * Public thread reads, signed-in posting, owner/admin deletion
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
use uuid::Uuid;

use crate::db::models::Comment;
use crate::error::{ApiError, FieldError};
use crate::routes::auth::{require_session, Claims};
use crate::routes::{pool, Page, Pagination, SuccessResponse};
use crate::validation::Validator;

/// Author columns joined from `users`; users without a name show their email local part.
const COMMENT_COLUMNS: &str = r#"
    c.id, c.content, c.post_id, c.user_id, c.created_at,
    COALESCE(NULLIF(TRIM(u.name), ''), split_part(u.email, '@', 1)) AS author_name,
    u.image AS author_image
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentQuery {
    pub post_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentListResponse {
    pub comments: Vec<Comment>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub content: String,
}

impl CreateCommentRequest {
    pub fn validate(&self) -> Result<Uuid, ApiError> {
        let mut v = Validator::new();
        v.length("content", &self.content, 2, 1000);
        let post_id = Uuid::parse_str(self.post_id.trim()).ok();
        v.check("postId", post_id.is_some(), "Identifiant d'article invalide");
        v.finish()?;
        post_id.ok_or_else(|| ApiError::Internal("postId validated but missing".to_string()))
    }
}

/// Only the author or an admin may remove a comment.
pub fn can_delete_comment(session: &Claims, owner_id: Uuid) -> bool {
    session.is_admin() || session.sub == owner_id.to_string()
}

fn comment_not_found() -> ApiError {
    ApiError::not_found("Commentaire introuvable")
}

/// GET /api/comments?postId= - Comments of one post, newest first
pub async fn list_comments(
    query: Result<Query<CommentQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let post_id = query
        .post_id
        .as_deref()
        .map(str::trim)
        .and_then(|id| Uuid::parse_str(id).ok());
    let Some(post_id) = post_id else {
        return Err(ApiError::Validation(vec![FieldError::new(
            "postId",
            "Identifiant d'article invalide",
        )]));
    };
    let page = Page::new(query.limit, query.offset);
    let pool = pool()?;

    let comments = sqlx::query_as::<_, Comment>(&format!(
        r#"
        SELECT {COMMENT_COLUMNS}
        FROM comments c
        JOIN users u ON u.id = c.user_id
        WHERE c.post_id = $1
        ORDER BY c.created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(post_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool.as_ref())
    .await?;

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE post_id = $1")
        .bind(post_id)
        .fetch_one(pool.as_ref())
        .await?;

    let pagination = Pagination::new(page, comments.len(), total);
    Ok((StatusCode::OK, Json(CommentListResponse { comments, pagination })))
}

/// POST /api/comments - Comment on a published post (signed in)
pub async fn create_comment(
    headers: HeaderMap,
    payload: Result<Json<CreateCommentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let session = require_session(&headers)?;
    let Json(payload) = payload?;
    let post_id = payload.validate()?;
    let user_id = session.user_id()?;
    let pool = pool()?;

    let (published,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM blog_posts WHERE id = $1 AND is_published)",
    )
    .bind(post_id)
    .fetch_one(pool.as_ref())
    .await?;
    if !published {
        return Err(ApiError::not_found("Article introuvable"));
    }

    let comment = sqlx::query_as::<_, Comment>(&format!(
        r#"
        WITH inserted AS (
            INSERT INTO comments (content, post_id, user_id)
            VALUES ($1, $2, $3)
            RETURNING *
        )
        SELECT {COMMENT_COLUMNS}
        FROM inserted c
        JOIN users u ON u.id = c.user_id
        "#
    ))
    .bind(payload.content.trim())
    .bind(post_id)
    .bind(user_id)
    .fetch_optional(pool.as_ref())
    .await?
    // The session outlived its account.
    .ok_or_else(ApiError::unauthorized)?;

    tracing::info!(comment_id = %comment.id, post_id = %post_id, "Comment created");
    Ok((StatusCode::CREATED, Json(comment)))
}

/// DELETE /api/comments/:id - Hard delete by the author or an admin
pub async fn delete_comment(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = require_session(&headers)?;
    let id = Uuid::parse_str(&id).map_err(|_| comment_not_found())?;
    let pool = pool()?;

    let owner: Option<(Uuid,)> = sqlx::query_as("SELECT user_id FROM comments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await?;
    let (owner_id,) = owner.ok_or_else(comment_not_found)?;

    if !can_delete_comment(&session, owner_id) {
        tracing::warn!(comment_id = %id, user = %session.sub, "comment deletion refused");
        return Err(ApiError::Forbidden);
    }

    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await?;

    tracing::info!(comment_id = %id, user = %session.sub, "Comment deleted");
    Ok((StatusCode::OK, Json(SuccessResponse { success: true })))
}
