/**
 * Blog Routes
 * CRUD API endpoints for blog posts
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
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{BlogCategory, BlogPost, TextEnum, User};
use crate::error::{is_unique_violation, ApiError};
use crate::routes::auth::{include_hidden, optional_session, require_admin};
use crate::routes::{pool, ListQuery, Page, Pagination};
use crate::validation::{clean_optional, Validator};

const SLUG_TAKEN: &str = "Un article avec ce slug existe déjà";
const WORDS_PER_MINUTE: usize = 200;
const MAX_TAGS: usize = 10;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for GET /api/blog (list)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogListResponse {
    pub posts: Vec<BlogPostSummary>,
    pub pagination: Pagination,
}

/// Blog post summary (for list view, no content)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub cover_image: Option<String>,
    pub category: BlogCategory,
    pub author_name: String,
    pub author_image: Option<String>,
    pub author_role: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub read_time: i32,
    pub tags: Vec<String>,
    pub is_featured: bool,
    pub is_published: bool,
    pub views: i64,
}

impl From<BlogPost> for BlogPostSummary {
    fn from(p: BlogPost) -> Self {
        Self {
            id: p.id,
            title: p.title,
            slug: p.slug,
            excerpt: p.excerpt,
            cover_image: p.cover_image,
            category: p.category,
            author_name: p.author_name,
            author_image: p.author_image,
            author_role: p.author_role,
            published_at: p.published_at,
            read_time: p.read_time,
            tags: p.tags,
            is_featured: p.is_featured,
            is_published: p.is_published,
            views: p.views,
        }
    }
}

/// Request body for POST /api/blog (create)
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlogRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub read_time: Option<i32>,
    #[serde(default)]
    pub is_featured: bool,
    pub is_published: Option<bool>,
    pub published_at: Option<DateTime<Utc>>,
    pub author_name: Option<String>,
    pub author_image: Option<String>,
    pub author_role: Option<String>,
}

/// Request body for PUT /api/blog/:id (update)
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlogRequest {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub read_time: Option<i32>,
    pub is_featured: Option<bool>,
    pub is_published: Option<bool>,
    pub published_at: Option<DateTime<Utc>>,
    pub author_name: Option<String>,
    pub author_image: Option<String>,
    pub author_role: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Estimated reading time in whole minutes, never below one.
pub fn estimate_read_time(content: &str) -> i32 {
    let words = content.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as i32
}

/// Read time for an update: an explicit value wins, new content is re-estimated,
/// otherwise the stored value is kept.
pub fn resolve_read_time(requested: Option<i32>, new_content: Option<&str>, current: i32) -> i32 {
    match (requested, new_content) {
        (Some(minutes), _) => minutes,
        (None, Some(content)) => estimate_read_time(content),
        (None, None) => current,
    }
}

/// Trimmed, lowercased, de-duplicated tags in submission order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn check_tags(v: &mut Validator, tags: &[String]) {
    if tags.len() > MAX_TAGS {
        v.error("tags", format!("{} tags maximum", MAX_TAGS));
    }
    if tags.iter().any(|t| t.trim().chars().count() > 30) {
        v.error("tags", "Chaque tag doit contenir au plus 30 caractères");
    }
}

impl CreateBlogRequest {
    pub fn validate(&self) -> Result<BlogCategory, ApiError> {
        let mut v = Validator::new();
        v.length("title", &self.title, 10, 200)
            .length("slug", &self.slug, 3, 200)
            .slug("slug", self.slug.trim())
            .length("excerpt", &self.excerpt, 50, 500)
            .length("content", &self.content, 100, 100_000)
            .optional_url("coverImage", self.cover_image.as_deref())
            .optional_url("authorImage", self.author_image.as_deref());
        check_tags(&mut v, &self.tags);
        if let Some(minutes) = self.read_time {
            v.range_i64("readTime", minutes.into(), 1, 120);
        }
        if let Some(name) = &self.author_name {
            v.max_length("authorName", name, 100);
        }
        let category = v.choice::<BlogCategory>("category", &self.category);
        v.finish()?;
        category.ok_or_else(|| ApiError::Internal("category validated but missing".to_string()))
    }
}

impl UpdateBlogRequest {
    pub fn validate(&self) -> Result<Option<BlogCategory>, ApiError> {
        let mut v = Validator::new();
        if let Some(title) = &self.title {
            v.length("title", title, 10, 200);
        }
        if let Some(slug) = &self.slug {
            v.length("slug", slug, 3, 200).slug("slug", slug.trim());
        }
        if let Some(excerpt) = &self.excerpt {
            v.length("excerpt", excerpt, 50, 500);
        }
        if let Some(content) = &self.content {
            v.length("content", content, 100, 100_000);
        }
        if let Some(tags) = &self.tags {
            check_tags(&mut v, tags);
        }
        if let Some(minutes) = self.read_time {
            v.range_i64("readTime", minutes.into(), 1, 120);
        }
        if let Some(name) = &self.author_name {
            v.length("authorName", name, 1, 100);
        }
        v.optional_url("coverImage", self.cover_image.as_deref())
            .optional_url("authorImage", self.author_image.as_deref());
        let category = match &self.category {
            Some(c) => v.choice::<BlogCategory>("category", c),
            None => None,
        };
        v.finish()?;
        Ok(category)
    }
}

fn post_not_found() -> ApiError {
    ApiError::not_found("Article introuvable")
}

/// Look a post up by id, falling back to its slug.
async fn find_post(pool: &PgPool, key: &str) -> Result<Option<BlogPost>, ApiError> {
    if let Ok(id) = Uuid::parse_str(key) {
        let post = sqlx::query_as::<_, BlogPost>("SELECT * FROM blog_posts WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        if post.is_some() {
            return Ok(post);
        }
    }

    let post = sqlx::query_as::<_, BlogPost>("SELECT * FROM blog_posts WHERE slug = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(post)
}

async fn slug_taken(pool: &PgPool, slug: &str, except: Option<Uuid>) -> Result<bool, ApiError> {
    let (taken,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM blog_posts WHERE slug = $1 AND ($2::UUID IS NULL OR id <> $2))",
    )
    .bind(slug)
    .bind(except)
    .fetch_one(pool)
    .await?;
    Ok(taken)
}

fn map_slug_conflict(e: sqlx::Error) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::conflict(SLUG_TAKEN)
    } else {
        e.into()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/blog - List published posts with pagination
pub async fn list_posts(
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let session = optional_session(&headers);
    let show_all = include_hidden(query.all, session.as_ref());
    let category = match query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => {
            let mut v = Validator::new();
            let parsed = v.choice::<BlogCategory>("category", c);
            v.finish()?;
            parsed
        }
        None => None,
    };
    let tag = clean_optional(query.tag).map(|t| t.to_lowercase());
    let featured_only = query.featured.unwrap_or(false);
    let page = Page::new(query.limit, query.offset);

    let pool = pool()?;

    let posts = sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT * FROM blog_posts
        WHERE ($1 OR is_published)
          AND ($2::TEXT IS NULL OR category = $2)
          AND (NOT $3 OR is_featured)
          AND ($4::TEXT IS NULL OR $4 = ANY(tags))
        ORDER BY published_at DESC NULLS LAST, created_at DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(show_all)
    .bind(category.map(|c| c.as_str()))
    .bind(featured_only)
    .bind(&tag)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool.as_ref())
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM blog_posts
        WHERE ($1 OR is_published)
          AND ($2::TEXT IS NULL OR category = $2)
          AND (NOT $3 OR is_featured)
          AND ($4::TEXT IS NULL OR $4 = ANY(tags))
        "#,
    )
    .bind(show_all)
    .bind(category.map(|c| c.as_str()))
    .bind(featured_only)
    .bind(&tag)
    .fetch_one(pool.as_ref())
    .await?;

    let pagination = Pagination::new(page, posts.len(), total);
    let posts = posts.into_iter().map(BlogPostSummary::from).collect();
    Ok((StatusCode::OK, Json(BlogListResponse { posts, pagination })))
}

/// GET /api/blog/:id - Single post by id or slug; published reads bump the view counter
pub async fn get_post(Path(key): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let pool = pool()?;

    let post = find_post(pool.as_ref(), &key)
        .await?
        .ok_or_else(post_not_found)?;

    if !post.is_published {
        return Ok((StatusCode::OK, Json(post)));
    }

    let post = sqlx::query_as::<_, BlogPost>(
        "UPDATE blog_posts SET views = views + 1 WHERE id = $1 RETURNING *",
    )
    .bind(post.id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(post_not_found)?;

    Ok((StatusCode::OK, Json(post)))
}

/// POST /api/blog - Create new blog post (admin)
pub async fn create_post(
    headers: HeaderMap,
    payload: Result<Json<CreateBlogRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let category = payload.validate()?;
    let pool = pool()?;

    let slug = payload.slug.trim().to_string();
    if slug_taken(pool.as_ref(), &slug, None).await? {
        return Err(ApiError::conflict(SLUG_TAKEN));
    }

    // Author fields are a snapshot taken now; later profile edits do not rewrite posts.
    let admin_id = admin.user_id()?;
    let author = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(admin_id)
        .fetch_optional(pool.as_ref())
        .await?;
    let author_name = clean_optional(payload.author_name)
        .or_else(|| author.as_ref().map(User::display_name))
        .or_else(|| admin.name.clone())
        .unwrap_or_else(|| "Rédaction".to_string());
    let author_image =
        clean_optional(payload.author_image).or_else(|| author.as_ref().and_then(|u| u.image.clone()));
    let author_role = clean_optional(payload.author_role);

    let is_published = payload.is_published.unwrap_or(true);
    let published_at = match payload.published_at {
        Some(at) => Some(at),
        None if is_published => Some(Utc::now()),
        None => None,
    };
    let read_time = payload
        .read_time
        .unwrap_or_else(|| estimate_read_time(&payload.content));

    let post = sqlx::query_as::<_, BlogPost>(
        r#"
        INSERT INTO blog_posts (title, slug, excerpt, content, cover_image, category,
                                author_id, author_name, author_image, author_role,
                                published_at, read_time, tags, is_featured, is_published)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(payload.title.trim())
    .bind(&slug)
    .bind(payload.excerpt.trim())
    .bind(&payload.content)
    .bind(clean_optional(payload.cover_image))
    .bind(category.as_str())
    .bind(author.as_ref().map(|u| u.id))
    .bind(&author_name)
    .bind(&author_image)
    .bind(&author_role)
    .bind(published_at)
    .bind(read_time)
    .bind(normalize_tags(&payload.tags))
    .bind(payload.is_featured)
    .bind(is_published)
    .fetch_one(pool.as_ref())
    .await
    .map_err(map_slug_conflict)?;

    tracing::info!(post_id = %post.id, slug = %post.slug, "Blog post created");
    Ok((StatusCode::CREATED, Json(post)))
}

/// PUT /api/blog/:id - Update blog post (admin)
pub async fn update_post(
    headers: HeaderMap,
    Path(key): Path<String>,
    payload: Result<Json<UpdateBlogRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let category = payload.validate()?;
    let pool = pool()?;

    let existing = find_post(pool.as_ref(), &key)
        .await?
        .ok_or_else(post_not_found)?;

    let slug = payload
        .slug
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| existing.slug.clone());
    if slug != existing.slug && slug_taken(pool.as_ref(), &slug, Some(existing.id)).await? {
        return Err(ApiError::conflict(SLUG_TAKEN));
    }

    let read_time = resolve_read_time(
        payload.read_time,
        payload.content.as_deref(),
        existing.read_time,
    );
    let content = payload.content.unwrap_or(existing.content);
    let is_published = payload.is_published.unwrap_or(existing.is_published);
    let published_at = payload.published_at.or(existing.published_at).or_else(|| {
        if is_published {
            Some(Utc::now())
        } else {
            None
        }
    });

    let post = sqlx::query_as::<_, BlogPost>(
        r#"
        UPDATE blog_posts
        SET title = $1, slug = $2, excerpt = $3, content = $4, cover_image = $5,
            category = $6, author_name = $7, author_image = $8, author_role = $9,
            published_at = $10, read_time = $11, tags = $12, is_featured = $13,
            is_published = $14, updated_at = now()
        WHERE id = $15
        RETURNING *
        "#,
    )
    .bind(payload.title.map(|t| t.trim().to_string()).unwrap_or(existing.title))
    .bind(&slug)
    .bind(payload.excerpt.map(|e| e.trim().to_string()).unwrap_or(existing.excerpt))
    .bind(&content)
    .bind(match payload.cover_image {
        Some(url) => clean_optional(Some(url)),
        None => existing.cover_image,
    })
    .bind(category.unwrap_or(existing.category).as_str())
    .bind(payload.author_name.map(|n| n.trim().to_string()).unwrap_or(existing.author_name))
    .bind(match payload.author_image {
        Some(url) => clean_optional(Some(url)),
        None => existing.author_image,
    })
    .bind(match payload.author_role {
        Some(role) => clean_optional(Some(role)),
        None => existing.author_role,
    })
    .bind(published_at)
    .bind(read_time)
    .bind(match payload.tags {
        Some(tags) => normalize_tags(&tags),
        None => existing.tags,
    })
    .bind(payload.is_featured.unwrap_or(existing.is_featured))
    .bind(is_published)
    .bind(existing.id)
    .fetch_optional(pool.as_ref())
    .await
    .map_err(map_slug_conflict)?
    .ok_or_else(post_not_found)?;

    tracing::info!(post_id = %post.id, admin = %admin.sub, "Blog post updated");
    Ok((StatusCode::OK, Json(post)))
}

/// DELETE /api/blog/:id - Unpublish (soft delete) a post (admin)
pub async fn delete_post(
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let pool = pool()?;

    let existing = find_post(pool.as_ref(), &key)
        .await?
        .ok_or_else(post_not_found)?;

    let post = sqlx::query_as::<_, BlogPost>(
        "UPDATE blog_posts SET is_published = false, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(existing.id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(post_not_found)?;

    tracing::info!(post_id = %post.id, admin = %admin.sub, "Blog post unpublished");
    Ok((StatusCode::OK, Json(post)))
}
