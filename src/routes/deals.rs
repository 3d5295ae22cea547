/**
 * Deal Routes
 * Catalog CRUD with soft delete and a favorites counter
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
use uuid::Uuid;

use crate::db::models::{Deal, DealCategory, TextEnum};
use crate::error::ApiError;
use crate::routes::auth::{include_hidden, optional_session, require_admin, require_session};
use crate::routes::{pool, ListQuery, Page, Pagination};
use crate::validation::{clean_optional, Validator};

const MAX_PRICE: f64 = 1_000_000.0;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for POST /api/deals
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub brand: String,
    pub description: Option<String>,
    #[serde(default)]
    pub original_price: f64,
    #[serde(default)]
    pub sale_price: f64,
    pub discount_percentage: Option<i32>,
    #[serde(default)]
    pub category: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub affiliate_url: String,
    #[serde(default)]
    pub is_featured: bool,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request body for PUT /api/deals/:id
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDealRequest {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub original_price: Option<f64>,
    pub sale_price: Option<f64>,
    pub discount_percentage: Option<i32>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
    /// Absent keeps the current expiry, `null` clears it.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Expiry after a PUT: absent keeps, `null` clears, a value replaces.
pub fn resolve_expiry(
    requested: Option<Option<DateTime<Utc>>>,
    current: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    requested.unwrap_or(current)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealListResponse {
    pub deals: Vec<Deal>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteResponse {
    pub id: Uuid,
    pub favorites_count: i64,
}

// ============================================================================
// Validation
// ============================================================================

/// Discount derived from the two prices, rounded to the nearest percent.
pub fn compute_discount(original_price: f64, sale_price: f64) -> i32 {
    if original_price <= 0.0 || sale_price >= original_price {
        return 0;
    }
    (((original_price - sale_price) / original_price) * 100.0)
        .round()
        .clamp(0.0, 100.0) as i32
}

fn check_prices(v: &mut Validator, original_price: f64, sale_price: f64) {
    if original_price.is_finite() && sale_price.is_finite() && sale_price > original_price {
        v.error(
            "salePrice",
            "Le prix soldé ne peut pas dépasser le prix d'origine",
        );
    }
}

impl CreateDealRequest {
    pub fn validate(&self) -> Result<DealCategory, ApiError> {
        let mut v = Validator::new();
        v.length("title", &self.title, 10, 200)
            .length("brand", &self.brand, 2, 100)
            .range_f64("originalPrice", self.original_price, 0.01, MAX_PRICE)
            .range_f64("salePrice", self.sale_price, 0.01, MAX_PRICE)
            .url("affiliateUrl", self.affiliate_url.trim())
            .optional_url("imageUrl", self.image_url.as_deref());
        if let Some(description) = &self.description {
            v.max_length("description", description, 2000);
        }
        if let Some(discount) = self.discount_percentage {
            v.range_i64("discountPercentage", discount.into(), 0, 100);
        }
        check_prices(&mut v, self.original_price, self.sale_price);
        let category = v.choice::<DealCategory>("category", &self.category);
        v.finish()?;
        category.ok_or_else(|| ApiError::Internal("category validated but missing".to_string()))
    }
}

impl UpdateDealRequest {
    pub fn validate(&self) -> Result<Option<DealCategory>, ApiError> {
        let mut v = Validator::new();
        if let Some(title) = &self.title {
            v.length("title", title, 10, 200);
        }
        if let Some(brand) = &self.brand {
            v.length("brand", brand, 2, 100);
        }
        if let Some(description) = &self.description {
            v.max_length("description", description, 2000);
        }
        if let Some(price) = self.original_price {
            v.range_f64("originalPrice", price, 0.01, MAX_PRICE);
        }
        if let Some(price) = self.sale_price {
            v.range_f64("salePrice", price, 0.01, MAX_PRICE);
        }
        if let Some(discount) = self.discount_percentage {
            v.range_i64("discountPercentage", discount.into(), 0, 100);
        }
        if let Some(url) = &self.affiliate_url {
            v.url("affiliateUrl", url.trim());
        }
        v.optional_url("imageUrl", self.image_url.as_deref());
        let category = match &self.category {
            Some(c) => v.choice::<DealCategory>("category", c),
            None => None,
        };
        v.finish()?;
        Ok(category)
    }
}

fn parse_category_filter(category: Option<&str>) -> Result<Option<DealCategory>, ApiError> {
    match category.map(str::trim).filter(|c| !c.is_empty()) {
        None => Ok(None),
        Some(c) => {
            let mut v = Validator::new();
            let parsed = v.choice::<DealCategory>("category", c);
            v.finish()?;
            Ok(parsed)
        }
    }
}

fn deal_not_found() -> ApiError {
    ApiError::not_found("Deal introuvable")
}

fn parse_deal_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| deal_not_found())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/deals - List deals (active only, unless an admin passes all=true)
pub async fn list_deals(
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let session = optional_session(&headers);
    let show_all = include_hidden(query.all, session.as_ref());
    let category = parse_category_filter(query.category.as_deref())?;
    let featured_only = query.featured.unwrap_or(false);
    let page = Page::new(query.limit, query.offset);

    let pool = pool()?;

    let deals = sqlx::query_as::<_, Deal>(
        r#"
        SELECT * FROM deals
        WHERE ($1 OR is_active)
          AND ($2::TEXT IS NULL OR category = $2)
          AND (NOT $3 OR is_featured)
        ORDER BY is_featured DESC, created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(show_all)
    .bind(category.map(|c| c.as_str()))
    .bind(featured_only)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool.as_ref())
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM deals
        WHERE ($1 OR is_active)
          AND ($2::TEXT IS NULL OR category = $2)
          AND (NOT $3 OR is_featured)
        "#,
    )
    .bind(show_all)
    .bind(category.map(|c| c.as_str()))
    .bind(featured_only)
    .fetch_one(pool.as_ref())
    .await?;

    let pagination = Pagination::new(page, deals.len(), total);
    Ok((StatusCode::OK, Json(DealListResponse { deals, pagination })))
}

/// GET /api/deals/:id - Single deal, soft-deleted ones included
pub async fn get_deal(Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let id = parse_deal_id(&id)?;
    let pool = pool()?;

    let deal = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or_else(deal_not_found)?;

    Ok((StatusCode::OK, Json(deal)))
}

/// POST /api/deals - Create deal (admin)
pub async fn create_deal(
    headers: HeaderMap,
    payload: Result<Json<CreateDealRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let category = payload.validate()?;
    let pool = pool()?;

    let discount = payload
        .discount_percentage
        .unwrap_or_else(|| compute_discount(payload.original_price, payload.sale_price));

    let deal = sqlx::query_as::<_, Deal>(
        r#"
        INSERT INTO deals (title, brand, description, original_price, sale_price,
                           discount_percentage, category, image_url, affiliate_url,
                           is_featured, is_active, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(payload.title.trim())
    .bind(payload.brand.trim())
    .bind(clean_optional(payload.description))
    .bind(payload.original_price)
    .bind(payload.sale_price)
    .bind(discount)
    .bind(category.as_str())
    .bind(clean_optional(payload.image_url))
    .bind(payload.affiliate_url.trim())
    .bind(payload.is_featured)
    .bind(payload.is_active.unwrap_or(true))
    .bind(payload.expires_at)
    .fetch_one(pool.as_ref())
    .await?;

    tracing::info!(deal_id = %deal.id, admin = %admin.sub, "Deal created");
    Ok((StatusCode::CREATED, Json(deal)))
}

/// PUT /api/deals/:id - Partial update (admin)
pub async fn update_deal(
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDealRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(payload) = payload?;
    let category = payload.validate()?;
    let id = parse_deal_id(&id)?;
    let pool = pool()?;

    let existing = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE id = $1")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or_else(deal_not_found)?;

    let original_price = payload.original_price.unwrap_or(existing.original_price);
    let sale_price = payload.sale_price.unwrap_or(existing.sale_price);
    let mut v = Validator::new();
    check_prices(&mut v, original_price, sale_price);
    v.finish()?;

    let prices_changed = payload.original_price.is_some() || payload.sale_price.is_some();
    let discount = match payload.discount_percentage {
        Some(d) => d,
        None if prices_changed => compute_discount(original_price, sale_price),
        None => existing.discount_percentage,
    };

    let deal = sqlx::query_as::<_, Deal>(
        r#"
        UPDATE deals
        SET title = $1, brand = $2, description = $3, original_price = $4, sale_price = $5,
            discount_percentage = $6, category = $7, image_url = $8, affiliate_url = $9,
            is_featured = $10, is_active = $11, expires_at = $12, updated_at = now()
        WHERE id = $13
        RETURNING *
        "#,
    )
    .bind(payload.title.map(|t| t.trim().to_string()).unwrap_or(existing.title))
    .bind(payload.brand.map(|b| b.trim().to_string()).unwrap_or(existing.brand))
    .bind(match payload.description {
        Some(d) => clean_optional(Some(d)),
        None => existing.description,
    })
    .bind(original_price)
    .bind(sale_price)
    .bind(discount)
    .bind(category.unwrap_or(existing.category).as_str())
    .bind(match payload.image_url {
        Some(url) => clean_optional(Some(url)),
        None => existing.image_url,
    })
    .bind(
        payload
            .affiliate_url
            .map(|u| u.trim().to_string())
            .unwrap_or(existing.affiliate_url),
    )
    .bind(payload.is_featured.unwrap_or(existing.is_featured))
    .bind(payload.is_active.unwrap_or(existing.is_active))
    .bind(resolve_expiry(payload.expires_at, existing.expires_at))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(deal_not_found)?;

    tracing::info!(deal_id = %deal.id, admin = %admin.sub, "Deal updated");
    Ok((StatusCode::OK, Json(deal)))
}

/// DELETE /api/deals/:id - Soft delete: the row stays, is_active flips to false (admin)
pub async fn delete_deal(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&headers)?;
    let id = parse_deal_id(&id)?;
    let pool = pool()?;

    let deal = sqlx::query_as::<_, Deal>(
        "UPDATE deals SET is_active = false, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(deal_not_found)?;

    tracing::info!(deal_id = %deal.id, admin = %admin.sub, "Deal deactivated");
    Ok((StatusCode::OK, Json(deal)))
}

async fn adjust_favorites(
    headers: &HeaderMap,
    id: &str,
    delta: i64,
) -> Result<(StatusCode, Json<FavoriteResponse>), ApiError> {
    require_session(headers)?;
    let id = parse_deal_id(id)?;
    let pool = pool()?;

    let (favorites_count,): (i64,) = sqlx::query_as(
        r#"
        UPDATE deals SET favorites_count = GREATEST(favorites_count + $1, 0)
        WHERE id = $2 AND is_active
        RETURNING favorites_count
        "#,
    )
    .bind(delta)
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(deal_not_found)?;

    Ok((
        StatusCode::OK,
        Json(FavoriteResponse {
            id,
            favorites_count,
        }),
    ))
}

/// POST /api/deals/:id/favorite
pub async fn add_favorite(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    adjust_favorites(&headers, &id, 1).await
}

/// DELETE /api/deals/:id/favorite
pub async fn remove_favorite(
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    adjust_favorites(&headers, &id, -1).await
}
