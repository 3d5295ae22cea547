/**
 * Authentication Routes
 * JWT sessions: register, login, verify, refresh, logout, and the
 * session/role guards used by every protected handler
 */
use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::db::models::{Role, User};
use crate::error::{is_unique_violation, ApiError};
use crate::routes::pool;
use crate::validation::{clean_optional, Validator};

/// Access token expiry in minutes
const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 15;

/// Refresh token expiry in days
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn user_id(&self) -> Result<Uuid, ApiError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ApiError::Unauthorized("Session invalide ou expirée".to_string()))
    }
}

/// User info returned to frontend
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub user: UserInfo,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub is_valid: bool,
    pub user: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

// ============================================================================
// Token helpers
// ============================================================================

/// Generate a random refresh token
fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// Refresh tokens are only stored as SHA-256 digests.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn create_access_token(
    user_id: &str,
    email: &str,
    name: Option<&str>,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES);

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        name: name.map(str::to_string),
        role,
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(CONFIG.jwt_secret.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(CONFIG.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// Session guards
// ============================================================================

/// `Ok(None)` without a token, `Err` for a token that fails verification.
pub fn session_from_headers(headers: &HeaderMap) -> Result<Option<Claims>, ApiError> {
    match extract_bearer_token(headers) {
        None => Ok(None),
        Some(token) => verify_access_token(&token).map(Some).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            ApiError::Unauthorized("Session invalide ou expirée".to_string())
        }),
    }
}

/// Anonymous when the token is missing or invalid. Used by public reads.
pub fn optional_session(headers: &HeaderMap) -> Option<Claims> {
    session_from_headers(headers).ok().flatten()
}

pub fn require_session(headers: &HeaderMap) -> Result<Claims, ApiError> {
    session_from_headers(headers)?.ok_or_else(ApiError::unauthorized)
}

/// 401 without a valid session, 403 for a non-admin one.
pub fn require_admin(headers: &HeaderMap) -> Result<Claims, ApiError> {
    let claims = require_session(headers)?;
    if !claims.is_admin() {
        tracing::warn!(user = %claims.sub, "non-admin attempted an admin operation");
        return Err(ApiError::Forbidden);
    }
    Ok(claims)
}

/// `all=true` only widens a listing for admins; everyone else gets the public view.
pub fn include_hidden(all: Option<bool>, session: Option<&Claims>) -> bool {
    all.unwrap_or(false) && session.is_some_and(Claims::is_admin)
}

/// Revoke a live refresh token and return its owner. The check and the
/// revocation are one statement, so concurrent callers cannot both win.
pub async fn consume_refresh_token(
    pool: &sqlx::PgPool,
    token_hash: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE refresh_tokens SET revoked = true
        WHERE token_hash = $1 AND NOT revoked AND expires_at > now()
        RETURNING user_id
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

async fn issue_session(user: &User) -> Result<SessionResponse, ApiError> {
    let access_token = create_access_token(
        &user.id.to_string(),
        &user.email,
        user.name.as_deref(),
        user.role,
    )
    .map_err(|e| ApiError::Internal(format!("failed to create access token: {}", e)))?;

    let refresh_token = generate_refresh_token();
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    let pool = pool()?;
    sqlx::query(
        r#"INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
           VALUES ($1, $2, $3)"#,
    )
    .bind(user.id)
    .bind(hash_refresh_token(&refresh_token))
    .bind(expires_at)
    .execute(pool.as_ref())
    .await?;

    Ok(SessionResponse {
        success: true,
        user: UserInfo::from(user),
        access_token,
        refresh_token,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
/// Public signup; accounts are created with the USER role.
pub async fn register(
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();
    let name = clean_optional(payload.name);

    let mut v = Validator::new();
    v.email("email", &email)
        .length("password", &payload.password, 8, 128);
    if let Some(name) = &name {
        v.length("name", name, 2, 100);
    }
    v.finish()?;

    let pool = pool()?;

    // bcrypt is CPU-bound; keep it off the async executor.
    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash(&password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::Internal(format!("spawn_blocking panic during hash: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {}", e)))?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, name, role)
        VALUES ($1, $2, $3, 'USER')
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&name)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Un compte existe déjà avec cette adresse email")
        } else {
            e.into()
        }
    })?;

    tracing::info!(email = %user.email, "User registered");
    let session = issue_session(&user).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/auth/login
pub async fn login(
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();

    let mut v = Validator::new();
    v.email("email", &email).length("password", &payload.password, 1, 128);
    v.finish()?;

    let pool = pool()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool.as_ref())
        .await?;

    let invalid = || ApiError::Unauthorized("Identifiants invalides".to_string());
    let user = match user {
        Some(user) => user,
        None => {
            tracing::warn!("Login attempt for unknown user: {}", email);
            return Err(invalid());
        }
    };

    let password = payload.password;
    let password_hash = user.password_hash.clone();
    let password_ok = tokio::task::spawn_blocking(move || {
        verify(&password, &password_hash).unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if !password_ok {
        tracing::warn!("Failed login attempt for: {}", email);
        return Err(invalid());
    }

    tracing::info!("Successful login for user: {}", user.email);
    Ok((StatusCode::OK, Json(issue_session(&user).await?)))
}

/// POST /api/auth/verify
/// Always 200; validity is reported in the body.
pub async fn verify_token(headers: HeaderMap) -> impl IntoResponse {
    let response = match session_from_headers(&headers) {
        Ok(Some(claims)) => VerifyResponse {
            success: true,
            is_valid: true,
            user: Some(UserInfo {
                user_id: claims.sub,
                email: claims.email,
                name: claims.name,
                role: claims.role,
            }),
            error: None,
        },
        Ok(None) => VerifyResponse {
            success: false,
            is_valid: false,
            user: None,
            error: Some("No authorization token provided".to_string()),
        },
        Err(_) => VerifyResponse {
            success: false,
            is_valid: false,
            user: None,
            error: Some("Invalid or expired token".to_string()),
        },
    };
    (StatusCode::OK, Json(response))
}

/// POST /api/auth/refresh
/// Exchange a refresh token for a new access token; the refresh token rotates.
pub async fn refresh(
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let mut v = Validator::new();
    v.length("refreshToken", &payload.refresh_token, 1, 256);
    v.finish()?;

    let pool = pool()?;
    let token_hash = hash_refresh_token(&payload.refresh_token);

    let user_id = consume_refresh_token(pool.as_ref(), &token_hash)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired refresh token".to_string()))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired refresh token".to_string()))?;

    let session = issue_session(&user).await?;
    Ok((
        StatusCode::OK,
        Json(RefreshResponse {
            success: true,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        }),
    ))
}

/// POST /api/auth/logout
/// Revoke the given refresh token, or every token of the session's user.
/// Idempotent: always succeeds.
pub async fn logout(
    headers: HeaderMap,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> impl IntoResponse {
    let payload = payload.map(|Json(p)| p).unwrap_or(LogoutRequest {
        access_token: None,
        refresh_token: None,
    });

    if let Some(pool) = crate::db::get_pool() {
        if let Some(refresh_token) = &payload.refresh_token {
            if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE token_hash = $1")
                .bind(hash_refresh_token(refresh_token))
                .execute(pool.as_ref())
                .await
            {
                tracing::error!("Failed to revoke refresh token: {}", e);
            }
        }

        let claims = payload
            .access_token
            .as_deref()
            .and_then(|t| verify_access_token(t).ok())
            .or_else(|| optional_session(&headers));
        if let Some(user_id) = claims.and_then(|c| c.user_id().ok()) {
            if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE user_id = $1")
                .bind(user_id)
                .execute(pool.as_ref())
                .await
            {
                tracing::error!("Failed to revoke user refresh tokens: {}", e);
            }
        }
    }

    (StatusCode::OK, Json(LogoutResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{admin_token, bearer, send, user_token};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;

    fn auth_router() -> Router {
        Router::new()
            .route("/api/auth/register", post(register))
            .route("/api/auth/login", post(login))
            .route("/api/auth/verify", post(verify_token))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/logout", post(logout))
    }

    #[test]
    fn test_verify_access_token_invalid_returns_err() {
        assert!(verify_access_token("invalid.jwt.token").is_err());
    }

    #[test]
    fn test_access_token_round_trip_keeps_role() {
        let id = Uuid::new_v4();
        let token =
            create_access_token(&id.to_string(), "admin@caminotv.fr", Some("Admin"), Role::Admin)
                .unwrap();
        let claims = verify_access_token(&token).unwrap();
        assert!(claims.is_admin());
        assert_eq!(claims.user_id().unwrap(), id);
        assert_eq!(claims.name.as_deref(), Some("Admin"));
    }

    #[test]
    fn test_refresh_token_hash_is_stable_sha256() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_refresh_token(&token), hash_refresh_token(&token));
        assert_eq!(hash_refresh_token(&token).len(), 64);
    }

    #[test]
    fn test_guards() {
        let none = HeaderMap::new();
        assert_eq!(
            require_admin(&none).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );

        let user = bearer(&user_token());
        assert_eq!(
            require_admin(&user).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert!(require_session(&user).is_ok());

        let admin = bearer(&admin_token());
        assert!(require_admin(&admin).is_ok());

        let garbage = bearer("not-a-jwt");
        assert_eq!(
            require_session(&garbage).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(optional_session(&garbage).is_none());
    }

    #[test]
    fn test_include_hidden_only_for_admins() {
        let admin = verify_access_token(&admin_token()).unwrap();
        let user = verify_access_token(&user_token()).unwrap();
        assert!(include_hidden(Some(true), Some(&admin)));
        assert!(!include_hidden(Some(false), Some(&admin)));
        assert!(!include_hidden(None, Some(&admin)));
        assert!(!include_hidden(Some(true), Some(&user)));
        assert!(!include_hidden(Some(true), None));
    }

    #[tokio::test]
    async fn test_login_empty_email_returns_bad_request() {
        let (status, body) = send(
            auth_router(),
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "email");
    }

    #[tokio::test]
    async fn test_login_without_database_is_unavailable() {
        let (status, _) = send(
            auth_router(),
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "admin@caminotv.fr", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_register_short_password_returns_bad_request() {
        let (status, body) = send(
            auth_router(),
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "email": "fan@caminotv.fr", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "password");
    }

    #[tokio::test]
    async fn test_verify_no_token_returns_error_in_body() {
        let (status, body) = send(auth_router(), "POST", "/api/auth/verify", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["isValid"], false);
    }

    #[tokio::test]
    async fn test_verify_valid_token_returns_user() {
        let token = admin_token();
        let (status, body) =
            send(auth_router(), "POST", "/api/auth/verify", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], true);
        assert_eq!(body["user"]["role"], "ADMIN");
    }

    #[tokio::test]
    async fn test_refresh_empty_token_returns_bad_request() {
        let (status, _) = send(
            auth_router(),
            "POST",
            "/api/auth/refresh",
            None,
            Some(json!({ "refreshToken": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_returns_success() {
        let (status, body) = send(
            auth_router(),
            "POST",
            "/api/auth/logout",
            None,
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_refresh_token_is_single_use(pool: sqlx::PgPool) {
        use crate::routes::test_support::with_pool;

        with_pool(pool.clone(), async {
            let (status, session) = send(
                auth_router(),
                "POST",
                "/api/auth/register",
                None,
                Some(json!({ "email": "Lea@CaminoTV.fr", "password": "motdepasse-solide" })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(session["user"]["email"], "lea@caminotv.fr");
            let first = session["refreshToken"].as_str().unwrap().to_string();

            let (status, rotated) = send(
                auth_router(),
                "POST",
                "/api/auth/refresh",
                None,
                Some(json!({ "refreshToken": first })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_ne!(rotated["refreshToken"], json!(first));

            let (status, _) = send(
                auth_router(),
                "POST",
                "/api/auth/refresh",
                None,
                Some(json!({ "refreshToken": first })),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);

            let second = hash_refresh_token(rotated["refreshToken"].as_str().unwrap());
            let (a, b) = tokio::join!(
                consume_refresh_token(&pool, &second),
                consume_refresh_token(&pool, &second)
            );
            let winners = [a.unwrap(), b.unwrap()].iter().filter(|w| w.is_some()).count();
            assert_eq!(winners, 1);
        })
        .await;
    }
}
