//! Camino Backend - library for app logic and testing

pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod logging;
pub mod newsletter;
pub mod routes;
pub mod validation;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::config::CONFIG;

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN, else the local frontend.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app() -> Router {
    let cors = configure_cors();

    Router::new()
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/verify", post(routes::auth::verify_token))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route(
            "/api/deals",
            get(routes::deals::list_deals).post(routes::deals::create_deal),
        )
        .route(
            "/api/deals/{id}",
            get(routes::deals::get_deal)
                .put(routes::deals::update_deal)
                .delete(routes::deals::delete_deal),
        )
        .route(
            "/api/deals/{id}/favorite",
            post(routes::deals::add_favorite).delete(routes::deals::remove_favorite),
        )
        .route(
            "/api/blog",
            get(routes::blog::list_posts).post(routes::blog::create_post),
        )
        .route(
            "/api/blog/{id}",
            get(routes::blog::get_post)
                .put(routes::blog::update_post)
                .delete(routes::blog::delete_post),
        )
        .route(
            "/api/comments",
            get(routes::comments::list_comments).post(routes::comments::create_comment),
        )
        .route(
            "/api/comments/{id}",
            delete(routes::comments::delete_comment),
        )
        .route(
            "/api/messages",
            get(routes::messages::list_messages).post(routes::messages::create_message),
        )
        .route(
            "/api/admin/messages/{id}",
            get(routes::messages::get_message)
                .patch(routes::messages::update_message_status)
                .delete(routes::messages::delete_message),
        )
        .route(
            "/api/admin/messages/{id}/reply",
            get(routes::messages::list_replies).post(routes::messages::create_reply),
        )
        .route("/api/newsletter", post(routes::newsletter::subscribe))
        .route("/api/newsletter/confirm", get(routes::newsletter::confirm))
        .route(
            "/api/newsletter/unsubscribe",
            get(routes::newsletter::unsubscribe).post(routes::newsletter::unsubscribe),
        )
        .route(
            "/api/admin/newsletter/subscribers",
            get(routes::newsletter::list_subscribers),
        )
        .route(
            "/api/admin/newsletter/broadcast",
            post(routes::newsletter::broadcast),
        )
        .route("/rss.xml", get(routes::rss::rss_feed))
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/database", get(routes::health::health_database))
        .route("/health/ready", get(routes::health::health_ready))
        // Route layer so the logger sees `MatchedPath`; unmatched requests are traced only.
        .route_layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // 2 MB request body cap
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .layer(cors)
}

/// Connect, migrate and seed. Failures leave the server running without a database.
async fn init_database() {
    if std::env::var("DATABASE_URL").is_err() {
        tracing::info!("DATABASE_URL not set. Running without database connection.");
        return;
    }

    let pool = match db::init_pool(None).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                "Failed to initialize database pool: {}. Continuing without database.",
                e
            );
            return;
        }
    };

    if let Err(e) = db::run_migrations(&pool).await {
        tracing::error!("Failed to run database migrations: {}", e);
        return;
    }

    match (&CONFIG.admin_email, &CONFIG.admin_password_hash) {
        (Some(email), Some(hash)) => {
            if let Err(e) = db::seed_admin(&pool, email, hash).await {
                tracing::error!("Failed to seed admin account: {}", e);
            }
        }
        _ => tracing::warn!(
            "ADMIN_EMAIL or ADMIN_PASSWORD_HASH not set; no admin account will be seeded"
        ),
    }
}

/// Run the server (used by main).
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Writer guards must outlive the server or buffered lines are lost.
    let _log_guards = logging::init(CONFIG.is_production());

    routes::health::init_start_time();

    CONFIG.validate()?;
    if CONFIG.resend_api_key.is_none() {
        tracing::warn!("RESEND_API_KEY not set; outgoing emails will be skipped");
    }

    init_database().await;

    let app = create_app();

    let addr: SocketAddr = format!("{}:{}", CONFIG.host, CONFIG.port).parse()?;
    tracing::info!(environment = %CONFIG.environment, "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{send, user_token};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_health_is_routed() {
        let (status, body) = send(create_app(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (status, _) = send(create_app(), "GET", "/api/does-not-exist", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_mutations_require_session() {
        let id = uuid::Uuid::new_v4();
        let cases = [
            ("POST", "/api/deals".to_string()),
            ("PUT", format!("/api/deals/{}", id)),
            ("DELETE", format!("/api/deals/{}", id)),
            ("POST", "/api/blog".to_string()),
            ("PUT", "/api/blog/un-nouvel-article-test".to_string()),
            ("DELETE", "/api/blog/un-nouvel-article-test".to_string()),
            ("PATCH", format!("/api/admin/messages/{}", id)),
            ("POST", "/api/admin/newsletter/broadcast".to_string()),
        ];
        for (method, uri) in cases {
            let (status, _) = send(create_app(), method, &uri, None, Some(json!({}))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_user_listing_with_all_flag_is_not_rejected() {
        let token = user_token();
        let (status, _) = send(create_app(), "GET", "/api/deals?all=true", Some(&token), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_flag_spellings_do_not_fail_listing() {
        for uri in ["/api/deals?all=yes", "/api/blog?featured=1", "/api/deals?featured=on"] {
            let (status, _) = send(create_app(), "GET", uri, None, None).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_malformed_query_is_json_validation_error() {
        let (status, body) = send(create_app(), "GET", "/api/deals?limit=abc", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "query");
        assert!(body["error"].is_string());

        let (status, body) =
            send(create_app(), "GET", "/api/comments?postId=x&offset=-", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "query");
    }

    #[tokio::test]
    async fn test_request_id_is_returned() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let res = create_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(res.headers().contains_key("x-request-id"));
    }
}
