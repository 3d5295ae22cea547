use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

/// Log label for a finished request.
pub fn outcome(status: StatusCode) -> &'static str {
    if status.is_server_error() {
        "request failed"
    } else if status.is_client_error() {
        "request rejected"
    } else {
        "request completed"
    }
}

fn request_id(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Route template when matched (`/api/deals/{id}`), raw path otherwise.
fn route_of(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

/// Log every request with its id, route, status and latency.
/// 5xx at error level, 4xx at warn, everything else at info.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = route_of(&request);
    let req_id = request_id(&request);

    tracing::debug!(request_id = %req_id, method = %method, uri = %request.uri(), "incoming request");

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    let message = outcome(status);

    match status.as_u16() {
        500..=599 => tracing::error!(request_id = %req_id, method = %method, route = %route, status = status.as_u16(), duration_ms, "{}", message),
        400..=499 => tracing::warn!(request_id = %req_id, method = %method, route = %route, status = status.as_u16(), duration_ms, "{}", message),
        _ => tracing::info!(request_id = %req_id, method = %method, route = %route, status = status.as_u16(), duration_ms, "{}", message),
    }

    response
}

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_by_status_class() {
        assert_eq!(outcome(StatusCode::CREATED), "request completed");
        assert_eq!(outcome(StatusCode::CONFLICT), "request rejected");
        assert_eq!(outcome(StatusCode::SERVICE_UNAVAILABLE), "request failed");
    }

    #[tokio::test]
    async fn test_route_layer_sees_route_template() {
        use axum::{middleware, routing::get, Router};
        use tower::ServiceExt;

        async fn echo_route(request: Request, next: Next) -> Response {
            let route = route_of(&request);
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-route", route.parse().unwrap());
            response
        }

        let app = Router::new()
            .route("/api/deals/{id}", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(echo_route));
        let res = app
            .oneshot(
                axum::http::Request::get("/api/deals/42")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()["x-route"], "/api/deals/{id}");
    }

    #[test]
    fn test_unmatched_request_falls_back_to_path() {
        let request = axum::http::Request::builder()
            .uri("/api/deals/abc?x=1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(route_of(&request), "/api/deals/abc");
        assert_eq!(request_id(&request), "unknown");
    }
}
