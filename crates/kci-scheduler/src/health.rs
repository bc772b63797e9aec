//! Standalone health HTTP endpoint, independent of the consumer and
//! watchdog threads' liveness (port 8080 by default).

use axum::routing::get;
use axum::Router;

pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

async fn health() -> &'static str {
    "OK"
}

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

pub async fn serve(addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");
    axum::serve(listener, router()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
