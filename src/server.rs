use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use hyper::Server;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app::health_use_case::HealthUseCase;
use crate::common::constants::SERVICE_NAME;

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthUseCase>,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn internal_error(e: anyhow::Error) -> Response {
    error!("Request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

/// Latest stored snapshot per venue, anomalies first
async fn health_dashboard(State(state): State<AppState>) -> Response {
    match state.health.dashboard().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Score every venue now and return the fresh dashboard
async fn refresh_health(State(state): State<AppState>) -> Response {
    if let Err(e) = state.health.run(Utc::now()).await {
        return internal_error(e);
    }
    health_dashboard(State(state)).await
}

async fn metrics() -> Response {
    match crate::observability::metrics::render() {
        Some(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/health-dashboard", get(health_dashboard))
        .route("/api/health-dashboard/refresh", post(refresh_health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(cors))
}

pub async fn start_server(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let app = create_server(state);
    info!("HTTP server listening on http://{}", addr);
    info!("Health dashboard: http://{}/api/health-dashboard", addr);
    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Venue;
    use crate::pipeline::storage::{CatalogRepository, InMemoryRepository};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> Router {
        let repo = InMemoryRepository::new();
        repo.upsert_venue(&Venue {
            id: "rio".into(),
            name: "Rio Cinema".into(),
            chain: None,
            active: true,
        })
        .await
        .unwrap();
        create_server(AppState {
            health: Arc::new(HealthUseCase::with_defaults(Arc::new(repo))),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_service() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn refresh_scores_and_lists_venues() {
        let app = app().await;
        let empty = app
            .clone()
            .oneshot(Request::builder().uri("/api/health-dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(empty).await["venues"].as_array().unwrap().len(), 0);

        let refreshed = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/health-dashboard/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(refreshed.status(), StatusCode::OK);
        let view = body_json(refreshed).await;
        assert_eq!(view["critical"], 1);
        assert_eq!(view["venues"][0]["venue_id"], "rio");
        assert_eq!(view["thresholds"]["healthy_cutoff"], 80.0);
    }
}
